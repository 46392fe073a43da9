//! HTTP handlers (spec §4.7-§4.8): plain-text path updates, JSON
//! single/batch updates, retrieval, dashboard, and liveness.

use super::ServerState;
use crate::error::Error;
use crate::model::{Kind, Metric};
use crate::storage::format_gauge;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::Json;
use std::sync::Arc;
use std::time::Duration;

/// `GET /` — minimal hand-built dashboard (spec §2: the templating
/// engine is out of scope, the storage→handler path is not).
pub async fn dashboard(State(state): State<Arc<ServerState>>) -> Result<Html<String>, Error> {
    let mut rows = state.storage.get_all().await?;
    rows.sort_by(|a, b| a.id.cmp(&b.id));

    let mut body = String::from("<html><body><h1>metsys</h1><table>");
    for row in rows {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            row.id,
            row.kind.as_str(),
            row.string_value
        ));
    }
    body.push_str("</table></body></html>");
    Ok(Html(body))
}

/// `GET /ping` — storage liveness with a 1s timeout (spec §4.7).
pub async fn ping(State(state): State<Arc<ServerState>>) -> Result<StatusCode, Error> {
    match tokio::time::timeout(Duration::from_secs(1), state.storage.ping()).await {
        Ok(Ok(())) => Ok(StatusCode::OK),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Internal(anyhow::anyhow!("ping timed out"))),
    }
}

/// `GET /value/{kind}/{id}` — plain-text read.
pub async fn get_value_path(
    State(state): State<Arc<ServerState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<String, Error> {
    if id.is_empty() {
        return Err(Error::NotFound);
    }
    let kind: Kind = kind.parse()?;
    match kind {
        Kind::Gauge => state.storage.get_gauge(&id).await.map(format_gauge),
        Kind::Counter => state
            .storage
            .get_counter(&id)
            .await
            .map(crate::storage::format_counter),
    }
}

/// `POST /update/{kind}/{id}/{value}` — plain-text path update.
pub async fn update_value_path(
    State(state): State<Arc<ServerState>>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> Result<String, Error> {
    if id.is_empty() {
        return Err(Error::NotFound);
    }
    let kind: Kind = kind.parse()?;
    match kind {
        Kind::Gauge => {
            let v: f64 = value
                .parse()
                .map_err(|_| Error::BadRequest(format!("bad gauge value: {value}")))?;
            state.storage.set_gauge(&id, v).await?;
            Ok(format_gauge(v))
        }
        Kind::Counter => {
            let d: i64 = value
                .parse()
                .map_err(|_| Error::BadRequest(format!("bad counter delta: {value}")))?;
            let total = state.storage.add_counter(&id, d).await?;
            Ok(crate::storage::format_counter(total))
        }
    }
}

/// `POST /value/` — JSON read by `{id, type}`.
pub async fn get_value_json(
    State(state): State<Arc<ServerState>>,
    Json(query): Json<Metric>,
) -> Result<Json<Metric>, Error> {
    if query.id.is_empty() {
        return Err(Error::BadRequest("empty id".into()));
    }
    let metric = match query.mtype {
        Kind::Gauge => Metric::gauge(query.id, state.storage.get_gauge(&query.id).await?),
        Kind::Counter => Metric::counter(query.id, state.storage.get_counter(&query.id).await?),
    };
    Ok(Json(metric))
}

/// `POST /update/` — JSON single-metric write; the response echoes the
/// post-write stored value (spec §4.8).
pub async fn update_value_json(
    State(state): State<Arc<ServerState>>,
    Json(metric): Json<Metric>,
) -> Result<Json<Metric>, Error> {
    metric.validate()?;
    let stored = apply_update(&state, &metric).await?;
    Ok(Json(stored))
}

/// `POST /updates/` — JSON batch write; the whole batch runs inside one
/// storage transaction and fails atomically (spec §4.8).
pub async fn update_batch_json(
    State(state): State<Arc<ServerState>>,
    Json(metrics): Json<Vec<Metric>>,
) -> Result<Json<Vec<Metric>>, Error> {
    for metric in &metrics {
        metric.validate()?;
    }

    state.storage.start_transaction().await?;
    let mut stored = Vec::with_capacity(metrics.len());
    for metric in &metrics {
        match apply_update(&state, metric).await {
            Ok(m) => stored.push(m),
            Err(e) => {
                if let Err(rollback_err) = state.storage.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback after failed batch item also failed");
                }
                return Err(e);
            }
        }
    }
    state.storage.commit().await?;
    Ok(Json(stored))
}

async fn apply_update(state: &ServerState, metric: &Metric) -> Result<Metric, Error> {
    match metric.mtype {
        Kind::Gauge => {
            let value = metric.value.ok_or_else(|| Error::BadRequest("gauge missing value".into()))?;
            state.storage.set_gauge(&metric.id, value).await?;
            Ok(Metric::gauge(metric.id.clone(), value))
        }
        Kind::Counter => {
            let delta = metric
                .delta
                .ok_or_else(|| Error::BadRequest("counter missing delta".into()))?;
            let total = state.storage.add_counter(&metric.id, delta).await?;
            Ok(Metric::counter(metric.id.clone(), total))
        }
    }
}

/// `/update/*rest` catch-all: `404` if the path shape is wrong (too few
/// or too many segments), `400` if the kind segment is present but
/// unknown (spec §4.7).
pub async fn update_catch_all(Path(rest): Path<String>) -> Error {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [kind, _id] | [kind, _id, _value] => {
            if kind.parse::<Kind>().is_ok() {
                Error::NotFound
            } else {
                Error::BadRequest(format!("unknown metric type: {kind}"))
            }
        }
        _ => Error::NotFound,
    }
}

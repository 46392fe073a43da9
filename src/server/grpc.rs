//! gRPC service (spec §4.7): `GetMetric`, `UpdateMetric`,
//! `BatchUpdateMetrics` with identical semantics to their JSON
//! counterparts, sharing the same storage instance.

use super::ServerState;
use crate::error::Error;
use crate::model::{Kind, Metric};
use crate::wire_pb::pb::metrics_service_server::MetricsService;
use crate::wire_pb::pb::{
    BatchUpdateMetricsRequest, BatchUpdateMetricsResponse, GetMetricRequest, UpdateMetricRequest,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct GrpcMetricsService {
    state: Arc<ServerState>,
}

impl GrpcMetricsService {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound => Status::not_found(e.to_string()),
            Error::BadRequest(_) => Status::invalid_argument(e.to_string()),
            Error::MethodNotAllowed => Status::unimplemented(e.to_string()),
            Error::BadSignature => Status::invalid_argument(e.to_string()),
            Error::Forbidden(_) => Status::permission_denied(e.to_string()),
            _ => Status::internal(e.to_string()),
        }
    }
}

async fn apply_update(state: &ServerState, metric: &Metric) -> Result<Metric, Error> {
    match metric.mtype {
        Kind::Gauge => {
            let value = metric
                .value
                .ok_or_else(|| Error::BadRequest("gauge missing value".into()))?;
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

#[tonic::async_trait]
impl MetricsService for GrpcMetricsService {
    async fn get_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<crate::wire_pb::pb::Metric>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(Error::BadRequest("empty id".into()).into());
        }
        let kind: Kind = req.r#type.parse()?;
        let metric = match kind {
            Kind::Gauge => Metric::gauge(req.id.clone(), self.state.storage.get_gauge(&req.id).await?),
            Kind::Counter => {
                Metric::counter(req.id.clone(), self.state.storage.get_counter(&req.id).await?)
            }
        };
        Ok(Response::new((&metric).into()))
    }

    async fn update_metric(
        &self,
        request: Request<UpdateMetricRequest>,
    ) -> Result<Response<crate::wire_pb::pb::Metric>, Status> {
        // spec §9 design note 3: guard both `value` and `delta` rather
        // than unconditionally dereferencing one of them.
        let pb_metric = request
            .into_inner()
            .metric
            .ok_or_else(|| Error::BadRequest("missing metric".into()))?;
        let metric: Metric = pb_metric.try_into()?;
        metric.validate()?;
        let stored = apply_update(&self.state, &metric).await?;
        Ok(Response::new((&stored).into()))
    }

    async fn batch_update_metrics(
        &self,
        request: Request<BatchUpdateMetricsRequest>,
    ) -> Result<Response<BatchUpdateMetricsResponse>, Status> {
        let metrics = request.into_inner().metrics;
        let mut parsed = Vec::with_capacity(metrics.len());
        for pb_metric in metrics {
            let metric: Metric = pb_metric.try_into()?;
            metric.validate()?;
            parsed.push(metric);
        }

        self.state.storage.start_transaction().await?;
        let mut stored = Vec::with_capacity(parsed.len());
        for metric in &parsed {
            match apply_update(&self.state, metric).await {
                Ok(m) => stored.push(m),
                Err(e) => {
                    let _ = self.state.storage.rollback().await;
                    return Err(e.into());
                }
            }
        }
        self.state.storage.commit().await?;

        Ok(Response::new(BatchUpdateMetricsResponse {
            metrics: stored.iter().map(Into::into).collect(),
        }))
    }
}

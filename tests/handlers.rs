//! Router-level integration tests over the concrete scenarios in spec
//! §8, exercised through the real axum `Router` via `tower::ServiceExt`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use metsys::server::{router, ServerState};
use metsys::storage::MemStorage;
use std::sync::Arc;
use tower::ServiceExt;

fn app(state: ServerState) -> axum::Router {
    router::build(Arc::new(state))
}

fn plain_state() -> ServerState {
    ServerState {
        storage: Arc::new(MemStorage::new()),
        signing_key: String::new(),
        private_key: None,
        trusted_subnet: None,
    }
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn scenario_1_gauge_path_update_and_read() {
    let app = app(plain_state());

    let update = Request::builder()
        .method("POST")
        .uri("/update/gauge/memory/12.34")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(update).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let read = Request::builder()
        .uri("/value/gauge/memory")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(read).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "12.34");
}

#[tokio::test]
async fn scenario_2_counter_path_accumulates() {
    let app = app(plain_state());

    for value in ["123", "100"] {
        let req = Request::builder()
            .method("POST")
            .uri(format!("/update/counter/cp/{value}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let read = Request::builder()
        .uri("/value/counter/cp")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(read).await.unwrap();
    assert_eq!(body_text(response).await, "223");
}

#[tokio::test]
async fn scenario_3_json_update_echoes_post_accumulation_total() {
    let app = app(plain_state());

    for value in ["123", "100"] {
        let req = Request::builder()
            .method("POST")
            .uri(format!("/update/counter/cp/{value}"))
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(req).await.unwrap();
    }

    let json = Request::builder()
        .method("POST")
        .uri("/update/")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"id":"cp","type":"counter","delta":100}"#))
        .unwrap();
    let response = app.oneshot(json).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("\"delta\":323"));
}

#[tokio::test]
async fn scenario_4_wrong_method_is_405() {
    let app = app(plain_state());
    let req = Request::builder()
        .method("GET")
        .uri("/update/gauge/x/1.0")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn scenario_5_unknown_kind_is_400() {
    let app = app(plain_state());
    let req = Request::builder()
        .method("POST")
        .uri("/update/unknownKind/x/1.0")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scenario_6_empty_id_on_path_is_404() {
    let app = app(plain_state());
    let req = Request::builder()
        .method("POST")
        .uri("/update/gauge/memory/")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scenario_7_batch_write_then_individual_reads() {
    let app = app(plain_state());
    let batch = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"[{"id":"a","type":"gauge","value":1.0},{"id":"b","type":"counter","delta":5}]"#,
        ))
        .unwrap();
    let response = app.clone().oneshot(batch).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let read_a = Request::builder()
        .uri("/value/gauge/a")
        .body(Body::empty())
        .unwrap();
    assert_eq!(body_text(app.clone().oneshot(read_a).await.unwrap()).await, "1");

    let read_b = Request::builder()
        .uri("/value/counter/b")
        .body(Body::empty())
        .unwrap();
    assert_eq!(body_text(app.oneshot(read_b).await.unwrap()).await, "5");
}

#[tokio::test]
async fn scenario_8_hmac_signed_body_accepted_wrong_hash_rejected() {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let state = ServerState {
        signing_key: "K".into(),
        ..plain_state()
    };
    let app = app(state);
    let body = br#"{"id":"m","type":"gauge","value":1.0}"#;
    let mut mac = Hmac::<Sha256>::new_from_slice(b"K").unwrap();
    mac.update(body);
    let signature = hex::encode(mac.finalize().into_bytes());

    let good = Request::builder()
        .method("POST")
        .uri("/update/")
        .header("content-type", "application/json")
        .header("HashSHA256", signature)
        .body(Body::from(body.to_vec()))
        .unwrap();
    assert_eq!(app.clone().oneshot(good).await.unwrap().status(), StatusCode::OK);

    let bad = Request::builder()
        .method("POST")
        .uri("/update/")
        .header("content-type", "application/json")
        .header("HashSHA256", "deadbeef")
        .body(Body::from(body.to_vec()))
        .unwrap();
    assert_eq!(app.oneshot(bad).await.unwrap().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scenario_9_trusted_subnet_gate() {
    let state = ServerState {
        trusted_subnet: Some("10.0.0.0/8".parse().unwrap()),
        ..plain_state()
    };
    let app = app(state);

    let allowed = Request::builder()
        .uri("/ping")
        .header("X-Real-IP", "10.1.2.3")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(allowed).await.unwrap().status(), StatusCode::OK);

    let denied = Request::builder()
        .uri("/ping")
        .header("X-Real-IP", "192.168.1.1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(denied).await.unwrap().status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn scenario_10_gzipped_and_hmac_signed_body_is_decompressed_before_verification() {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::io::Write;

    let state = ServerState {
        signing_key: "K".into(),
        ..plain_state()
    };
    let app = app(state);
    let body = br#"{"id":"m","type":"gauge","value":1.0}"#;

    let mut mac = Hmac::<Sha256>::new_from_slice(b"K").unwrap();
    mac.update(body);
    let signature = hex::encode(mac.finalize().into_bytes());

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(body).unwrap();
    let gzipped = encoder.finish().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/update/")
        .header("content-type", "application/json")
        .header("content-encoding", "gzip")
        .header("HashSHA256", signature)
        .body(Body::from(gzipped))
        .unwrap();
    assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::OK);
}

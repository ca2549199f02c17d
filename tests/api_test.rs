//! Integration tests for the local HTTP API, served by a real controller
//! loop over fake navigation.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use reposter_lib::api::{app, ApiState};
use reposter_lib::controller::Controller;
use reposter_lib::history::TransitionLog;
use reposter_lib::job::{JobEvent, JobStatus, ListingData};
use reposter_lib::runtime::{controller_channel, ControllerLoop};
use reposter_lib::state::AppState;
use reposter_lib::store::JobStore;
use std::sync::Arc;
use tower::ServiceExt;

fn make_state() -> ApiState {
    let config = Arc::new(test_config());
    let history = TransitionLog::new();
    let (handle, inbox) = controller_channel(&config);
    let controller = Controller::new(
        config.clone(),
        JobStore::in_memory(),
        FakeNavigator::new(),
        Arc::new(FakeFetcher::default()),
        history.clone(),
        page_id(),
    );
    tokio::spawn(ControllerLoop::new(controller, inbox, None).run());
    Arc::new(AppState::new(config, handle, history))
}

fn make_app_no_auth() -> axum::Router {
    app(make_state(), None)
}

fn repost(url: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/repost")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&serde_json::json!({ "url": url })).unwrap(),
        ))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete_job() -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri("/api/job")
        .body(Body::empty())
        .unwrap()
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_api_health() {
    let app = make_app_no_auth();
    let res = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_repost_accepted_then_conflict() {
    let app = make_app_no_auth();

    let res = app.clone().oneshot(repost(SOURCE_URL)).await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body = json(res).await;
    assert_eq!(body["accepted"], true);
    assert_eq!(body["status"], "SCRAPING");

    let res = app
        .clone()
        .oneshot(repost("https://www.marktplaats.nl/seller/view/m999"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app.oneshot(get("/api/job")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job = json(res).await;
    assert_eq!(job["source_url"], SOURCE_URL);
    assert_eq!(job["status"], "SCRAPING");
}

#[tokio::test]
async fn test_repost_rejects_bad_url() {
    let app = make_app_no_auth();
    let res = app.clone().oneshot(repost("ftp://example.com/x")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.oneshot(get("/api/job")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_not_found_without_job() {
    let app = make_app_no_auth();
    let res = app.clone().oneshot(get("/api/job")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app.oneshot(delete_job()).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clear_job_works_from_error() {
    let state = make_state();
    let app = app(state.clone(), None);

    let res = app.clone().oneshot(repost(SOURCE_URL)).await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    // Nothing readable on the page sends the job to ERROR
    let ack = state
        .controller
        .request(JobEvent::DataExtracted {
            page: page_id(),
            listing: ListingData::default(),
        })
        .await
        .unwrap();
    assert!(ack.is_accepted());
    let job = json(app.clone().oneshot(get("/api/job")).await.unwrap()).await;
    assert_eq!(job["status"], "ERROR");

    let res = app.clone().oneshot(delete_job()).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = app.oneshot(get("/api/job")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_lists_transitions() {
    let app = make_app_no_auth();
    app.clone().oneshot(repost(SOURCE_URL)).await.unwrap();
    app.clone().oneshot(repost(SOURCE_URL)).await.unwrap();

    let res = app.clone().oneshot(get("/api/history")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let entries = json(res).await;
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["accepted"], false);
    assert_eq!(entries[1]["trigger"], "start");
    assert_eq!(entries[1]["to"], JobStatus::Scraping.as_str());

    let res = app.oneshot(get("/api/history?limit=1")).await.unwrap();
    assert_eq!(json(res).await.as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// API key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_api_key_required() {
    let app = app(make_state(), Some("secret".to_string()));

    let res = app.clone().oneshot(get("/api/job")).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/job")
        .header("X-API-Key", "wrong")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/job")
        .header("X-API-Key", "secret")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::NOT_FOUND);

    // Health stays open for probes
    let res = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

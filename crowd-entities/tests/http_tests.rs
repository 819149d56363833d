//! HTTP routing integration tests
//!
//! Drives the router with `oneshot` requests against a temporary database.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use crowd_entities::build_router;
use crowd_entities::models::MemberOrganization;
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Poll GET /merges/:id until the action leaves in-progress
async fn wait_for_merge(app: &Router, id: &str) -> Value {
    for _ in 0..100 {
        let (status, body) = send(app, get(&format!("/merges/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] != "in-progress" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("merge {} did not finish", id);
}

#[tokio::test]
async fn test_health_reports_module_and_database() {
    let env = test_env().await;
    let app = build_router(env.state.clone());

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "crowd-entities");
    assert_eq!(body["database"], true);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_affiliation_get_and_replace() {
    // Given: a member with an open-ended role at Work
    let env = test_env().await;
    let app = build_router(env.state.clone());
    let a = seed_member(&env.pool, "A", &["a"]).await;
    let work = seed_organization(&env.pool, "Work", None).await;
    let pinned = seed_organization(&env.pool, "Pinned", None).await;
    seed_role(&env.pool, &MemberOrganization::new(&a.id, &work.id).with_dates(Some(day(2020, 1, 1)), None)).await;
    let activity = seed_activity(&env.pool, &a, "a", "S1", day(2022, 2, 1), Some(&work.id)).await;

    // When: GET affiliation
    let (status, body) = send(
        &app,
        get(&format!(
            "/members/{}/affiliation?segmentId=S1&timestamp=2022-02-01T00:00:00Z",
            a.id
        )),
    )
    .await;

    // Then
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["memberId"], a.id.as_str());
    assert_eq!(body["organizationId"], work.id.as_str());

    // When: pin S1 to Pinned
    let mut events = env.event_bus.subscribe();
    let (status, body) = send(
        &app,
        with_json(
            "PUT",
            &format!("/members/{}/affiliations", a.id),
            json!({
                "affiliations": [
                    { "segmentId": "S1", "organizationId": pinned.id, "dateStart": "2021-01-01T00:00:00Z" }
                ]
            }),
        ),
    )
    .await;

    // Then: stored, activity restamped, change announced
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["overrides"], 1);
    assert_eq!(body["activitiesUpdated"], 1);
    assert_eq!(activity_owner(&env.pool, &activity.id).await.1, Some(pinned.id.clone()));
    assert!(events.try_recv().is_ok(), "member change should be published");

    let (_, body) = send(
        &app,
        get(&format!(
            "/members/{}/affiliation?segmentId=S1&timestamp=2022-02-01T00:00:00Z",
            a.id
        )),
    )
    .await;
    assert_eq!(body["organizationId"], pinned.id.as_str());
}

#[tokio::test]
async fn test_replace_affiliations_rejects_bad_input() {
    let env = test_env().await;
    let app = build_router(env.state.clone());
    let a = seed_member(&env.pool, "A", &[]).await;

    let (status, body) = send(
        &app,
        with_json(
            "PUT",
            &format!("/members/{}/affiliations", a.id),
            json!({
                "affiliations": [{
                    "segmentId": "S1",
                    "dateStart": "2024-01-01T00:00:00Z",
                    "dateEnd": "2023-01-01T00:00:00Z"
                }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].is_string());

    let (status, _) = send(
        &app,
        with_json("PUT", "/members/ghost/affiliations", json!({ "affiliations": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_merge_runs_in_background_and_unmerges() {
    // Given: two members with one activity each
    let env = test_env().await;
    let app = build_router(env.state.clone());
    let a = seed_member(&env.pool, "A", &["a"]).await;
    let b = seed_member(&env.pool, "B", &["b"]).await;
    let b_activity = seed_activity(&env.pool, &b, "b", "S1", day(2023, 1, 1), None).await;

    // When: POST /merges
    let (status, body) = send(
        &app,
        with_json(
            "POST",
            "/merges",
            json!({ "type": "member", "primaryId": a.id, "secondaryId": b.id, "actionBy": "admin" }),
        ),
    )
    .await;

    // Then: accepted, and the background task finishes
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["mergeActionId"].as_str().unwrap().to_string();
    let finished = wait_for_merge(&app, &id).await;
    assert_eq!(finished["state"], "done");
    assert_eq!(finished["step"], "done");
    assert_eq!(finished["type"], "member");
    assert_eq!(activity_owner(&env.pool, &b_activity.id).await.0, a.id);

    // When: POST /unmerges
    let (status, body) = send(
        &app,
        with_json("POST", "/unmerges", json!({ "primaryId": a.id, "secondaryId": b.id })),
    )
    .await;

    // Then
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mergeActionId"], id.as_str());
    assert_eq!(activity_owner(&env.pool, &b_activity.id).await.0, b.id);

    let (_, status_body) = send(&app, get(&format!("/merges/{}", id))).await;
    assert_eq!(status_body["state"], "unmerged");

    // A second unmerge conflicts
    let (status, body) = send(
        &app,
        with_json("POST", "/unmerges", json!({ "primaryId": a.id, "secondaryId": b.id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_merge_request_errors() {
    let env = test_env().await;
    let app = build_router(env.state.clone());
    let a = seed_member(&env.pool, "A", &[]).await;

    let (status, _) = send(&app, get("/merges/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        with_json("POST", "/merges", json!({ "type": "member", "primaryId": a.id, "secondaryId": a.id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        with_json("POST", "/merges", json!({ "type": "member", "primaryId": a.id, "secondaryId": "ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        with_json("POST", "/unmerges", json!({ "primaryId": a.id, "secondaryId": "ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

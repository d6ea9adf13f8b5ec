//! Handler tests over the in-memory store.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{App, test as actix_test};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;
use crate::domain::{ProductCatalogueService, USER_CREATED_EVENT, UserRegistrationService};
use crate::inbound::http::api_v1;
use crate::middleware::Trace;
use crate::outbound::memory::InMemoryStore;
use crate::test_support::doubles::StubPasswordHasher;
use crate::test_support::workers::{MutableClock, fixed_now};

#[fixture]
fn store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

fn state(store: &Arc<InMemoryStore>) -> web::Data<HttpState> {
    let clock = Arc::new(MutableClock::new(fixed_now()));
    let registration =
        UserRegistrationService::new(store.clone(), Arc::new(StubPasswordHasher), clock.clone());
    let catalogue = ProductCatalogueService::new(store.clone(), clock);
    web::Data::new(HttpState::new(
        Arc::new(registration),
        Arc::new(catalogue),
        store.clone(),
    ))
}

fn alice() -> Value {
    json!({
        "username": "alice",
        "email": "alice@x.com",
        "telephone": "555-0100",
        "password": "Abcdef1!",
        "confirmPassword": "Abcdef1!"
    })
}

async fn post_user(store: &Arc<InMemoryStore>, body: Value) -> (StatusCode, Value) {
    let app =
        actix_test::init_service(App::new().app_data(state(store)).wrap(Trace).service(api_v1())).await;
    let req = actix_test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(body)
        .to_request();
    let res = actix_test::call_service(&app, req).await;
    let status = res.status();
    (status, actix_test::read_body_json(res).await)
}

#[rstest]
#[actix_web::test]
async fn creates_user_and_outbox_entry(store: Arc<InMemoryStore>) {
    let (status, body) = post_user(&store, alice()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "alice@x.com");
    assert_eq!(body["telephone"], "555-0100");
    assert_eq!(body["role"], "ROLE_USER");
    assert!(body.get("password").is_none());
    assert!(body.get("passwordHash").is_none());

    let entries = store.outbox_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, USER_CREATED_EVENT);
    assert_eq!(entries[0].payload["email"], "alice@x.com");
    assert_eq!(body["id"], entries[0].aggregate_id.to_string());
}

#[rstest]
#[actix_web::test]
async fn rejects_invalid_form_with_every_message(store: Arc<InMemoryStore>) {
    let body = json!({
        "username": "",
        "email": "bad-email",
        "password": "short",
        "confirmPassword": "other"
    });
    let (status, body) = post_user(&store, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
    let messages = body["details"]["messages"]
        .as_array()
        .expect("messages array");
    assert!(messages.contains(&json!("Username is required")));
    assert!(messages.contains(&json!("Email format is invalid")));
    assert!(messages.contains(&json!("Password and Confirm Password do not match")));
    assert!(body["details"]["violations"][0]["field"].is_string());
    assert!(body["traceId"].is_string());
    assert_eq!(store.user_count(), 0);
    assert!(store.outbox_entries().is_empty());
}

#[rstest]
#[actix_web::test]
async fn duplicate_email_is_rejected_without_a_second_event(store: Arc<InMemoryStore>) {
    let (first, _) = post_user(&store, alice()).await;
    assert_eq!(first, StatusCode::OK);

    let mut again = alice();
    again["username"] = json!("alice2");
    again["email"] = json!("ALICE@x.com");
    let (status, body) = post_user(&store, again).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["details"]["messages"],
        json!(["Email is already in use"])
    );
    assert_eq!(store.user_count(), 1);
    assert_eq!(store.outbox_entries().len(), 1);
}

#[rstest]
#[actix_web::test]
async fn missing_fields_are_validation_errors(store: Arc<InMemoryStore>) {
    let (status, body) = post_user(&store, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
    assert!(body["details"]["messages"].as_array().is_some());
}

#[rstest]
#[actix_web::test]
async fn lists_registered_users(store: Arc<InMemoryStore>) {
    post_user(&store, alice()).await;

    let app =
        actix_test::init_service(App::new().app_data(state(&store)).service(api_v1())).await;
    let req = actix_test::TestRequest::get().uri("/api/v1/users").to_request();
    let users: Vec<UserResponse> = actix_test::call_and_read_body_json(&app, req).await;

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].username, "alice");
    assert_eq!(users[0].telephone.as_deref(), Some("555-0100"));
}

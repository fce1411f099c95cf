use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Datelike, Duration, Utc, Weekday};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::services::resolver::AvailabilityResolver;
use booking_cell::handlers::BookingState;
use booking_cell::router::booking_routes;
use booking_cell::services::transaction::BookingTransactionService;
use booking_cell::services::wizard::{DiscardOnExit, WizardService};
use lifecycle_cell::services::effects::EffectDispatcher;
use lifecycle_cell::services::policy::CancellationPolicyService;
use lifecycle_cell::services::transitions::LifecycleService;
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_utils::test_utils::{JwtTestUtils, MockStoreResponses, TestConfig, TestUser};

fn test_config(mock_server: &MockServer) -> AppConfig {
    let base = TestConfig::default();
    AppConfig {
        supabase_url: mock_server.uri(),
        supabase_anon_key: base.supabase_anon_key,
        supabase_jwt_secret: base.jwt_secret,
        default_cancellation_window_hours: 24,
    }
}

fn create_test_app(config: AppConfig) -> Router {
    let config = Arc::new(config);
    let supabase = Arc::new(SupabaseClient::new(&config));
    let resolver = Arc::new(AvailabilityResolver::new(supabase.clone()));
    let policy = CancellationPolicyService::new(supabase.clone(), &config);
    let effects = EffectDispatcher::spawn(supabase.clone());
    let lifecycle = Arc::new(LifecycleService::new(supabase.clone(), policy, effects));
    let wizard = Arc::new(WizardService::new(Arc::new(DiscardOnExit)));
    let transaction = Arc::new(BookingTransactionService::new(
        supabase,
        resolver,
        lifecycle,
        wizard.clone(),
    ));

    booking_routes(Arc::new(BookingState { config, wizard, transaction }))
}

fn future_date() -> (chrono::NaiveDate, i32) {
    let date = Utc::now().date_naive() + Duration::days(7);
    let day_of_week = match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    };
    (date, day_of_week)
}

fn authed_request(uri: &str, http_method: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(http_method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json");

    match body {
        Some(b) => builder.body(Body::from(b.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Walks a fresh session to the confirmation step and returns its id.
async fn filled_session(
    app: &Router,
    token: &str,
    clinic_id: Uuid,
    doctor_id: Uuid,
    service_id: Uuid,
    date: chrono::NaiveDate,
    time: &str,
) -> Uuid {
    let response = app
        .clone()
        .oneshot(authed_request("/wizard", "POST", token, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id: Uuid = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let response = app
        .clone()
        .oneshot(authed_request(
            &format!("/wizard/{}", session_id),
            "PATCH",
            token,
            Some(json!({
                "clinic_id": clinic_id,
                "service_ids": [service_id],
                "doctor_id": doctor_id,
                "date": date,
                "time": time,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for _ in 0..4 {
        let response = app
            .clone()
            .oneshot(authed_request(
                &format!("/wizard/{}/advance", session_id),
                "POST",
                token,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    session_id
}

async fn mount_booking_mocks(mock_server: &MockServer, doctor_id: Uuid, service_id: Uuid, day_of_week: i32) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/dental_services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::service_response(&service_id.to_string(), "Cleaning", 30)
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::schedule_response(&doctor_id.to_string(), day_of_week)
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;

    // Side-effect endpoints hit by the dispatcher after a booking lands
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinic_staff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .mount(mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/notify-email"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sent": true})))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn full_wizard_flow_books_an_appointment() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);

    let clinic_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let patient = TestUser::patient("pat@example.com");
    let (date, day_of_week) = future_date();

    mount_booking_mocks(&mock_server, doctor_id, service_id, day_of_week).await;

    let created = MockStoreResponses::appointment_response(
        &Uuid::new_v4().to_string(),
        &clinic_id.to_string(),
        &doctor_id.to_string(),
        &patient.id,
        &date.to_string(),
        "09:30:00",
        30,
        "pending",
    );
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([created])))
        .mount(&mock_server)
        .await;

    let token = JwtTestUtils::create_test_token(&patient, &config.supabase_jwt_secret, None);
    let app = create_test_app(config);

    let session_id = filled_session(
        &app, &token, clinic_id, doctor_id, service_id, date, "09:30:00",
    )
    .await;

    let response = app
        .clone()
        .oneshot(authed_request(
            &format!("/wizard/{}/submit", session_id),
            "POST",
            &token,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["appointment"]["status"], json!("pending"));

    // The spent session is gone
    let response = app
        .oneshot(authed_request(
            &format!("/wizard/{}", session_id),
            "GET",
            &token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}

#[tokio::test]
async fn losing_the_slot_race_returns_conflict_and_reopens_slot_step() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);

    let clinic_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let patient = TestUser::patient("pat@example.com");
    let (date, day_of_week) = future_date();

    mount_booking_mocks(&mock_server, doctor_id, service_id, day_of_week).await;

    // The exclusion constraint fires on insert
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate slot"))
        .mount(&mock_server)
        .await;

    let token = JwtTestUtils::create_test_token(&patient, &config.supabase_jwt_secret, None);
    let app = create_test_app(config);

    let session_id = filled_session(
        &app, &token, clinic_id, doctor_id, service_id, date, "09:30:00",
    )
    .await;

    let response = app
        .clone()
        .oneshot(authed_request(
            &format!("/wizard/{}/submit", session_id),
            "POST",
            &token,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The session survives, back at the slot picker with the slot cleared
    let response = app
        .oneshot(authed_request(
            &format!("/wizard/{}", session_id),
            "GET",
            &token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["step"], json!("date_time"));
    assert_eq!(body["draft"]["time"], json!(null));
}

#[tokio::test]
async fn stale_slot_is_caught_before_insert() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);

    let clinic_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let patient = TestUser::patient("pat@example.com");
    let (date, day_of_week) = future_date();

    Mock::given(method("GET"))
        .and(path("/rest/v1/dental_services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::service_response(&service_id.to_string(), "Cleaning", 30)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::schedule_response(&doctor_id.to_string(), day_of_week)
        ])))
        .mount(&mock_server)
        .await;

    // Someone already holds 09:30 when the re-resolve runs
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "date": date, "time": "09:30:00", "duration_minutes": 30 }
        ])))
        .mount(&mock_server)
        .await;

    let token = JwtTestUtils::create_test_token(&patient, &config.supabase_jwt_secret, None);
    let app = create_test_app(config);

    let session_id = filled_session(
        &app, &token, clinic_id, doctor_id, service_id, date, "09:30:00",
    )
    .await;

    let response = app
        .oneshot(authed_request(
            &format!("/wizard/{}/submit", session_id),
            "POST",
            &token,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn submit_with_incomplete_draft_is_rejected() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);

    let patient = TestUser::patient("pat@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.supabase_jwt_secret, None);
    let app = create_test_app(config);

    let response = app
        .clone()
        .oneshot(authed_request("/wizard", "POST", &token, None))
        .await
        .unwrap();
    let session_id: Uuid = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let response = app
        .oneshot(authed_request(
            &format!("/wizard/{}/submit", session_id),
            "POST",
            &token,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

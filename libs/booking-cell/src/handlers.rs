// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{BookingError, NavOutcome, SelectionUpdate};
use crate::services::transaction::BookingTransactionService;
use crate::services::wizard::WizardService;

pub struct BookingState {
    pub config: Arc<AppConfig>,
    pub wizard: Arc<WizardService>,
    pub transaction: Arc<BookingTransactionService>,
}

fn map_booking_error(err: BookingError) -> AppError {
    match err {
        BookingError::SessionNotFound => AppError::NotFound(err.to_string()),
        BookingError::NotYourSession => AppError::Policy(err.to_string()),
        BookingError::StepIncomplete(msg) | BookingError::ValidationError(msg) => {
            AppError::Validation(msg)
        }
        BookingError::SubmissionInFlight
        | BookingError::SlotTaken
        | BookingError::SlotNoLongerAvailable => AppError::Conflict(err.to_string()),
        BookingError::Unavailable(msg) => AppError::Transient(msg),
        BookingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn patient_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Invalid user id".to_string()))
}

pub async fn start_wizard(
    State(state): State<Arc<BookingState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let view = state.wizard.create(patient_id).await;
    Ok(Json(json!(view)))
}

pub async fn get_wizard(
    State(state): State<Arc<BookingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let view = state
        .wizard
        .view(session_id, patient_id)
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!(view)))
}

pub async fn update_selection(
    State(state): State<Arc<BookingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
    Json(update): Json<SelectionUpdate>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let view = state
        .wizard
        .update_selection(session_id, patient_id, update)
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!(view)))
}

pub async fn advance_wizard(
    State(state): State<Arc<BookingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let view = state
        .wizard
        .advance(session_id, patient_id)
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!(view)))
}

pub async fn back_wizard(
    State(state): State<Arc<BookingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let (outcome, view) = state
        .wizard
        .back(session_id, patient_id)
        .await
        .map_err(map_booking_error)?;

    match outcome {
        NavOutcome::MovedTo(_) => Ok(Json(json!(view))),
        NavOutcome::ExitFlow => Ok(Json(json!({ "exited": true }))),
    }
}

/// In-flow step back. Never exits: retreating at the first step stays put.
pub async fn retreat_wizard(
    State(state): State<Arc<BookingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let view = state
        .wizard
        .retreat(session_id, patient_id)
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!(view)))
}

pub async fn reset_wizard(
    State(state): State<Arc<BookingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let view = state
        .wizard
        .reset(session_id, patient_id)
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!(view)))
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub session_id: Uuid,
}

/// Top-level booking submission, taking the wizard session to commit.
pub async fn create_booking(
    State(state): State<Arc<BookingState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let appointment = state
        .transaction
        .submit(request.session_id, patient_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment_id": appointment.id,
        "appointment": appointment,
    })))
}

pub async fn submit_booking(
    State(state): State<Arc<BookingState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient_id = patient_id(&user)?;
    let appointment = state
        .transaction
        .submit(session_id, patient_id, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

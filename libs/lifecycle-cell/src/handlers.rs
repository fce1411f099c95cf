// libs/lifecycle-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Actor, AppointmentListQuery, ApproveRequest, CancelRequest, CompleteRequest, LifecycleError,
    NoShowRequest, RejectRequest, TransitionAction,
};
use crate::services::transitions::LifecycleService;

/// Shared state for the lifecycle routes. The service is long-lived because
/// it owns the side-effect dispatcher task.
pub struct LifecycleState {
    pub config: Arc<AppConfig>,
    pub service: Arc<LifecycleService>,
}

fn map_lifecycle_error(err: LifecycleError) -> AppError {
    match err {
        LifecycleError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        LifecycleError::InvalidTransition { .. } | LifecycleError::AlreadyTransitioned => {
            AppError::Conflict(err.to_string())
        }
        LifecycleError::NotPermitted(msg) => AppError::Policy(msg),
        LifecycleError::ReasonRequired => AppError::Validation(err.to_string()),
        LifecycleError::WindowExpired { .. } => AppError::Policy(err.to_string()),
        LifecycleError::Unavailable(msg) => AppError::Transient(msg),
        LifecycleError::DatabaseError(msg) => AppError::Database(msg),
    }
}

pub async fn list_appointments(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let response = state
        .service
        .list_appointments(&actor, &query, auth.token())
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(response)))
}

pub async fn get_appointment(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let appointment = state
        .service
        .get_appointment(appointment_id, &actor, auth.token())
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(appointment)))
}

pub async fn check_can_cancel(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let check = state
        .service
        .check_cancellable(appointment_id, &actor, auth.token())
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(check)))
}

pub async fn approve_appointment(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let outcome = state
        .service
        .apply(
            appointment_id,
            TransitionAction::Approve {
                staff_notes: request.staff_notes,
            },
            &actor,
            auth.token(),
        )
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(outcome)))
}

pub async fn reject_appointment(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let outcome = state
        .service
        .apply(
            appointment_id,
            TransitionAction::Reject {
                reason: request.reason,
                category: request.category,
                suggest_reschedule: request.suggest_reschedule.unwrap_or(false),
                alternative_dates: request.alternative_dates.unwrap_or_default(),
            },
            &actor,
            auth.token(),
        )
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(outcome)))
}

pub async fn complete_appointment(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let outcome = state
        .service
        .apply(
            appointment_id,
            TransitionAction::Complete {
                notes: request.notes,
                follow_up_required: request.follow_up_required.unwrap_or(false),
                treatment_plan_fields: request.treatment_plan_fields,
            },
            &actor,
            auth.token(),
        )
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(outcome)))
}

pub async fn mark_no_show(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<NoShowRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let outcome = state
        .service
        .apply(
            appointment_id,
            TransitionAction::MarkNoShow { notes: request.notes },
            &actor,
            auth.token(),
        )
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(outcome)))
}

pub async fn cancel_appointment(
    State(state): State<Arc<LifecycleState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user).map_err(map_lifecycle_error)?;

    let outcome = state
        .service
        .apply(
            appointment_id,
            TransitionAction::Cancel { reason: request.reason },
            &actor,
            auth.token(),
        )
        .await
        .map_err(map_lifecycle_error)?;

    Ok(Json(json!(outcome)))
}

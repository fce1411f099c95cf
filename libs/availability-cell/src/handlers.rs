// libs/availability-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::AvailabilityError;
use crate::services::resolver::AvailabilityResolver;

pub struct AvailabilityState {
    pub config: Arc<AppConfig>,
    pub resolver: Arc<AvailabilityResolver>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    /// Comma-separated service ids, e.g. `?service_ids=a,b`
    pub service_ids: String,
}

fn map_availability_error(err: AvailabilityError) -> AppError {
    match err {
        AvailabilityError::Validation(msg) => AppError::Validation(msg),
        AvailabilityError::Unavailable(msg) => AppError::Transient(msg),
        AvailabilityError::DatabaseError(msg) => AppError::Database(msg),
    }
}

pub async fn get_available_slots(
    State(state): State<Arc<AvailabilityState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let service_ids: Vec<Uuid> = query
        .service_ids
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| Uuid::parse_str(s.trim()))
        .collect::<Result<_, _>>()
        .map_err(|_| AppError::Validation("Invalid service id".to_string()))?;

    let response = state
        .resolver
        .resolve(query.doctor_id, query.date, &service_ids, auth.token())
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!(response)))
}

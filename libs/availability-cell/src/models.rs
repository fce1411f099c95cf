// libs/availability-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DentalService {
    pub id: Uuid,
    pub name: String,
    pub duration_minutes: i32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorSchedule {
    pub doctor_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday, matching the stored rows.
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_increment_minutes: i32,
}

/// Minimal view of a booked appointment; only what the resolver needs to
/// mark slots as taken.
#[derive(Debug, Clone, Deserialize)]
pub struct BookedAppointment {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
}

/// One entry in the resolved grid. Taken slots are reported as unavailable
/// rather than omitted so the grid shape stays stable across refreshes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilitySlot {
    pub time: NaiveTime,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityResponse {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub total_duration_minutes: i32,
    pub slots: Vec<AvailabilitySlot>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store could not be reached. Distinct from an empty grid: the
    /// caller may retry this, an empty grid is an answer.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for AvailabilityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AvailabilityError::Unavailable(msg),
            other => AvailabilityError::DatabaseError(other.to_string()),
        }
    }
}

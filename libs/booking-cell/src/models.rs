// libs/booking-cell/src/models.rs
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use availability_cell::models::AvailabilityError;
use shared_database::StoreError;

pub const MAX_SERVICES_PER_BOOKING: usize = availability_cell::services::resolver::MAX_SERVICES_PER_BOOKING;

// ==============================================================================
// WIZARD STATE
// ==============================================================================

/// The five booking steps, in order. Each step gates on its own selection
/// being present before the wizard moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Clinic,
    Services,
    Doctor,
    DateTime,
    Confirm,
}

impl WizardStep {
    pub fn next(self) -> Option<WizardStep> {
        match self {
            WizardStep::Clinic => Some(WizardStep::Services),
            WizardStep::Services => Some(WizardStep::Doctor),
            WizardStep::Doctor => Some(WizardStep::DateTime),
            WizardStep::DateTime => Some(WizardStep::Confirm),
            WizardStep::Confirm => None,
        }
    }

    pub fn prev(self) -> Option<WizardStep> {
        match self {
            WizardStep::Clinic => None,
            WizardStep::Services => Some(WizardStep::Clinic),
            WizardStep::Doctor => Some(WizardStep::Services),
            WizardStep::DateTime => Some(WizardStep::Doctor),
            WizardStep::Confirm => Some(WizardStep::DateTime),
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WizardStep::Clinic => "clinic",
            WizardStep::Services => "services",
            WizardStep::Doctor => "doctor",
            WizardStep::DateTime => "date_time",
            WizardStep::Confirm => "confirm",
        };
        write!(f, "{}", s)
    }
}

/// Selections accumulated across the wizard. Nothing here touches the store
/// until submission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingDraft {
    pub clinic_id: Option<Uuid>,
    pub service_ids: Vec<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub symptoms: Option<String>,
}

pub struct WizardSession {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub step: WizardStep,
    pub draft: BookingDraft,
    /// Set while a submission for this session is running.
    pub in_flight: AtomicBool,
    pub created_at: DateTime<Utc>,
}

impl WizardSession {
    pub fn new(patient_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            step: WizardStep::Clinic,
            draft: BookingDraft::default(),
            in_flight: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }
}

/// What the API returns for a session; the in-flight flag stays internal.
#[derive(Debug, Clone, Serialize)]
pub struct WizardSessionView {
    pub id: Uuid,
    pub step: WizardStep,
    pub draft: BookingDraft,
}

impl WizardSessionView {
    pub fn of(session: &WizardSession) -> Self {
        Self {
            id: session.id,
            step: session.step,
            draft: session.draft.clone(),
        }
    }
}

/// Partial update applied to the draft. Changing an upstream selection
/// invalidates everything picked after it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectionUpdate {
    pub clinic_id: Option<Uuid>,
    pub service_ids: Option<Vec<Uuid>>,
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub symptoms: Option<String>,
}

/// Where a back navigation landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    MovedTo(WizardStep),
    /// Back from the first step leaves the flow entirely.
    ExitFlow,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Booking session not found")]
    SessionNotFound,

    #[error("This booking session belongs to another patient")]
    NotYourSession,

    #[error("Step incomplete: {0}")]
    StepIncomplete(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("A submission for this booking is already running")]
    SubmissionInFlight,

    #[error("The selected slot was just taken")]
    SlotTaken,

    #[error("The selected slot is no longer available")]
    SlotNoLongerAvailable,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => BookingError::SlotTaken,
            StoreError::Unavailable(msg) => BookingError::Unavailable(msg),
            other => BookingError::DatabaseError(other.to_string()),
        }
    }
}

impl From<AvailabilityError> for BookingError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Validation(msg) => BookingError::ValidationError(msg),
            AvailabilityError::Unavailable(msg) => BookingError::Unavailable(msg),
            AvailabilityError::DatabaseError(msg) => BookingError::DatabaseError(msg),
        }
    }
}

// libs/lifecycle-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::auth::User;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub service_ids: Vec<Uuid>,
    pub symptoms: Option<String>,
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub rejection_category: Option<String>,
    pub completion_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.time).and_utc()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Active appointments occupy their slot for conflict purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

// ==============================================================================
// ACTOR IDENTITY
// ==============================================================================

/// Identity threaded explicitly through every lifecycle call. Never derived
/// from ambient state.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ActorRole,
    pub clinic_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Patient,
    Staff,
    Admin,
}

impl Actor {
    pub fn from_user(user: &User) -> Result<Self, LifecycleError> {
        let user_id = Uuid::parse_str(&user.id)
            .map_err(|_| LifecycleError::NotPermitted("Invalid user id".to_string()))?;

        let role = match user.role.as_deref() {
            Some("staff") => ActorRole::Staff,
            Some("admin") => ActorRole::Admin,
            _ => ActorRole::Patient,
        };

        let clinic_id = user
            .clinic_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok());

        Ok(Self { user_id, role, clinic_id })
    }
}

// ==============================================================================
// TRANSITION REQUESTS
// ==============================================================================

#[derive(Debug, Clone)]
pub enum TransitionAction {
    Approve {
        staff_notes: Option<String>,
    },
    Reject {
        reason: String,
        category: Option<String>,
        suggest_reschedule: bool,
        alternative_dates: Vec<NaiveDate>,
    },
    Complete {
        notes: Option<String>,
        follow_up_required: bool,
        treatment_plan_fields: Option<serde_json::Value>,
    },
    MarkNoShow {
        notes: Option<String>,
    },
    Cancel {
        reason: String,
    },
}

impl TransitionAction {
    pub fn target_status(&self) -> AppointmentStatus {
        match self {
            TransitionAction::Approve { .. } => AppointmentStatus::Confirmed,
            TransitionAction::Reject { .. } | TransitionAction::Cancel { .. } => {
                AppointmentStatus::Cancelled
            }
            TransitionAction::Complete { .. } => AppointmentStatus::Completed,
            TransitionAction::MarkNoShow { .. } => AppointmentStatus::NoShow,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TransitionAction::Approve { .. } => "approve",
            TransitionAction::Reject { .. } => "reject",
            TransitionAction::Complete { .. } => "complete",
            TransitionAction::MarkNoShow { .. } => "mark no-show",
            TransitionAction::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproveRequest {
    pub staff_notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
    pub category: Option<String>,
    pub suggest_reschedule: Option<bool>,
    pub alternative_dates: Option<Vec<NaiveDate>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    pub notes: Option<String>,
    pub follow_up_required: Option<bool>,
    pub treatment_plan_fields: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoShowRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub success: bool,
    pub message: String,
    pub appointment: Appointment,
}

// ==============================================================================
// LISTING
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentListQuery {
    pub status: Option<AppointmentStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentListResponse {
    pub appointments: Vec<Appointment>,
    pub total_count: i64,
    pub has_more: bool,
}

// ==============================================================================
// NOTIFICATIONS AND TREATMENT PLANS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub data: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A patient submitted a new booking; sent to clinic staff.
    AppointmentRequested,
    AppointmentConfirmed,
    AppointmentRejected,
    AppointmentCancelled,
    AppointmentCompleted,
    AppointmentNoShow,
    /// A cancelled/rejected appointment was a counted treatment-plan visit.
    TreatmentPlanImpact,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationType::AppointmentRequested => "appointment_requested",
            NotificationType::AppointmentConfirmed => "appointment_confirmed",
            NotificationType::AppointmentRejected => "appointment_rejected",
            NotificationType::AppointmentCancelled => "appointment_cancelled",
            NotificationType::AppointmentCompleted => "appointment_completed",
            NotificationType::AppointmentNoShow => "appointment_no_show",
            NotificationType::TreatmentPlanImpact => "treatment_plan_impact",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentPlanLink {
    pub appointment_id: Uuid,
    pub treatment_plan_id: Uuid,
    pub visit_number: i32,
    pub visit_purpose: String,
    pub completed: bool,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentPlanProgress {
    pub id: Uuid,
    pub visits_completed: i32,
    pub total_visits_planned: i32,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Cannot {action} an appointment in status {from}")]
    InvalidTransition { from: AppointmentStatus, action: String },

    #[error("Appointment was already updated by another actor")]
    AlreadyTransitioned,

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("A reason is required for this action")]
    ReasonRequired,

    #[error("Cancellation window of {hours} hours has passed")]
    WindowExpired { hours: i64 },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => LifecycleError::AlreadyTransitioned,
            StoreError::NotFound(_) => LifecycleError::NotFound,
            StoreError::Auth(msg) => LifecycleError::NotPermitted(msg),
            StoreError::Unavailable(msg) => LifecycleError::Unavailable(msg),
            other => LifecycleError::DatabaseError(other.to_string()),
        }
    }
}

// libs/realtime-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lifecycle_cell::models::Appointment;

/// Visibility scope for a subscription. Events fan out to every scope that
/// matches the mutated appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleScope {
    Patient(Uuid),
    Clinic(Uuid),
    Global,
}

/// One committed appointment mutation, as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationEvent {
    Insert {
        appointment: Appointment,
    },
    Update {
        appointment: Appointment,
    },
    /// Hard removal. Carries the row's scope references so patient- and
    /// clinic-scoped subscribers see the disappearance too.
    Delete {
        appointment_id: Uuid,
        clinic_id: Uuid,
        patient_id: Uuid,
    },
}

impl MutationEvent {
    pub fn appointment_id(&self) -> Uuid {
        match self {
            MutationEvent::Insert { appointment } | MutationEvent::Update { appointment } => {
                appointment.id
            }
            MutationEvent::Delete { appointment_id, .. } => *appointment_id,
        }
    }
}

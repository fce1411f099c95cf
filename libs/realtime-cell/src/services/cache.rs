// libs/realtime-cell/src/services/cache.rs
use std::collections::HashMap;

use uuid::Uuid;

use lifecycle_cell::models::Appointment;

use crate::models::MutationEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// The event carried an older `updated_at` than the held row, or was a
    /// duplicate delivery. Nothing changed.
    StaleIgnored,
    Removed,
}

/// Client-side view of appointments, reconciled from realtime events. The
/// `updated_at` gate makes the merge idempotent: replaying or reordering a
/// batch of events converges on the same state.
#[derive(Default)]
pub struct AppointmentCache {
    entries: HashMap<Uuid, Appointment>,
}

impl AppointmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, event: &MutationEvent) -> MergeOutcome {
        match event {
            MutationEvent::Insert { appointment } | MutationEvent::Update { appointment } => {
                match self.entries.get(&appointment.id) {
                    Some(held) if appointment.updated_at <= held.updated_at => {
                        MergeOutcome::StaleIgnored
                    }
                    _ => {
                        self.entries.insert(appointment.id, appointment.clone());
                        MergeOutcome::Applied
                    }
                }
            }
            MutationEvent::Delete { appointment_id, .. } => {
                if self.entries.remove(appointment_id).is_some() {
                    MergeOutcome::Removed
                } else {
                    MergeOutcome::StaleIgnored
                }
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&Appointment> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lifecycle_cell::models::AppointmentStatus;

    fn appointment(id: Uuid, minutes_ago: i64, status: AppointmentStatus) -> Appointment {
        Appointment {
            id,
            clinic_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            date: "2025-06-02".parse().unwrap(),
            time: "09:30:00".parse().unwrap(),
            duration_minutes: 30,
            service_ids: vec![Uuid::new_v4()],
            symptoms: None,
            status,
            cancellation_reason: None,
            rejection_reason: None,
            rejection_category: None,
            completion_notes: None,
            created_at: Utc::now() - Duration::hours(1),
            updated_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn newer_update_replaces_held_row() {
        let mut cache = AppointmentCache::new();
        let id = Uuid::new_v4();

        cache.merge(&MutationEvent::Insert {
            appointment: appointment(id, 10, AppointmentStatus::Pending),
        });

        let outcome = cache.merge(&MutationEvent::Update {
            appointment: appointment(id, 1, AppointmentStatus::Confirmed),
        });

        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(cache.get(&id).unwrap().status, AppointmentStatus::Confirmed);
    }

    #[test]
    fn out_of_order_delivery_keeps_newest() {
        let mut cache = AppointmentCache::new();
        let id = Uuid::new_v4();

        cache.merge(&MutationEvent::Update {
            appointment: appointment(id, 1, AppointmentStatus::Confirmed),
        });

        // The older insert arrives late
        let outcome = cache.merge(&MutationEvent::Insert {
            appointment: appointment(id, 10, AppointmentStatus::Pending),
        });

        assert_eq!(outcome, MergeOutcome::StaleIgnored);
        assert_eq!(cache.get(&id).unwrap().status, AppointmentStatus::Confirmed);
    }

    #[test]
    fn duplicate_delivery_is_a_no_op() {
        let mut cache = AppointmentCache::new();
        let id = Uuid::new_v4();
        let apt = appointment(id, 5, AppointmentStatus::Pending);

        assert_eq!(
            cache.merge(&MutationEvent::Insert { appointment: apt.clone() }),
            MergeOutcome::Applied
        );
        assert_eq!(
            cache.merge(&MutationEvent::Insert { appointment: apt }),
            MergeOutcome::StaleIgnored
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn delete_removes_and_tolerates_replay() {
        let mut cache = AppointmentCache::new();
        let id = Uuid::new_v4();

        let held = appointment(id, 5, AppointmentStatus::Pending);
        let delete = MutationEvent::Delete {
            appointment_id: id,
            clinic_id: held.clinic_id,
            patient_id: held.patient_id,
        };
        cache.merge(&MutationEvent::Insert { appointment: held });

        assert_eq!(cache.merge(&delete), MergeOutcome::Removed);
        assert_eq!(cache.merge(&delete), MergeOutcome::StaleIgnored);
        assert!(cache.is_empty());
    }
}

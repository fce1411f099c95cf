// libs/realtime-cell/src/services/sync.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use lifecycle_cell::models::Appointment;
use lifecycle_cell::services::transitions::{ChangeKind, MutationObserver};

use crate::models::{MutationEvent, RoleScope};

type EventSender = broadcast::Sender<MutationEvent>;

const CHANNEL_CAPACITY: usize = 256;

/// Per-scope broadcast registry. A mutation is published once and delivered
/// to the patient's scope, the clinic's scope and the global scope; each
/// subscriber sees only what its scope can see.
pub struct RealtimeSyncService {
    channels: Arc<RwLock<HashMap<RoleScope, EventSender>>>,
}

impl Default for RealtimeSyncService {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeSyncService {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe(&self, scope: RoleScope) -> SubscriptionHandle {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(scope)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);

        debug!("Subscription opened for {:?}", scope);
        SubscriptionHandle {
            scope,
            receiver: sender.subscribe(),
        }
    }

    pub async fn publish(&self, event: MutationEvent) {
        let scopes = match &event {
            MutationEvent::Insert { appointment } | MutationEvent::Update { appointment } => vec![
                RoleScope::Patient(appointment.patient_id),
                RoleScope::Clinic(appointment.clinic_id),
                RoleScope::Global,
            ],
            MutationEvent::Delete {
                clinic_id,
                patient_id,
                ..
            } => vec![
                RoleScope::Patient(*patient_id),
                RoleScope::Clinic(*clinic_id),
                RoleScope::Global,
            ],
        };

        let mut channels = self.channels.write().await;
        for scope in scopes {
            if let Some(sender) = channels.get(&scope) {
                // A send error just means every subscriber already left
                if sender.send(event.clone()).is_err() {
                    channels.remove(&scope);
                    debug!("Pruned empty channel for {:?}", scope);
                }
            }
        }
    }

    /// Number of live scope channels, for tests and introspection.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

/// Owns one scope's receiver. Dropping the handle ends the subscription;
/// the service prunes the scope channel once its last receiver is gone.
pub struct SubscriptionHandle {
    scope: RoleScope,
    receiver: broadcast::Receiver<MutationEvent>,
}

impl SubscriptionHandle {
    pub fn scope(&self) -> RoleScope {
        self.scope
    }

    /// Next event for this scope. Lagging subscribers skip ahead instead of
    /// failing; a closed channel yields None.
    pub async fn recv(&mut self) -> Option<MutationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber on {:?} lagged, skipped {} events",
                        self.scope, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Bridges committed lifecycle mutations into the broadcast registry.
pub struct RealtimePublisher {
    sync: Arc<RealtimeSyncService>,
}

impl RealtimePublisher {
    pub fn new(sync: Arc<RealtimeSyncService>) -> Self {
        Self { sync }
    }
}

impl MutationObserver for RealtimePublisher {
    fn appointment_changed(&self, appointment: &Appointment, change: ChangeKind) {
        let event = match change {
            ChangeKind::Created => MutationEvent::Insert {
                appointment: appointment.clone(),
            },
            ChangeKind::Updated => MutationEvent::Update {
                appointment: appointment.clone(),
            },
        };

        let sync = self.sync.clone();
        tokio::spawn(async move {
            sync.publish(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifecycle_cell::models::AppointmentStatus;
    use uuid::Uuid;

    fn appointment(patient_id: Uuid, clinic_id: Uuid) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            clinic_id,
            doctor_id: Uuid::new_v4(),
            patient_id,
            date: "2025-06-02".parse().unwrap(),
            time: "09:30:00".parse().unwrap(),
            duration_minutes: 30,
            service_ids: vec![Uuid::new_v4()],
            symptoms: None,
            status: AppointmentStatus::Pending,
            cancellation_reason: None,
            rejection_reason: None,
            rejection_category: None,
            completion_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_reaches_matching_scopes_only() {
        let sync = RealtimeSyncService::new();
        let patient_id = Uuid::new_v4();
        let clinic_id = Uuid::new_v4();

        let mut patient_sub = sync.subscribe(RoleScope::Patient(patient_id)).await;
        let mut clinic_sub = sync.subscribe(RoleScope::Clinic(clinic_id)).await;
        let mut other_sub = sync.subscribe(RoleScope::Patient(Uuid::new_v4())).await;

        let apt = appointment(patient_id, clinic_id);
        sync.publish(MutationEvent::Insert { appointment: apt.clone() }).await;

        let got = patient_sub.recv().await.unwrap();
        assert_eq!(got.appointment_id(), apt.id);

        let got = clinic_sub.recv().await.unwrap();
        assert_eq!(got.appointment_id(), apt.id);

        // The unrelated patient sees nothing
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), other_sub.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn delete_reaches_patient_and_clinic_scopes() {
        let sync = RealtimeSyncService::new();
        let patient_id = Uuid::new_v4();
        let clinic_id = Uuid::new_v4();
        let appointment_id = Uuid::new_v4();

        let mut patient_sub = sync.subscribe(RoleScope::Patient(patient_id)).await;
        let mut clinic_sub = sync.subscribe(RoleScope::Clinic(clinic_id)).await;

        sync.publish(MutationEvent::Delete {
            appointment_id,
            clinic_id,
            patient_id,
        })
        .await;

        assert_eq!(patient_sub.recv().await.unwrap().appointment_id(), appointment_id);
        assert_eq!(clinic_sub.recv().await.unwrap().appointment_id(), appointment_id);
    }

    #[tokio::test]
    async fn dropped_subscription_prunes_channel_on_next_publish() {
        let sync = RealtimeSyncService::new();
        let patient_id = Uuid::new_v4();
        let clinic_id = Uuid::new_v4();

        let sub = sync.subscribe(RoleScope::Patient(patient_id)).await;
        assert_eq!(sync.channel_count().await, 1);
        drop(sub);

        sync.publish(MutationEvent::Insert {
            appointment: appointment(patient_id, clinic_id),
        })
        .await;

        assert_eq!(sync.channel_count().await, 0);
    }
}

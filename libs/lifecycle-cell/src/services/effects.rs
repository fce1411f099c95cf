// libs/lifecycle-cell/src/services/effects.rs
//
// Side effects of a lifecycle transition (notifications, email, treatment
// plan cascade) are queued here and performed by an independent consumer
// task. A failed effect is logged and dropped; it never rolls back or
// re-reports the transition that produced it.
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::{StoreError, SupabaseClient};

use crate::models::NotificationType;

#[derive(Debug, Clone)]
pub enum SideEffect {
    /// Create a notification record for one user.
    Notify {
        user_id: Uuid,
        appointment_id: Option<Uuid>,
        notification_type: NotificationType,
        data: Option<Value>,
    },
    /// Fan a notification out to every staff member of a clinic.
    NotifyClinicStaff {
        clinic_id: Uuid,
        appointment_id: Uuid,
        notification_type: NotificationType,
        data: Option<Value>,
    },
    /// Ask the mail edge function to send a status-change email.
    Email {
        recipient_id: Uuid,
        appointment_id: Uuid,
        kind: EmailKind,
    },
    /// Reconcile the treatment plan linked to a cancelled/rejected
    /// appointment and notify staff of the schedule impact.
    TreatmentPlanCascade {
        appointment_id: Uuid,
        clinic_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub enum EmailKind {
    StatusChanged(NotificationType),
    ConditionReport,
}

struct EffectEnvelope {
    effect: SideEffect,
    auth_token: String,
}

#[derive(Clone)]
pub struct EffectDispatcher {
    tx: mpsc::UnboundedSender<EffectEnvelope>,
}

impl EffectDispatcher {
    /// Spawns the consumer task. The task ends when the last dispatcher
    /// handle is dropped.
    pub fn spawn(supabase: Arc<SupabaseClient>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<EffectEnvelope>();

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) =
                    Self::perform(&supabase, &envelope.effect, &envelope.auth_token).await
                {
                    warn!("Side effect failed (ignored): {:?}: {}", envelope.effect, e);
                }
            }
            debug!("Effect dispatcher task finished");
        });

        Self { tx }
    }

    /// Fire-and-forget. A closed queue is logged, never surfaced.
    pub fn enqueue(&self, effect: SideEffect, auth_token: &str) {
        let envelope = EffectEnvelope {
            effect,
            auth_token: auth_token.to_string(),
        };
        if self.tx.send(envelope).is_err() {
            warn!("Effect queue closed, dropping side effect");
        }
    }

    async fn perform(
        supabase: &SupabaseClient,
        effect: &SideEffect,
        auth_token: &str,
    ) -> Result<(), StoreError> {
        match effect {
            SideEffect::Notify {
                user_id,
                appointment_id,
                notification_type,
                data,
            } => {
                Self::create_notification(
                    supabase,
                    *user_id,
                    *appointment_id,
                    *notification_type,
                    data.clone(),
                    auth_token,
                )
                .await
            }
            SideEffect::NotifyClinicStaff {
                clinic_id,
                appointment_id,
                notification_type,
                data,
            } => {
                let staff = Self::clinic_staff_ids(supabase, *clinic_id, auth_token).await?;
                for user_id in staff {
                    // One failed recipient never starves the rest
                    if let Err(e) = Self::create_notification(
                        supabase,
                        user_id,
                        Some(*appointment_id),
                        *notification_type,
                        data.clone(),
                        auth_token,
                    )
                    .await
                    {
                        warn!(
                            "Notification for staff member {} failed (ignored): {}",
                            user_id, e
                        );
                    }
                }
                Ok(())
            }
            SideEffect::Email {
                recipient_id,
                appointment_id,
                kind,
            } => {
                let kind_tag = match kind {
                    EmailKind::StatusChanged(ntype) => ntype.to_string(),
                    EmailKind::ConditionReport => "condition_report".to_string(),
                };

                let body = json!({
                    "recipient_id": recipient_id,
                    "appointment_id": appointment_id,
                    "kind": kind_tag,
                });

                let _: Value = supabase
                    .request(
                        Method::POST,
                        "/functions/v1/notify-email",
                        Some(auth_token),
                        Some(body),
                    )
                    .await?;

                debug!("Email dispatch requested for appointment {}", appointment_id);
                Ok(())
            }
            SideEffect::TreatmentPlanCascade {
                appointment_id,
                clinic_id,
            } => Self::cascade(supabase, *appointment_id, *clinic_id, auth_token).await,
        }
    }

    async fn create_notification(
        supabase: &SupabaseClient,
        user_id: Uuid,
        appointment_id: Option<Uuid>,
        notification_type: NotificationType,
        data: Option<Value>,
        auth_token: &str,
    ) -> Result<(), StoreError> {
        let notification_data = json!({
            "user_id": user_id,
            "appointment_id": appointment_id,
            "notification_type": notification_type.to_string(),
            "data": data,
            "read": false,
            "created_at": Utc::now().to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                Some(auth_token),
                Some(notification_data),
                Some(headers),
            )
            .await?;

        debug!("Notification {} created for user {}", notification_type, user_id);
        Ok(())
    }

    async fn clinic_staff_ids(
        supabase: &SupabaseClient,
        clinic_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Uuid>, StoreError> {
        let path = format!("/rest/v1/clinic_staff?clinic_id=eq.{}&select=user_id", clinic_id);
        let rows: Vec<Value> = supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row["user_id"].as_str())
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect())
    }

    /// A cancelled counted visit is never auto-decremented: the link is
    /// flagged for staff review and the impact notification carries the
    /// plan's current counters.
    async fn cascade(
        supabase: &SupabaseClient,
        appointment_id: Uuid,
        clinic_id: Uuid,
        auth_token: &str,
    ) -> Result<(), StoreError> {
        let link_path = format!(
            "/rest/v1/treatment_plan_links?appointment_id=eq.{}",
            appointment_id
        );
        let links: Vec<Value> = supabase
            .request(Method::GET, &link_path, Some(auth_token), None)
            .await?;

        let Some(link) = links.first() else {
            debug!("No treatment plan linked to appointment {}", appointment_id);
            return Ok(());
        };

        let plan_id = link["treatment_plan_id"].as_str().unwrap_or_default().to_string();
        let visit_number = link["visit_number"].as_i64().unwrap_or(0);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = supabase
            .request_with_headers(
                Method::PATCH,
                &link_path,
                Some(auth_token),
                Some(json!({ "needs_review": true })),
                Some(headers),
            )
            .await?;

        let plan_path = format!(
            "/rest/v1/treatment_plans?id=eq.{}&select=id,visits_completed,total_visits_planned",
            plan_id
        );
        let plans: Vec<Value> = supabase
            .request(Method::GET, &plan_path, Some(auth_token), None)
            .await?;

        let (visits_completed, total_visits_planned) = plans
            .first()
            .map(|p| {
                (
                    p["visits_completed"].as_i64().unwrap_or(0),
                    p["total_visits_planned"].as_i64().unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        let staff = Self::clinic_staff_ids(supabase, clinic_id, auth_token).await?;
        for user_id in staff {
            if let Err(e) = Self::create_notification(
                supabase,
                user_id,
                Some(appointment_id),
                NotificationType::TreatmentPlanImpact,
                Some(json!({
                    "treatment_plan_id": plan_id,
                    "visit_number": visit_number,
                    "visits_completed": visits_completed,
                    "total_visits_planned": total_visits_planned,
                })),
                auth_token,
            )
            .await
            {
                warn!(
                    "Treatment plan notice for staff member {} failed (ignored): {}",
                    user_id, e
                );
            }
        }

        info!(
            "Treatment plan {} flagged for review after appointment {} dropped out",
            plan_id, appointment_id
        );
        Ok(())
    }
}

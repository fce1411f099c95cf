// libs/lifecycle-cell/src/services/transitions.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{
    Actor, ActorRole, Appointment, AppointmentListQuery, AppointmentListResponse,
    AppointmentStatus, LifecycleError, NotificationType, TransitionAction, TransitionOutcome,
};
use crate::services::effects::{EffectDispatcher, EmailKind, SideEffect};
use crate::services::policy::CancellationPolicyService;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CancellationCheck {
    pub eligible: bool,
    pub window_hours: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
}

/// Seam for layers that want to see committed appointment mutations (the
/// realtime fanout subscribes here). Called after the row is written, never
/// before.
pub trait MutationObserver: Send + Sync {
    fn appointment_changed(&self, appointment: &Appointment, change: ChangeKind);
}

pub struct LifecycleService {
    supabase: Arc<SupabaseClient>,
    policy: CancellationPolicyService,
    effects: EffectDispatcher,
    observer: Option<Arc<dyn MutationObserver>>,
}

impl LifecycleService {
    pub fn new(
        supabase: Arc<SupabaseClient>,
        policy: CancellationPolicyService,
        effects: EffectDispatcher,
    ) -> Self {
        Self { supabase, policy, effects, observer: None }
    }

    pub fn with_observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn notify_created(&self, appointment: &Appointment) {
        if let Some(observer) = &self.observer {
            observer.appointment_changed(appointment, ChangeKind::Created);
        }
    }

    /// Statuses reachable from `from` in one step. Terminal statuses have
    /// no successors.
    pub fn valid_transitions(from: AppointmentStatus) -> Vec<AppointmentStatus> {
        match from {
            AppointmentStatus::Pending => {
                vec![AppointmentStatus::Confirmed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => vec![],
        }
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, LifecycleError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        self.authorize_read(actor, &appointment)?;
        Ok(appointment)
    }

    /// Applies a lifecycle action with a compare-and-set on the current
    /// status. A concurrent transition makes the filtered PATCH match zero
    /// rows, which surfaces as `AlreadyTransitioned` rather than silently
    /// overwriting the other actor's change.
    pub async fn apply(
        &self,
        appointment_id: Uuid,
        action: TransitionAction,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        let from = appointment.status;
        let target = action.target_status();

        if !Self::valid_transitions(from).contains(&target) {
            return Err(LifecycleError::InvalidTransition {
                from,
                action: action.describe().to_string(),
            });
        }

        self.authorize_transition(actor, &appointment, &action, auth_token)
            .await?;

        let patch = Self::patch_body(&action);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id, from
        );

        let updated: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(patch),
                Some(headers),
            )
            .await?;

        let Some(updated) = updated.into_iter().next() else {
            // Zero rows matched: someone else moved the appointment first.
            info!(
                "Lost transition race on appointment {} ({} -> {})",
                appointment_id, from, target
            );
            return Err(LifecycleError::AlreadyTransitioned);
        };

        info!(
            "Appointment {} transitioned {} -> {} by {:?} {}",
            appointment_id, from, target, actor.role, actor.user_id
        );

        self.fan_out(&updated, &action, actor, auth_token);
        if let Some(observer) = &self.observer {
            observer.appointment_changed(&updated, ChangeKind::Updated);
        }

        Ok(TransitionOutcome {
            success: true,
            message: format!("Appointment {}", updated.status),
            appointment: updated,
        })
    }

    /// Eligibility preview for the patient-facing Cancel control. The same
    /// rule is re-evaluated inside `apply`, so a stale preview can never
    /// bypass the window.
    pub async fn check_cancellable(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<CancellationCheck, LifecycleError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        self.authorize_read(actor, &appointment)?;

        // Staff and admins are not bound by the patient window.
        if actor.role != ActorRole::Patient {
            let window_hours = self
                .policy
                .window_for_clinic(appointment.clinic_id, auth_token)
                .await;
            return Ok(CancellationCheck {
                eligible: appointment.status.is_active(),
                window_hours,
            });
        }

        let (eligible, window_hours) = self
            .policy
            .is_cancellable(&appointment, Utc::now(), auth_token)
            .await?;

        Ok(CancellationCheck { eligible, window_hours })
    }

    pub async fn list_appointments(
        &self,
        actor: &Actor,
        query: &AppointmentListQuery,
        auth_token: &str,
    ) -> Result<AppointmentListResponse, LifecycleError> {
        let mut filters = match actor.role {
            ActorRole::Patient => vec![format!("patient_id=eq.{}", actor.user_id)],
            ActorRole::Staff => {
                let clinic_id = actor.clinic_id.ok_or_else(|| {
                    LifecycleError::NotPermitted("Staff account has no clinic".to_string())
                })?;
                vec![format!("clinic_id=eq.{}", clinic_id)]
            }
            ActorRole::Admin => vec![],
        };

        if let Some(status) = query.status {
            filters.push(format!("status=eq.{}", status));
        }
        if let Some(from) = query.date_from {
            filters.push(format!("date=gte.{}", from));
        }
        if let Some(to) = query.date_to {
            filters.push(format!("date=lte.{}", to));
        }

        let filter_str = filters.join("&");
        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let offset = query.offset.unwrap_or(0).max(0);

        let list_path = format!(
            "/rest/v1/appointments?{}&order=date.asc,time.asc&limit={}&offset={}",
            filter_str, limit, offset
        );
        let appointments: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &list_path, Some(auth_token), None)
            .await?;

        let count_path = format!("/rest/v1/appointments?{}&select=count", filter_str);
        let counts: Vec<Value> = self
            .supabase
            .request(Method::GET, &count_path, Some(auth_token), None)
            .await?;
        let total_count = counts
            .first()
            .and_then(|row| row["count"].as_i64())
            .unwrap_or(appointments.len() as i64);

        let has_more = (offset as i64 + appointments.len() as i64) < total_count;

        debug!(
            "Listed {} of {} appointments for {:?} {}",
            appointments.len(),
            total_count,
            actor.role,
            actor.user_id
        );

        Ok(AppointmentListResponse { appointments, total_count, has_more })
    }

    /// Called by the booking flow after a new appointment row lands:
    /// notifies clinic staff and acknowledges the patient by email.
    pub fn post_booking_effects(&self, appointment: &Appointment, auth_token: &str) {
        self.effects.enqueue(
            SideEffect::NotifyClinicStaff {
                clinic_id: appointment.clinic_id,
                appointment_id: appointment.id,
                notification_type: NotificationType::AppointmentRequested,
                data: Some(json!({
                    "date": appointment.date,
                    "time": appointment.time,
                    "doctor_id": appointment.doctor_id,
                })),
            },
            auth_token,
        );
        self.effects.enqueue(
            SideEffect::Email {
                recipient_id: appointment.patient_id,
                appointment_id: appointment.id,
                kind: EmailKind::StatusChanged(NotificationType::AppointmentRequested),
            },
            auth_token,
        );
        if appointment.symptoms.is_some() {
            // Reported symptoms go to the clinic ahead of the visit
            self.effects.enqueue(
                SideEffect::Email {
                    recipient_id: appointment.doctor_id,
                    appointment_id: appointment.id,
                    kind: EmailKind::ConditionReport,
                },
                auth_token,
            );
        }
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, LifecycleError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        rows.into_iter().next().ok_or(LifecycleError::NotFound)
    }

    fn authorize_read(&self, actor: &Actor, appointment: &Appointment) -> Result<(), LifecycleError> {
        match actor.role {
            ActorRole::Admin => Ok(()),
            ActorRole::Staff => {
                if actor.clinic_id == Some(appointment.clinic_id) {
                    Ok(())
                } else {
                    Err(LifecycleError::NotPermitted(
                        "Appointment belongs to another clinic".to_string(),
                    ))
                }
            }
            ActorRole::Patient => {
                if actor.user_id == appointment.patient_id {
                    Ok(())
                } else {
                    Err(LifecycleError::NotPermitted(
                        "You can only view your own appointments".to_string(),
                    ))
                }
            }
        }
    }

    async fn authorize_transition(
        &self,
        actor: &Actor,
        appointment: &Appointment,
        action: &TransitionAction,
        auth_token: &str,
    ) -> Result<(), LifecycleError> {
        let staff_of_clinic = actor.role == ActorRole::Staff
            && actor.clinic_id == Some(appointment.clinic_id);

        match action {
            TransitionAction::Approve { .. }
            | TransitionAction::Complete { .. }
            | TransitionAction::MarkNoShow { .. } => {
                if actor.role == ActorRole::Admin || staff_of_clinic {
                    if matches!(action, TransitionAction::MarkNoShow { .. })
                        && Utc::now() < appointment.starts_at()
                    {
                        return Err(LifecycleError::NotPermitted(
                            "Cannot mark a no-show before the appointment starts".to_string(),
                        ));
                    }
                    Ok(())
                } else {
                    Err(LifecycleError::NotPermitted(format!(
                        "Only clinic staff can {} an appointment",
                        action.describe()
                    )))
                }
            }
            TransitionAction::Reject { reason, .. } => {
                if reason.trim().is_empty() {
                    return Err(LifecycleError::ReasonRequired);
                }
                if actor.role == ActorRole::Admin || staff_of_clinic {
                    Ok(())
                } else {
                    Err(LifecycleError::NotPermitted(
                        "Only clinic staff can reject an appointment".to_string(),
                    ))
                }
            }
            TransitionAction::Cancel { reason } => {
                if reason.trim().is_empty() {
                    return Err(LifecycleError::ReasonRequired);
                }
                match actor.role {
                    ActorRole::Admin => Ok(()),
                    ActorRole::Staff if staff_of_clinic => Ok(()),
                    ActorRole::Staff => Err(LifecycleError::NotPermitted(
                        "Appointment belongs to another clinic".to_string(),
                    )),
                    ActorRole::Patient => {
                        if actor.user_id != appointment.patient_id {
                            return Err(LifecycleError::NotPermitted(
                                "You can only cancel your own appointments".to_string(),
                            ));
                        }
                        let (cancellable, window_hours) = self
                            .policy
                            .is_cancellable(appointment, Utc::now(), auth_token)
                            .await?;
                        if cancellable {
                            Ok(())
                        } else {
                            warn!(
                                "Patient {} denied late cancellation of appointment {}",
                                actor.user_id, appointment.id
                            );
                            Err(LifecycleError::WindowExpired { hours: window_hours })
                        }
                    }
                }
            }
        }
    }

    fn patch_body(action: &TransitionAction) -> Value {
        let now = Utc::now().to_rfc3339();
        match action {
            TransitionAction::Approve { staff_notes } => json!({
                "status": "confirmed",
                "staff_notes": staff_notes,
                "updated_at": now,
            }),
            TransitionAction::Reject { reason, category, .. } => json!({
                "status": "cancelled",
                "rejection_reason": reason,
                "rejection_category": category,
                "updated_at": now,
            }),
            TransitionAction::Complete { notes, follow_up_required, .. } => json!({
                "status": "completed",
                "completion_notes": notes,
                "follow_up_required": follow_up_required,
                "updated_at": now,
            }),
            TransitionAction::MarkNoShow { notes } => json!({
                "status": "no_show",
                "completion_notes": notes,
                "updated_at": now,
            }),
            TransitionAction::Cancel { reason } => json!({
                "status": "cancelled",
                "cancellation_reason": reason,
                "updated_at": now,
            }),
        }
    }

    /// Side effects are enqueued after the row is committed; the dispatcher
    /// owns delivery from here.
    fn fan_out(
        &self,
        appointment: &Appointment,
        action: &TransitionAction,
        actor: &Actor,
        auth_token: &str,
    ) {
        match action {
            TransitionAction::Approve { .. } => {
                self.notify_patient(appointment, NotificationType::AppointmentConfirmed, None, auth_token);
            }
            TransitionAction::Reject {
                reason,
                category,
                suggest_reschedule,
                alternative_dates,
            } => {
                self.notify_patient(
                    appointment,
                    NotificationType::AppointmentRejected,
                    Some(json!({
                        "reason": reason,
                        "category": category,
                        "suggest_reschedule": suggest_reschedule,
                        "alternative_dates": alternative_dates,
                    })),
                    auth_token,
                );
                self.enqueue_cascade(appointment, auth_token);
            }
            TransitionAction::Complete { .. } => {
                self.notify_patient(appointment, NotificationType::AppointmentCompleted, None, auth_token);
            }
            TransitionAction::MarkNoShow { .. } => {
                self.notify_patient(appointment, NotificationType::AppointmentNoShow, None, auth_token);
            }
            TransitionAction::Cancel { reason } => {
                if actor.role == ActorRole::Patient {
                    // Staff learn about the freed slot; the patient gets an
                    // email receipt of their own action.
                    self.effects.enqueue(
                        SideEffect::NotifyClinicStaff {
                            clinic_id: appointment.clinic_id,
                            appointment_id: appointment.id,
                            notification_type: NotificationType::AppointmentCancelled,
                            data: Some(json!({ "reason": reason })),
                        },
                        auth_token,
                    );
                    self.effects.enqueue(
                        SideEffect::Email {
                            recipient_id: appointment.patient_id,
                            appointment_id: appointment.id,
                            kind: EmailKind::StatusChanged(NotificationType::AppointmentCancelled),
                        },
                        auth_token,
                    );
                } else {
                    self.notify_patient(
                        appointment,
                        NotificationType::AppointmentCancelled,
                        Some(json!({ "reason": reason })),
                        auth_token,
                    );
                }
                self.enqueue_cascade(appointment, auth_token);
            }
        }
    }

    fn notify_patient(
        &self,
        appointment: &Appointment,
        notification_type: NotificationType,
        data: Option<Value>,
        auth_token: &str,
    ) {
        self.effects.enqueue(
            SideEffect::Notify {
                user_id: appointment.patient_id,
                appointment_id: Some(appointment.id),
                notification_type,
                data,
            },
            auth_token,
        );
        self.effects.enqueue(
            SideEffect::Email {
                recipient_id: appointment.patient_id,
                appointment_id: appointment.id,
                kind: EmailKind::StatusChanged(notification_type),
            },
            auth_token,
        );
    }

    fn enqueue_cascade(&self, appointment: &Appointment, auth_token: &str) {
        self.effects.enqueue(
            SideEffect::TreatmentPlanCascade {
                appointment_id: appointment.id,
                clinic_id: appointment.clinic_id,
            },
            auth_token,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_confirm_or_cancel() {
        let next = LifecycleService::valid_transitions(AppointmentStatus::Pending);
        assert!(next.contains(&AppointmentStatus::Confirmed));
        assert!(next.contains(&AppointmentStatus::Cancelled));
        assert!(!next.contains(&AppointmentStatus::Completed));
    }

    #[test]
    fn confirmed_can_complete_no_show_or_cancel() {
        let next = LifecycleService::valid_transitions(AppointmentStatus::Confirmed);
        assert!(next.contains(&AppointmentStatus::Completed));
        assert!(next.contains(&AppointmentStatus::NoShow));
        assert!(next.contains(&AppointmentStatus::Cancelled));
        assert!(!next.contains(&AppointmentStatus::Pending));
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for status in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert!(LifecycleService::valid_transitions(status).is_empty());
        }
    }

    #[test]
    fn action_targets_match_transition_table() {
        let approve = TransitionAction::Approve { staff_notes: None };
        assert_eq!(approve.target_status(), AppointmentStatus::Confirmed);

        let cancel = TransitionAction::Cancel { reason: "sick".to_string() };
        assert_eq!(cancel.target_status(), AppointmentStatus::Cancelled);

        let no_show = TransitionAction::MarkNoShow { notes: None };
        assert_eq!(no_show.target_status(), AppointmentStatus::NoShow);
    }
}

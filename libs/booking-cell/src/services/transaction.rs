// libs/booking-cell/src/services/transaction.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use availability_cell::services::resolver::AvailabilityResolver;
use lifecycle_cell::models::Appointment;
use lifecycle_cell::services::transitions::LifecycleService;
use shared_database::SupabaseClient;

use crate::models::{BookingDraft, BookingError};
use crate::services::wizard::WizardService;

/// Turns a completed draft into a pending appointment row. The store's
/// exclusion constraint is the final word on double booking; this service
/// fast-fails on what it can see and maps the constraint violation when it
/// loses the race anyway.
pub struct BookingTransactionService {
    supabase: Arc<SupabaseClient>,
    resolver: Arc<AvailabilityResolver>,
    lifecycle: Arc<LifecycleService>,
    wizard: Arc<WizardService>,
}

impl BookingTransactionService {
    pub fn new(
        supabase: Arc<SupabaseClient>,
        resolver: Arc<AvailabilityResolver>,
        lifecycle: Arc<LifecycleService>,
        wizard: Arc<WizardService>,
    ) -> Self {
        Self { supabase, resolver, lifecycle, wizard }
    }

    pub async fn submit(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let draft = self.wizard.begin_submission(session_id, patient_id).await?;

        match self.place(&draft, patient_id, auth_token).await {
            Ok(appointment) => {
                // The draft is spent; only the stored row matters now
                self.wizard.finish_submission(session_id, true).await;
                self.lifecycle.post_booking_effects(&appointment, auth_token);
                self.lifecycle.notify_created(&appointment);
                info!(
                    "Appointment {} booked for patient {} ({} {})",
                    appointment.id, patient_id, appointment.date, appointment.time
                );
                Ok(appointment)
            }
            Err(err @ (BookingError::SlotTaken | BookingError::SlotNoLongerAvailable)) => {
                warn!(
                    "Booking session {} lost its slot during submission: {}",
                    session_id, err
                );
                self.wizard.mark_slot_stale(session_id).await;
                Err(err)
            }
            Err(err) => {
                self.wizard.finish_submission(session_id, false).await;
                Err(err)
            }
        }
    }

    async fn place(
        &self,
        draft: &BookingDraft,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let clinic_id = draft
            .clinic_id
            .ok_or_else(|| BookingError::ValidationError("Missing clinic".to_string()))?;
        let doctor_id = draft
            .doctor_id
            .ok_or_else(|| BookingError::ValidationError("Missing doctor".to_string()))?;
        let date = draft
            .date
            .ok_or_else(|| BookingError::ValidationError("Missing date".to_string()))?;
        let time = draft
            .time
            .ok_or_else(|| BookingError::ValidationError("Missing time".to_string()))?;

        if date.and_time(time).and_utc() <= Utc::now() {
            return Err(BookingError::ValidationError(
                "Appointment must be in the future".to_string(),
            ));
        }

        // Re-resolve right before writing; the picked slot may have gone
        // stale while the patient sat on the confirmation step
        let availability = self
            .resolver
            .resolve(doctor_id, date, &draft.service_ids, auth_token)
            .await?;

        let still_open = availability
            .slots
            .iter()
            .any(|slot| slot.time == time && slot.available);
        if !still_open {
            return Err(BookingError::SlotNoLongerAvailable);
        }

        let now = Utc::now().to_rfc3339();
        let appointment_data = json!({
            "clinic_id": clinic_id,
            "doctor_id": doctor_id,
            "patient_id": patient_id,
            "date": date,
            "time": time,
            "duration_minutes": availability.total_duration_minutes,
            "service_ids": draft.service_ids,
            "symptoms": draft.symptoms,
            "status": "pending",
            "created_at": now,
            "updated_at": now,
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let created: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(headers),
            )
            .await?;

        created.into_iter().next().ok_or_else(|| {
            BookingError::DatabaseError("Insert returned no appointment row".to_string())
        })
    }
}

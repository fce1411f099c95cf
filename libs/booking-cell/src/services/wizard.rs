// libs/booking-cell/src/services/wizard.rs
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    BookingDraft, BookingError, NavOutcome, SelectionUpdate, WizardSession, WizardSessionView,
    WizardStep, MAX_SERVICES_PER_BOOKING,
};

/// Hook for what "back" means when the user is already on the first step.
/// The service discards the session either way; the adapter decides where
/// the caller lands.
pub trait NavigationAdapter: Send + Sync {
    fn on_exit(&self, session_id: Uuid);
}

/// Default adapter: leaving the flow just logs the abandonment.
pub struct DiscardOnExit;

impl NavigationAdapter for DiscardOnExit {
    fn on_exit(&self, session_id: Uuid) {
        debug!("Booking session {} abandoned from first step", session_id);
    }
}

/// In-memory wizard sessions, one per in-progress booking. Drafts never
/// touch the store; an abandoned session simply ages out with the process.
pub struct WizardService {
    sessions: RwLock<HashMap<Uuid, WizardSession>>,
    adapter: Arc<dyn NavigationAdapter>,
}

impl WizardService {
    pub fn new(adapter: Arc<dyn NavigationAdapter>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            adapter,
        }
    }

    pub async fn create(&self, patient_id: Uuid) -> WizardSessionView {
        let session = WizardSession::new(patient_id);
        let view = WizardSessionView::of(&session);

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session);

        info!("Booking session {} started for patient {}", view.id, patient_id);
        view
    }

    pub async fn view(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<WizardSessionView, BookingError> {
        let sessions = self.sessions.read().await;
        let session = Self::owned(&sessions, session_id, patient_id)?;
        Ok(WizardSessionView::of(session))
    }

    /// Applies a partial selection. Changing an upstream choice clears every
    /// downstream one, so a stale doctor or slot can never survive a clinic
    /// change.
    pub async fn update_selection(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
        update: SelectionUpdate,
    ) -> Result<WizardSessionView, BookingError> {
        if let Some(ref service_ids) = update.service_ids {
            if service_ids.is_empty() || service_ids.len() > MAX_SERVICES_PER_BOOKING {
                return Err(BookingError::ValidationError(format!(
                    "Select between 1 and {} services",
                    MAX_SERVICES_PER_BOOKING
                )));
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = Self::owned_mut(&mut sessions, session_id, patient_id)?;

        if let Some(clinic_id) = update.clinic_id {
            if session.draft.clinic_id != Some(clinic_id) {
                session.draft.service_ids.clear();
                session.draft.doctor_id = None;
                session.draft.date = None;
                session.draft.time = None;
            }
            session.draft.clinic_id = Some(clinic_id);
        }

        if let Some(service_ids) = update.service_ids {
            if session.draft.service_ids != service_ids {
                // Total duration changed, the picked slot may not fit
                session.draft.date = None;
                session.draft.time = None;
            }
            session.draft.service_ids = service_ids;
        }

        if let Some(doctor_id) = update.doctor_id {
            if session.draft.doctor_id != Some(doctor_id) {
                session.draft.date = None;
                session.draft.time = None;
            }
            session.draft.doctor_id = Some(doctor_id);
        }

        if let Some(date) = update.date {
            if session.draft.date != Some(date) {
                // A time picked for another day does not carry over
                session.draft.time = None;
            }
            session.draft.date = Some(date);
        }
        if let Some(time) = update.time {
            session.draft.time = Some(time);
        }
        if let Some(symptoms) = update.symptoms {
            session.draft.symptoms = Some(symptoms);
        }

        // A confirmation step without a complete slot goes back to the picker
        if session.step == WizardStep::Confirm
            && (session.draft.date.is_none() || session.draft.time.is_none())
        {
            session.step = WizardStep::DateTime;
        }

        Ok(WizardSessionView::of(session))
    }

    pub async fn advance(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<WizardSessionView, BookingError> {
        let mut sessions = self.sessions.write().await;
        let session = Self::owned_mut(&mut sessions, session_id, patient_id)?;

        validate_step(session.step, &session.draft)?;

        let Some(next) = session.step.next() else {
            return Err(BookingError::ValidationError(
                "Already at the confirmation step; submit the booking instead".to_string(),
            ));
        };

        session.step = next;
        Ok(WizardSessionView::of(session))
    }

    pub async fn back(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(NavOutcome, Option<WizardSessionView>), BookingError> {
        let mut sessions = self.sessions.write().await;

        {
            let session = Self::owned_mut(&mut sessions, session_id, patient_id)?;
            if let Some(prev) = session.step.prev() {
                session.step = prev;
                return Ok((NavOutcome::MovedTo(prev), Some(WizardSessionView::of(session))));
            }
        }

        // Backing out of the first step ends the flow and drops the draft
        sessions.remove(&session_id);
        self.adapter.on_exit(session_id);
        Ok((NavOutcome::ExitFlow, None))
    }

    /// Steps back one step. Unlike `back`, retreating at the first step is
    /// a no-op: only platform back-navigation may exit the flow.
    pub async fn retreat(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<WizardSessionView, BookingError> {
        let mut sessions = self.sessions.write().await;
        let session = Self::owned_mut(&mut sessions, session_id, patient_id)?;

        if let Some(prev) = session.step.prev() {
            session.step = prev;
        }
        Ok(WizardSessionView::of(session))
    }

    /// Clears every selection and returns to the first step. The session
    /// itself survives.
    pub async fn reset(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<WizardSessionView, BookingError> {
        let mut sessions = self.sessions.write().await;
        let session = Self::owned_mut(&mut sessions, session_id, patient_id)?;

        session.draft = BookingDraft::default();
        session.step = WizardStep::Clinic;
        Ok(WizardSessionView::of(session))
    }

    /// Claims the session for submission. Fails when another submission is
    /// already running or the draft is incomplete; on success the caller
    /// must release via `finish_submission` or `mark_slot_stale`.
    pub async fn begin_submission(
        &self,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<BookingDraft, BookingError> {
        let sessions = self.sessions.read().await;
        let session = Self::owned(&sessions, session_id, patient_id)?;

        for step in [
            WizardStep::Clinic,
            WizardStep::Services,
            WizardStep::Doctor,
            WizardStep::DateTime,
        ] {
            validate_step(step, &session.draft)?;
        }

        if session
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BookingError::SubmissionInFlight);
        }

        Ok(session.draft.clone())
    }

    pub async fn finish_submission(&self, session_id: Uuid, success: bool) {
        let mut sessions = self.sessions.write().await;
        if success {
            sessions.remove(&session_id);
            info!("Booking session {} completed and discarded", session_id);
        } else if let Some(session) = sessions.get_mut(&session_id) {
            session.in_flight.store(false, Ordering::Release);
        }
    }

    /// The chosen slot disappeared between selection and submission: drop
    /// the stale slot and send the wizard back to the slot picker.
    pub async fn mark_slot_stale(&self, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.draft.date = None;
            session.draft.time = None;
            session.step = WizardStep::DateTime;
            session.in_flight.store(false, Ordering::Release);
        }
    }

    fn owned<'a>(
        sessions: &'a HashMap<Uuid, WizardSession>,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<&'a WizardSession, BookingError> {
        let session = sessions
            .get(&session_id)
            .ok_or(BookingError::SessionNotFound)?;
        if session.patient_id != patient_id {
            return Err(BookingError::NotYourSession);
        }
        Ok(session)
    }

    fn owned_mut<'a>(
        sessions: &'a mut HashMap<Uuid, WizardSession>,
        session_id: Uuid,
        patient_id: Uuid,
    ) -> Result<&'a mut WizardSession, BookingError> {
        let session = sessions
            .get_mut(&session_id)
            .ok_or(BookingError::SessionNotFound)?;
        if session.patient_id != patient_id {
            return Err(BookingError::NotYourSession);
        }
        Ok(session)
    }
}

/// Completion predicate for one step.
pub fn validate_step(step: WizardStep, draft: &BookingDraft) -> Result<(), BookingError> {
    match step {
        WizardStep::Clinic => {
            if draft.clinic_id.is_none() {
                return Err(BookingError::StepIncomplete("Choose a clinic".to_string()));
            }
        }
        WizardStep::Services => {
            if draft.service_ids.is_empty() {
                return Err(BookingError::StepIncomplete(
                    "Choose at least one service".to_string(),
                ));
            }
            if draft.service_ids.len() > MAX_SERVICES_PER_BOOKING {
                return Err(BookingError::ValidationError(format!(
                    "At most {} services per booking",
                    MAX_SERVICES_PER_BOOKING
                )));
            }
        }
        WizardStep::Doctor => {
            if draft.doctor_id.is_none() {
                return Err(BookingError::StepIncomplete("Choose a doctor".to_string()));
            }
        }
        WizardStep::DateTime => {
            if draft.date.is_none() || draft.time.is_none() {
                return Err(BookingError::StepIncomplete(
                    "Choose a date and time".to_string(),
                ));
            }
        }
        WizardStep::Confirm => {}
    }
    Ok(())
}

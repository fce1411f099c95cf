// libs/availability-cell/src/services/resolver.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use chrono::Datelike;
use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{
    AvailabilityError, AvailabilityResponse, AvailabilitySlot, BookedAppointment, DentalService,
    DoctorSchedule,
};
use crate::services::coalesce::SingleFlight;

pub const MAX_SERVICES_PER_BOOKING: usize = 3;

type GridKey = (Uuid, NaiveDate, Vec<Uuid>);

/// Slot resolver. Every call recomputes from the store's current state;
/// only concurrent duplicate requests (realtime events arrive one per
/// mutated row) share a single in-flight read. A grid is never answered
/// from a read that completed before the caller arrived.
pub struct AvailabilityResolver {
    supabase: Arc<SupabaseClient>,
    in_flight: SingleFlight<GridKey, Result<AvailabilityResponse, AvailabilityError>>,
}

impl AvailabilityResolver {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            in_flight: SingleFlight::new(),
        }
    }

    pub async fn resolve(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        service_ids: &[Uuid],
        auth_token: &str,
    ) -> Result<AvailabilityResponse, AvailabilityError> {
        if service_ids.len() > MAX_SERVICES_PER_BOOKING {
            return Err(AvailabilityError::Validation(format!(
                "Select at most {} services",
                MAX_SERVICES_PER_BOOKING
            )));
        }

        if service_ids.is_empty() {
            // Nothing selected yet; there is no slot width to compute
            return Ok(AvailabilityResponse {
                doctor_id,
                date,
                total_duration_minutes: 0,
                slots: vec![],
            });
        }

        let key = (doctor_id, date, service_ids.to_vec());
        self.in_flight
            .run(key, || self.resolve_fresh(doctor_id, date, service_ids, auth_token))
            .await
    }

    async fn resolve_fresh(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        service_ids: &[Uuid],
        auth_token: &str,
    ) -> Result<AvailabilityResponse, AvailabilityError> {
        let total_duration_minutes = self.total_duration(service_ids, auth_token).await?;

        let Some(schedule) = self.schedule_for_day(doctor_id, date, auth_token).await? else {
            // Doctor does not work this day; an empty grid is the answer
            debug!("No schedule for doctor {} on {}", doctor_id, date);
            return Ok(AvailabilityResponse {
                doctor_id,
                date,
                total_duration_minutes,
                slots: vec![],
            });
        };

        let booked = self.active_appointments(doctor_id, date, auth_token).await?;
        let slots = compute_grid(&schedule, date, total_duration_minutes, &booked, Utc::now());

        debug!(
            "Resolved {} slots for doctor {} on {} ({} booked)",
            slots.len(),
            doctor_id,
            date,
            booked.len()
        );

        Ok(AvailabilityResponse {
            doctor_id,
            date,
            total_duration_minutes,
            slots,
        })
    }

    /// Cumulative duration of the selected services.
    async fn total_duration(
        &self,
        service_ids: &[Uuid],
        auth_token: &str,
    ) -> Result<i32, AvailabilityError> {
        let id_list = service_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let path = format!(
            "/rest/v1/dental_services?id=in.({})&select=id,name,duration_minutes",
            id_list
        );

        let services: Vec<DentalService> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        if services.len() != service_ids.len() {
            return Err(AvailabilityError::Validation(
                "One or more selected services do not exist".to_string(),
            ));
        }

        Ok(services.iter().map(|s| s.duration_minutes).sum())
    }

    async fn schedule_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Option<DoctorSchedule>, AvailabilityError> {
        // 0 = Sunday, matching the stored schedule rows
        let day_of_week = match date.weekday() {
            Weekday::Sun => 0,
            Weekday::Mon => 1,
            Weekday::Tue => 2,
            Weekday::Wed => 3,
            Weekday::Thu => 4,
            Weekday::Fri => 5,
            Weekday::Sat => 6,
        };

        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&day_of_week=eq.{}",
            doctor_id, day_of_week
        );

        let schedules: Vec<DoctorSchedule> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(schedules.into_iter().next())
    }

    /// Pending and confirmed appointments both hold their slot.
    async fn active_appointments(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<BookedAppointment>, AvailabilityError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status=in.(pending,confirmed)&select=date,time,duration_minutes",
            doctor_id, date
        );

        let appointments: Vec<BookedAppointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(appointments)
    }
}

/// Walks the working window in schedule increments. A slot is offered when
/// the full combined treatment fits before closing; it is marked taken when
/// it overlaps any active appointment or has already started.
pub fn compute_grid(
    schedule: &DoctorSchedule,
    date: NaiveDate,
    total_duration_minutes: i32,
    booked: &[BookedAppointment],
    now: DateTime<Utc>,
) -> Vec<AvailabilitySlot> {
    let increment = Duration::minutes(schedule.slot_increment_minutes.max(5) as i64);
    let treatment = Duration::minutes(total_duration_minutes as i64);

    let window_start = date.and_time(schedule.start_time).and_utc();
    let window_end = date.and_time(schedule.end_time).and_utc();

    let mut slots = Vec::new();
    let mut current = window_start;

    while current + treatment <= window_end {
        let slot_end = current + treatment;

        let has_conflict = booked.iter().any(|apt| {
            let apt_start = apt.date.and_time(apt.time).and_utc();
            let apt_end = apt_start + Duration::minutes(apt.duration_minutes as i64);
            current < apt_end && apt_start < slot_end
        });

        let in_past = current <= now;

        slots.push(AvailabilitySlot {
            time: current.time(),
            available: !has_conflict && !in_past,
        });

        current += increment;
    }

    slots
}

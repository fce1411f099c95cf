// libs/lifecycle-cell/src/services/policy.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{Appointment, LifecycleError};

/// Pure eligibility check: a cancellation is allowed strictly before the
/// clinic's window opens. At exactly `window_hours` before the start the
/// appointment is no longer cancellable.
pub fn can_cancel(
    date: NaiveDate,
    time: NaiveTime,
    now: DateTime<Utc>,
    window_hours: i64,
) -> bool {
    let starts_at = date.and_time(time).and_utc();
    now < starts_at - Duration::hours(window_hours)
}

/// Looks up the clinic's configured window and applies `can_cancel`. The
/// client evaluates the same rule for showing the Cancel control; this
/// service is the authoritative gate.
pub struct CancellationPolicyService {
    supabase: Arc<SupabaseClient>,
    default_window_hours: i64,
}

impl CancellationPolicyService {
    pub fn new(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            supabase,
            default_window_hours: config.default_cancellation_window_hours,
        }
    }

    pub async fn window_for_clinic(&self, clinic_id: Uuid, auth_token: &str) -> i64 {
        let path = format!(
            "/rest/v1/clinics?id=eq.{}&select=cancellation_window_hours",
            clinic_id
        );

        let result: Result<Vec<Value>, _> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await;

        match result {
            Ok(rows) => rows
                .first()
                .and_then(|row| row["cancellation_window_hours"].as_i64())
                .unwrap_or(self.default_window_hours),
            Err(e) => {
                warn!("Failed to load cancellation window for clinic {}: {}", clinic_id, e);
                self.default_window_hours
            }
        }
    }

    pub async fn is_cancellable(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<(bool, i64), LifecycleError> {
        let window_hours = self
            .window_for_clinic(appointment.clinic_id, auth_token)
            .await;

        let eligible = appointment.status.is_active()
            && can_cancel(appointment.date, appointment.time, now, window_hours);

        debug!(
            "Cancellation eligibility for appointment {}: {} (window {}h)",
            appointment.id, eligible, window_hours
        );

        Ok((eligible, window_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment_start() -> (NaiveDate, NaiveTime) {
        (
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
        )
    }

    #[test]
    fn cancellable_well_before_window() {
        let (date, time) = appointment_start();
        // 48 hours ahead under a 24 hour policy
        let now = Utc.with_ymd_and_hms(2025, 3, 8, 9, 45, 0).unwrap();
        assert!(can_cancel(date, time, now, 24));
    }

    #[test]
    fn not_cancellable_inside_window() {
        let (date, time) = appointment_start();
        // 2 hours ahead under a 24 hour policy
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 7, 45, 0).unwrap();
        assert!(!can_cancel(date, time, now, 24));
    }

    #[test]
    fn boundary_instant_is_ineligible() {
        let (date, time) = appointment_start();
        // Exactly 24 hours before the start
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 9, 45, 0).unwrap();
        assert!(!can_cancel(date, time, now, 24));
    }

    #[test]
    fn one_second_before_boundary_is_eligible() {
        let (date, time) = appointment_start();
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 9, 44, 59).unwrap();
        assert!(can_cancel(date, time, now, 24));
    }

    #[test]
    fn zero_hour_window_allows_until_start() {
        let (date, time) = appointment_start();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 44, 0).unwrap();
        assert!(can_cancel(date, time, now, 0));

        let at_start = Utc.with_ymd_and_hms(2025, 3, 10, 9, 45, 0).unwrap();
        assert!(!can_cancel(date, time, at_start, 0));
    }
}

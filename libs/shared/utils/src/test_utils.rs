use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            default_cancellation_window_hours: 24,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub clinic_id: Option<String>,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
            clinic_id: None,
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            clinic_id: None,
        }
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn staff(email: &str, clinic_id: Uuid) -> Self {
        let mut user = Self::new(email, "staff");
        user.clinic_id = Some(clinic_id.to_string());
        user
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            clinic_id: self.clinic_id.clone(),
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "clinic_id": user.clinic_id,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows for wiremock-backed tests.
pub struct MockStoreResponses;

impl MockStoreResponses {
    pub fn clinic_response(clinic_id: &str, cancellation_window_hours: i64) -> serde_json::Value {
        json!({
            "id": clinic_id,
            "name": "Brightside Dental",
            "address": "12 High Street",
            "cancellation_window_hours": cancellation_window_hours,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn doctor_response(doctor_id: &str, clinic_id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": doctor_id,
            "clinic_id": clinic_id,
            "full_name": name,
            "title": "DDS",
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn service_response(service_id: &str, name: &str, duration_minutes: i32) -> serde_json::Value {
        json!({
            "id": service_id,
            "name": name,
            "duration_minutes": duration_minutes
        })
    }

    pub fn schedule_response(doctor_id: &str, day_of_week: i32) -> serde_json::Value {
        json!({
            "doctor_id": doctor_id,
            "day_of_week": day_of_week,
            "start_time": "09:00:00",
            "end_time": "17:00:00",
            "slot_increment_minutes": 15
        })
    }

    pub fn appointment_response(
        appointment_id: &str,
        clinic_id: &str,
        doctor_id: &str,
        patient_id: &str,
        date: &str,
        time: &str,
        duration_minutes: i32,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "clinic_id": clinic_id,
            "doctor_id": doctor_id,
            "patient_id": patient_id,
            "date": date,
            "time": time,
            "duration_minutes": duration_minutes,
            "service_ids": [Uuid::new_v4()],
            "symptoms": null,
            "status": status,
            "cancellation_reason": null,
            "rejection_reason": null,
            "rejection_category": null,
            "completion_notes": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn treatment_plan_link_response(
        appointment_id: &str,
        plan_id: &str,
        visit_number: i32,
    ) -> serde_json::Value {
        json!({
            "appointment_id": appointment_id,
            "treatment_plan_id": plan_id,
            "visit_number": visit_number,
            "visit_purpose": "Root canal, visit 2 of 3",
            "completed": false,
            "needs_review": false
        })
    }

    pub fn treatment_plan_response(plan_id: &str, completed: i32, total: i32) -> serde_json::Value {
        json!({
            "id": plan_id,
            "visits_completed": completed,
            "total_visits_planned": total
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
    }

    #[test]
    fn test_user_roles() {
        let clinic_id = Uuid::new_v4();
        let staff = TestUser::staff("frontdesk@example.com", clinic_id);
        assert_eq!(staff.role, "staff");
        assert_eq!(staff.clinic_id, Some(clinic_id.to_string()));

        let user_model = staff.to_user();
        assert_eq!(user_model.role, Some("staff".to_string()));
        assert_eq!(user_model.clinic_id, Some(clinic_id.to_string()));
    }

    #[test]
    fn test_jwt_token_shape() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_test_token(&user, "test-secret", Some(1));

        assert_eq!(token.split('.').count(), 3);
    }
}

// libs/realtime-cell/src/handlers.rs
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, State, WebSocketUpgrade,
    },
    response::Response,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::RoleScope;
use crate::services::cache::{AppointmentCache, MergeOutcome};
use crate::services::sync::RealtimeSyncService;
use crate::services::timer::RefreshTimer;

const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

pub struct RealtimeState {
    pub config: Arc<AppConfig>,
    pub sync: Arc<RealtimeSyncService>,
}

/// The scope a user may listen on is fixed by their role; clients do not
/// pick their own scope.
fn scope_for(user: &User) -> Result<RoleScope, AppError> {
    let user_id = Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Invalid user id".to_string()))?;

    match user.role.as_deref() {
        Some("admin") => Ok(RoleScope::Global),
        Some("staff") => {
            let clinic_id = user
                .clinic_id
                .as_deref()
                .and_then(|id| Uuid::parse_str(id).ok())
                .ok_or_else(|| AppError::Policy("Staff account has no clinic".to_string()))?;
            Ok(RoleScope::Clinic(clinic_id))
        }
        _ => Ok(RoleScope::Patient(user_id)),
    }
}

pub async fn subscribe_ws(
    State(state): State<Arc<RealtimeState>>,
    Extension(user): Extension<User>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let scope = scope_for(&user)?;
    let sync = state.sync.clone();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, sync, scope)))
}

async fn handle_socket(mut socket: WebSocket, sync: Arc<RealtimeSyncService>, scope: RoleScope) {
    let mut subscription = sync.subscribe(scope).await;
    let mut cache = AppointmentCache::new();
    info!("Realtime socket opened for {:?}", scope);

    // Dropping the timer with the socket stops the pings with it
    let (ping_tx, mut ping_rx) = mpsc::channel::<()>(1);
    let _keepalive = RefreshTimer::start(KEEPALIVE_PERIOD, move || {
        let ping_tx = ping_tx.clone();
        async move {
            let _ = ping_tx.try_send(());
        }
    });

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                // Duplicate and out-of-order deliveries stop at the merge
                if cache.merge(&event) == MergeOutcome::StaleIgnored {
                    debug!(
                        "Dropped stale realtime event for appointment {} on {:?}",
                        event.appointment_id(),
                        scope
                    );
                    continue;
                }
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to encode realtime event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            _ = ping_rx.recv() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // pings and client chatter are ignored
                    Some(Err(e)) => {
                        debug!("Realtime socket error for {:?}: {}", scope, e);
                        break;
                    }
                }
            }
        }
    }

    // Dropping the subscription handle ends the registration
    info!("Realtime socket closed for {:?}", scope);
}

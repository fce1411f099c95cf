use std::sync::Arc;

use axum::{routing::get, Router};

use availability_cell::handlers::AvailabilityState;
use availability_cell::router::availability_routes;
use availability_cell::services::resolver::AvailabilityResolver;
use booking_cell::handlers::BookingState;
use booking_cell::router::booking_routes;
use booking_cell::services::transaction::BookingTransactionService;
use booking_cell::services::wizard::{DiscardOnExit, WizardService};
use lifecycle_cell::handlers::LifecycleState;
use lifecycle_cell::router::lifecycle_routes;
use lifecycle_cell::services::effects::EffectDispatcher;
use lifecycle_cell::services::policy::CancellationPolicyService;
use lifecycle_cell::services::transitions::LifecycleService;
use realtime_cell::handlers::RealtimeState;
use realtime_cell::router::realtime_routes;
use realtime_cell::services::sync::{RealtimePublisher, RealtimeSyncService};
use shared_config::AppConfig;
use shared_database::SupabaseClient;

pub fn create_router(config: Arc<AppConfig>) -> Router {
    let supabase = Arc::new(SupabaseClient::new(&config));

    let sync = Arc::new(RealtimeSyncService::new());

    let policy = CancellationPolicyService::new(supabase.clone(), &config);
    let effects = EffectDispatcher::spawn(supabase.clone());
    let lifecycle = Arc::new(
        LifecycleService::new(supabase.clone(), policy, effects)
            .with_observer(Arc::new(RealtimePublisher::new(sync.clone()))),
    );

    let resolver = Arc::new(AvailabilityResolver::new(supabase.clone()));
    let wizard = Arc::new(WizardService::new(Arc::new(DiscardOnExit)));
    let transaction = Arc::new(BookingTransactionService::new(
        supabase,
        resolver.clone(),
        lifecycle.clone(),
        wizard.clone(),
    ));

    Router::new()
        .route("/", get(|| async { "Dental booking API is running!" }))
        .nest(
            "/availability",
            availability_routes(Arc::new(AvailabilityState {
                config: config.clone(),
                resolver,
            })),
        )
        .nest(
            "/bookings",
            booking_routes(Arc::new(BookingState {
                config: config.clone(),
                wizard,
                transaction,
            })),
        )
        .nest(
            "/appointments",
            lifecycle_routes(Arc::new(LifecycleState {
                config: config.clone(),
                service: lifecycle,
            })),
        )
        .nest(
            "/realtime",
            realtime_routes(Arc::new(RealtimeState { config, sync })),
        )
}

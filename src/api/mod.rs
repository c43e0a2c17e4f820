mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::TokenSigner;
use crate::config::Config;
use crate::db::Database;
use crate::notify::Notifier;
use crate::recordings::{MediaStore, Reconciler};

pub use middleware::{RateLimiter, SecurityConfig};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub signer: TokenSigner,
    pub notifier: Notifier,
    pub media: MediaStore,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let signer = TokenSigner::new(config.secret_key.clone(), config.token_ttl);
        let notifier = Notifier::new(config.telegram.as_ref());
        let media = MediaStore::new(config.media_dir.clone());
        Self {
            db,
            config: Arc::new(config),
            signer,
            notifier,
            media,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.db.clone(),
            self.media.clone(),
            self.config.recording_utc_offset,
        )
    }
}

pub fn create_router(state: AppState) -> Router {
    let security = SecurityConfig::from_config(&state.config);
    create_router_with_config(state, security)
}

pub fn create_router_with_config(state: AppState, security: SecurityConfig) -> Router {
    let mut login = Router::new().route("/auth/login", post(handlers::auth::login));
    if let Some(limiter) = security.login_limiter.clone() {
        login = login.route_layer(from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    let api = Router::new()
        .merge(login)
        // Health
        .route("/health", get(handlers::health))
        .route("/health/detailed", get(handlers::health_detailed))
        // Auth
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        // Reference data
        .merge(handlers::reference::routes())
        // People
        .route(
            "/users",
            get(handlers::people::list_users).post(handlers::people::create_user),
        )
        .route("/users/active", get(handlers::people::list_active_users))
        .route(
            "/users/{id}",
            get(handlers::people::get_user)
                .put(handlers::people::update_user)
                .delete(handlers::people::delete_user),
        )
        .route(
            "/masters",
            get(handlers::people::list_masters).post(handlers::people::create_master),
        )
        .route("/masters/active", get(handlers::people::list_active_masters))
        .route(
            "/masters/{id}",
            get(handlers::people::get_master)
                .put(handlers::people::update_master)
                .delete(handlers::people::delete_master),
        )
        // Requests
        .route(
            "/requests",
            get(handlers::requests::list_requests).post(handlers::requests::create_request),
        )
        .route("/requests/incoming", get(handlers::requests::list_incoming))
        .route(
            "/requests/{id}",
            get(handlers::requests::get_request)
                .put(handlers::requests::update_request)
                .delete(handlers::requests::delete_request),
        )
        .route(
            "/requests/{id}/files",
            get(handlers::requests::list_files).post(handlers::requests::upload_file),
        )
        .route(
            "/requests/{id}/files/{file_id}",
            get(handlers::requests::download_file),
        )
        // Finance
        .route(
            "/transactions",
            get(handlers::finance::list_transactions).post(handlers::finance::create_transaction),
        )
        .route(
            "/transactions/summary",
            get(handlers::finance::transaction_summary),
        )
        .route(
            "/transactions/{id}",
            get(handlers::finance::get_transaction)
                .put(handlers::finance::update_transaction)
                .delete(handlers::finance::delete_transaction),
        )
        .route("/payouts", get(handlers::finance::list_payouts))
        .route(
            "/payouts/{id}",
            get(handlers::finance::get_payout)
                .put(handlers::finance::update_payout)
                .delete(handlers::finance::delete_payout),
        )
        .route(
            "/payouts/{id}/receipt",
            get(handlers::finance::download_receipt),
        )
        .route("/feedback", post(handlers::auth::feedback))
        // Telephony webhooks
        .route(
            "/telephony/incoming-call",
            post(handlers::telephony::incoming_call),
        )
        .route(
            "/telephony/incoming-call/events/call",
            post(handlers::telephony::incoming_call),
        )
        .route(
            "/telephony/events/{event}",
            post(handlers::telephony::event),
        )
        .route(
            "/telephony/recordings",
            post(handlers::telephony::upload_recording),
        );

    Router::new()
        .nest("/api/v1", api)
        .layer(from_fn(middleware::request_timing))
        .layer(from_fn(middleware::security_headers))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(security.cors_origins.as_deref()))
        .with_state(state)
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let Some(origins) = origins else {
        return CorsLayer::permissive();
    };

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

//! HTTP surface: shared state and the router.
//!
//! Every throttled route names its scopes here, in check order. Auth runs
//! before the gate so the gate can count authenticated callers by user id.

use crate::analytics::{api as analytics_api, AnalyticsStore};
use crate::auth::{
    api as auth_api, auth_middleware, require_admin, AuthState, CookieSettings, JwtHandler,
    SqliteRefreshLedger, TokenLifecycle, UserDirectory, UserStore,
};
use crate::config::AppConfig;
use crate::middleware::{request_logging, throttle_middleware, RequestGate, ThrottleState};
use crate::tasks::{api as tasks_api, TaskStore};
use crate::throttle::{AdminOverride, MemoryCounterStore, ThrottleConfig, ThrottleRegistry};
use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

const REGISTER: &[&str] = &["register", "burst"];
const LOGIN: &[&str] = &["login", "burst"];
const REFRESH: &[&str] = &["high_security", "burst"];
const SESSION: &[&str] = &["medium_security"];
const TASK_COLLECTION: &[&str] = &["task_create", "burst"];
const TASK_STATS: &[&str] = &["low_security"];
const TASK_ITEM: &[&str] = &["task_update", "burst"];
const ADMIN: &[&str] = &["admin_action"];

/// Every scope list used by the router, for startup verification
pub const ROUTE_SCOPES: &[&[&str]] = &[
    REGISTER,
    LOGIN,
    REFRESH,
    SESSION,
    TASK_COLLECTION,
    TASK_STATS,
    TASK_ITEM,
    ADMIN,
];

/// Everything the handlers and background tasks share
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub jwt: Arc<JwtHandler>,
    pub tasks: Arc<TaskStore>,
    pub analytics: Arc<AnalyticsStore>,
    pub gate: Arc<RequestGate>,
    pub throttle: ThrottleState,
}

impl AppState {
    /// Open the stores and assemble the gate from configuration.
    pub fn open(config: &AppConfig, throttle: &ThrottleConfig) -> Result<Self> {
        let db_path = config.database_path.as_str();

        let users = Arc::new(
            UserStore::with_cost(db_path, config.bcrypt_cost)
                .context("Failed to initialize user store")?,
        );
        let ledger =
            Arc::new(SqliteRefreshLedger::new(db_path).context("Failed to initialize token ledger")?);
        let tasks = Arc::new(TaskStore::new(db_path).context("Failed to initialize task store")?);
        let analytics = Arc::new(AnalyticsStore::new(db_path));

        let jwt = Arc::new(JwtHandler::with_lifetimes(
            config.jwt_secret.clone(),
            config.access_lifetime(),
            config.refresh_lifetime(),
        ));
        let tokens = Arc::new(
            TokenLifecycle::new(
                jwt.clone(),
                ledger,
                users.clone(),
                CookieSettings {
                    secure: config.production,
                    ..Default::default()
                },
            )
            .with_revoke_on_logout(config.revoke_on_logout),
        );

        let registry = Arc::new(ThrottleRegistry::from_config(throttle)?);
        let gate = Arc::new(
            RequestGate::new(
                registry,
                AdminOverride::new(throttle.admin_multiplier),
                Arc::new(MemoryCounterStore::new()),
            )
            .with_timeout(config.gate_timeout()),
        );

        let directory: Arc<dyn UserDirectory> = users.clone();
        let throttle = ThrottleState::new(gate.clone(), jwt.clone(), directory);

        Ok(Self {
            auth: AuthState::new(users, tokens),
            jwt,
            tasks,
            analytics,
            gate,
            throttle,
        })
    }

    /// Log every route scope the registry cannot resolve. Returns the missing ones.
    pub fn verify_scopes(&self) -> Vec<String> {
        let missing = self
            .gate
            .registry()
            .verify(ROUTE_SCOPES.iter().flat_map(|scopes| scopes.iter().copied()));
        if missing.is_empty() {
            info!("All route throttle scopes resolved");
        }
        missing
    }
}

fn throttled<S>(
    route: MethodRouter<S>,
    throttle: &ThrottleState,
    scopes: &'static [&'static str],
) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(middleware::from_fn_with_state(
        throttle.scoped(scopes),
        throttle_middleware,
    ))
}

/// Admin check sits inside the gate so it sees the role the gate resolved.
fn admin_only<S>(route: MethodRouter<S>) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(middleware::from_fn(require_admin))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Credentials are needed for the refresh cookie, which rules out wildcards.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    let t = &state.throttle;
    let require_auth = middleware::from_fn_with_state(state.jwt.clone(), auth_middleware);

    let auth_public = Router::new()
        .route(
            "/api/auth/register",
            throttled(post(auth_api::register), t, REGISTER),
        )
        .route("/api/auth/login", throttled(post(auth_api::login), t, LOGIN))
        .route(
            "/api/auth/refresh",
            throttled(post(auth_api::refresh), t, REFRESH),
        )
        .with_state(state.auth.clone());

    let auth_session = Router::new()
        .route(
            "/api/auth/logout",
            throttled(post(auth_api::logout), t, SESSION),
        )
        .route("/api/auth/me", throttled(get(auth_api::me), t, SESSION))
        .route_layer(require_auth.clone())
        .with_state(state.auth.clone());

    let task_routes = Router::new()
        .route(
            "/api/tasks",
            throttled(
                get(tasks_api::list_tasks).post(tasks_api::create_task),
                t,
                TASK_COLLECTION,
            ),
        )
        .route(
            "/api/tasks/stats",
            throttled(get(tasks_api::task_stats), t, TASK_STATS),
        )
        .route(
            "/api/tasks/:id",
            throttled(
                get(tasks_api::get_task)
                    .put(tasks_api::replace_task)
                    .patch(tasks_api::patch_task)
                    .delete(tasks_api::delete_task),
                t,
                TASK_ITEM,
            ),
        )
        .route(
            "/api/tasks/:id/complete",
            throttled(post(tasks_api::mark_completed), t, TASK_ITEM),
        )
        .route(
            "/api/tasks/:id/pending",
            throttled(post(tasks_api::mark_pending), t, TASK_ITEM),
        )
        .route(
            "/api/tasks/:id/toggle",
            throttled(post(tasks_api::toggle_completion), t, TASK_ITEM),
        )
        .route_layer(require_auth.clone())
        .with_state(state.tasks.clone());

    let analytics_routes = Router::new()
        .route(
            "/analytics/api/dashboard-stats",
            throttled(admin_only(get(analytics_api::dashboard_stats)), t, ADMIN),
        )
        .route(
            "/analytics/api/user-stats",
            throttled(admin_only(get(analytics_api::user_stats)), t, ADMIN),
        )
        .route(
            "/analytics/api/daily-stats",
            throttled(admin_only(get(analytics_api::daily_stats)), t, ADMIN),
        )
        .route(
            "/analytics/api/summary",
            throttled(admin_only(get(analytics_api::summary)), t, ADMIN),
        )
        .route_layer(require_auth)
        .with_state(state.analytics.clone());

    Router::new()
        .route("/health", get(health_check))
        .merge(auth_public)
        .merge(auth_session)
        .merge(task_routes)
        .merge(analytics_routes)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

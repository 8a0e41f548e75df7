//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build every subsystem from the configuration (pools, limiter, sessions, probes)
//! - Compile one middleware-wrapped service per route at startup
//! - Wire the fixed endpoints and the global middleware stack
//! - Dispatch everything else to the matching route service
//! - Run background tasks and serve until shutdown

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::{GatewayConfig, RouteConfig};
use crate::error::GatewayError;
use crate::health::{HealthChecker, ProbeSettings, StoreCheck, SystemHealthChecker};
use crate::http::client::build_http_client;
use crate::http::endpoints;
use crate::http::middleware::{
    self as mw, apply_route_middleware, metrics::RouteLabel, MiddlewareKind, MiddlewareServices,
    UnknownMiddleware,
};
use crate::http::proxy::{proxy_handler, ProxyState};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Backend, BackendPools, LoadBalancer};
use crate::observability::{MetricsSink, PrometheusSink};
use crate::routing::{RouteError, RouteTable};
use crate::security::headers::{cors_layer, preflight_no_content, security_headers};
use crate::security::{RateLimiter, SessionTokenService, StaticUserDirectory};
use crate::store::{CounterStore, MemoryStore};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("route `{route}`: {source}")]
    Middleware {
        route: String,
        #[source]
        source: UnknownMiddleware,
    },
    #[error("route `{route}`: invalid backend url `{url}`: {source}")]
    BackendUrl {
        route: String,
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Application state injected into the fixed endpoints.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    route_services: Arc<HashMap<String, Router>>,
    pub pools: Arc<BackendPools>,
    pub health: Arc<HealthChecker>,
    pub system: Arc<SystemHealthChecker>,
    pub sessions: Arc<SessionTokenService>,
    pub limiter: Arc<dyn RateLimiter>,
    pub store: MemoryStore,
    pub metrics: Arc<dyn MetricsSink>,
    pub started_at: Instant,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a server that reports through the global Prometheus recorder.
    pub fn new(config: GatewayConfig) -> Result<Self, BuildError> {
        Self::with_metrics(config, Arc::new(PrometheusSink))
    }

    pub fn with_metrics(
        config: GatewayConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, BuildError> {
        let store = MemoryStore::new();
        let shared_store: Arc<dyn CounterStore> = Arc::new(store.clone());

        let limiter = config.rate_limit.algorithm.build(
            shared_store.clone(),
            Duration::from_secs(config.rate_limit.window_secs.max(1)),
        );
        let users = Arc::new(StaticUserDirectory::from_config(&config.auth.users));
        let sessions = Arc::new(SessionTokenService::new(users, &config.auth));

        let health = Arc::new(HealthChecker::new(config.health_check.clone(), metrics.clone()));
        let mut system = SystemHealthChecker::new(Duration::from_secs(
            config.health_check.dependency_timeout_secs.max(1),
        ));
        system.register(Arc::new(StoreCheck::new(shared_store.clone())));

        let routes = RouteTable::from_config(&config.routes)?;
        let mut pools = BackendPools::new();
        for route in routes.routes() {
            let lb = build_pool(route.name(), route.config(), &config, &health)?;
            pools.insert(route.name(), lb);
        }
        let pools = Arc::new(pools);

        let services = MiddlewareServices {
            validator: sessions.clone(),
            exempt_paths: mw::auth::exempt_matchers(&config.auth.exempt_paths),
            limiter: limiter.clone(),
            store: shared_store,
            metrics: metrics.clone(),
            cors: config.cors.clone(),
        };
        let proxy_state = ProxyState {
            pools: pools.clone(),
            client: build_http_client(),
            metrics: metrics.clone(),
            max_body_size: config.security.max_body_size,
            max_response_size: config.server.max_response_size,
        };

        let mut route_services = HashMap::new();
        for route in routes.routes() {
            let chain = MiddlewareKind::chain_for(route.config()).map_err(|source| {
                BuildError::Middleware {
                    route: route.name().to_string(),
                    source,
                }
            })?;
            let service = Router::new()
                .fallback(proxy_handler)
                .with_state(proxy_state.clone());
            let service =
                apply_route_middleware(service, &chain, &services, route.name(), route.config());
            tracing::info!(
                route = %route.name(),
                prefix = %route.prefix(),
                method = %route.config().method,
                strategy = %route.config().load_balancer,
                middleware = ?chain.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "Route registered"
            );
            route_services.insert(route.name().to_string(), service);
        }

        let state = AppState {
            routes: Arc::new(routes),
            route_services: Arc::new(route_services),
            pools,
            health,
            system: Arc::new(system),
            sessions,
            limiter,
            store,
            metrics,
            started_at: Instant::now(),
        };

        let router = Self::build_router(&config, state.clone(), &services);
        Ok(Self {
            router,
            config,
            state,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &GatewayConfig,
        state: AppState,
        services: &MiddlewareServices,
    ) -> Router {
        let admin = admin::router().route_layer(middleware::from_fn_with_state(
            services.auth_state(),
            mw::auth::require_auth,
        ));

        let mut app = Router::new()
            .route("/health", get(endpoints::health))
            .route("/health/detailed", get(endpoints::health_detailed))
            .route("/auth/login", post(endpoints::login))
            .route("/auth/refresh", post(endpoints::refresh))
            .route("/auth/logout", post(endpoints::logout))
            .merge(admin)
            .fallback(dispatch_route)
            .with_state(state.clone())
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs)))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(cors_layer(&config.cors))
            .layer(middleware::from_fn(preflight_no_content));

        if config.security.enable_headers {
            app = app.layer(middleware::from_fn(security_headers));
        }

        app.layer(middleware::from_fn(mw::logging::log_request))
            .layer(middleware::from_fn_with_state(
                state.metrics.clone(),
                mw::metrics::record_metrics,
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router, for serving or for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.state.health
    }

    pub fn pools(&self) -> &Arc<BackendPools> {
        &self.state.pools
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Start background tasks, then serve until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: &Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, routes = self.state.routes.len(), "HTTP server starting");

        let health_task = if self.config.health_check.enabled {
            self.state.health.start(shutdown.subscribe())
        } else {
            tracing::info!("Active health checks disabled");
            None
        };

        let sweep_every = Duration::from_secs(self.config.store.sweep_interval_secs.max(1));
        tokio::spawn(self.state.store.clone().run_sweeper(sweep_every, shutdown.subscribe()));
        tokio::spawn(purge_sessions(
            self.state.sessions.clone(),
            sweep_every,
            shutdown.subscribe(),
        ));
        tokio::spawn(sweep_rate_limits(
            self.state.limiter.clone(),
            sweep_every,
            shutdown.subscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.signalled())
            .await?;

        self.state.health.stop();
        if let Some(task) = health_task {
            let _ = task.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn build_pool(
    route_name: &str,
    route: &RouteConfig,
    config: &GatewayConfig,
    health: &HealthChecker,
) -> Result<Arc<LoadBalancer>, BuildError> {
    let lb = Arc::new(LoadBalancer::new(route.load_balancer));
    for backend_config in &route.backends {
        let backend = Backend::from_config(backend_config).map_err(|source| BuildError::BackendUrl {
            route: route_name.to_string(),
            url: backend_config.url.clone(),
            source,
        })?;
        let backend = Arc::new(backend);
        lb.add_backend(backend.clone());

        let probe = ProbeSettings::resolve(&config.health_check, &backend_config.health_check);
        if probe.enabled {
            health.add_backend_with(route_name, backend.clone(), lb.clone(), probe);
        }
        tracing::info!(
            route = %route_name,
            backend = %backend.id(),
            weight = backend.weight(),
            "Backend added"
        );
    }
    Ok(lb)
}

async fn purge_sessions(
    sessions: Arc<SessionTokenService>,
    every: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => sessions.purge_expired(),
            _ = shutdown.recv() => break,
        }
    }
}

async fn sweep_rate_limits(
    limiter: Arc<dyn RateLimiter>,
    every: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Dropped idle rate limit buckets");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");
    GatewayError::Internal(detail.to_string()).into_response()
}

/// Fallback: match a configured route and hand the request to its service.
async fn dispatch_route(State(state): State<AppState>, mut req: Request<Body>) -> Response {
    let Some(route) = state
        .routes
        .match_request(req.method(), req.uri().path())
        .cloned()
    else {
        tracing::warn!(method = %req.method(), path = %req.uri().path(), "No route matched");
        return GatewayError::RouteNotFound(req.uri().path().to_string()).into_response();
    };

    let Some(service) = state.route_services.get(route.name()).cloned() else {
        tracing::error!(route = %route.name(), "Route has no compiled service");
        return GatewayError::MissingLoadBalancer(route.name().to_string()).into_response();
    };

    let label = RouteLabel(Arc::from(route.name()));
    req.extensions_mut().insert(route);
    let mut res = match service.oneshot(req).await {
        Ok(res) => res,
        Err(never) => match never {},
    };
    res.extensions_mut().insert(label);
    res
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("routes", &self.routes.len())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Json, Router, routing::get};
use serde_json::json;
use tokio::task::JoinHandle;
use tollgate_auth::config::to_time_duration;
use tollgate_auth::oauth::DeviceFlowSettings;
use tollgate_auth::storage::memory::{MemoryClientStorage, MemoryGrantStore, MemoryUserStorage};
use tollgate_auth::token::{KeyStoreConfig, TokenSettings};
use tollgate_auth::{
    AuthorizationEngine, ClientAuthenticator, ClientStorage, DeviceFlowEngine, GrantStore,
    KeyStore, OAuthState, PasswordHasher, TokenEndpoint, TokenIssuer, UserStorage, oauth_router,
};
use tollgate_auth_postgres::PostgresAuthStorage;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::bootstrap;
use crate::config::{AppConfig, StorageBackend};
use crate::housekeeping::Housekeeper;

pub struct TollgateServer {
    addr: SocketAddr,
    app: Router,
    housekeeper: Option<Housekeeper>,
}

/// Storage handles shared by every engine.
struct Stores {
    clients: Arc<dyn ClientStorage>,
    users: Arc<dyn UserStorage>,
    grants: Arc<dyn GrantStore>,
}

async fn open_stores(cfg: &AppConfig) -> anyhow::Result<Stores> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Stores {
                clients: Arc::new(MemoryClientStorage::new()),
                users: Arc::new(MemoryUserStorage::new()),
                grants: Arc::new(MemoryGrantStore::new()),
            })
        }
        StorageBackend::Postgres => {
            let pg = cfg
                .storage
                .postgres
                .as_ref()
                .context("storage.postgres must be set for the postgres backend")?;
            let storage = PostgresAuthStorage::connect(&pg.connection_url(), pg.pool_size)
                .await
                .context("failed to connect to PostgreSQL")?;
            if pg.apply_schema {
                storage
                    .apply_schema()
                    .await
                    .context("failed to apply database schema")?;
            }
            tracing::info!(database = %pg.database, pool_size = pg.pool_size, "Using PostgreSQL storage");
            Ok(Stores {
                clients: Arc::new(storage.clients()),
                users: Arc::new(storage.users()),
                grants: Arc::new(storage.grants()),
            })
        }
    }
}

struct Assembled {
    app: Router,
    housekeeper: Housekeeper,
}

async fn assemble(cfg: &AppConfig) -> anyhow::Result<Assembled> {
    let stores = open_stores(cfg).await?;
    let hasher = PasswordHasher::new(cfg.auth.password.iterations);

    let stats = bootstrap::seed(
        &cfg.bootstrap,
        stores.clients.as_ref(),
        stores.users.as_ref(),
        &hasher,
    )
    .await
    .context("failed to seed clients and users")?;
    if stats.clients_created + stats.users_created > 0 {
        tracing::info!(
            clients = stats.clients_created,
            users = stats.users_created,
            "Bootstrap data created"
        );
    }

    // Generate the first key up front so the first token request does not pay for it.
    let keys = Arc::new(KeyStore::new(KeyStoreConfig::from(&cfg.auth.signing)));
    {
        let keys = keys.clone();
        tokio::task::spawn_blocking(move || keys.ensure_initialized())
            .await
            .context("signing key task failed")??;
    }

    let issuer = TokenIssuer::new(keys.clone(), cfg.auth.issuer.clone(), cfg.auth.audience.clone())
        .with_clock_skew(to_time_duration(cfg.auth.tokens.clock_skew));

    let authorizations = Arc::new(AuthorizationEngine::new(
        stores.clients.clone(),
        stores.grants.clone(),
        to_time_duration(cfg.auth.tokens.authorization_code_lifetime),
    ));
    let devices = Arc::new(DeviceFlowEngine::new(
        stores.clients.clone(),
        stores.grants.clone(),
        DeviceFlowSettings::from(&cfg.auth.device),
    ));
    let tokens = Arc::new(TokenEndpoint::new(
        ClientAuthenticator::new(stores.clients.clone(), hasher),
        authorizations.clone(),
        devices.clone(),
        stores.grants.clone(),
        stores.users.clone(),
        issuer,
        TokenSettings::from(&cfg.auth.tokens),
    ));

    let state = OAuthState::new(authorizations, devices.clone(), tokens, stores.users.clone());

    let housekeeper = Housekeeper::new(
        stores.grants.clone(),
        keys,
        devices,
        cfg.housekeeping.interval,
    )
    .with_rotation_interval(cfg.auth.signing.rotation_interval);

    Ok(Assembled {
        app: router(cfg, state),
        housekeeper,
    })
}

fn router(cfg: &AppConfig, state: OAuthState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(cfg.request_timeout()));

    oauth_router(state)
        .route("/healthz", get(healthz))
        .layer(middleware)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Builds the full application router, including storage and signing keys.
///
/// Background housekeeping is not started.
///
/// # Errors
///
/// Returns an error if storage cannot be opened, seeding fails or the
/// first signing key cannot be generated.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    Ok(assemble(cfg).await?.app)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<TollgateServer> {
        let assembled = assemble(&self.config).await?;
        let housekeeper = self
            .config
            .housekeeping
            .enabled
            .then_some(assembled.housekeeper);

        Ok(TollgateServer {
            addr: self.addr,
            app: assembled.app,
            housekeeper,
        })
    }
}

impl TollgateServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let housekeeping: Option<JoinHandle<()>> = self.housekeeper.map(Housekeeper::spawn);

        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = housekeeping {
            handle.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

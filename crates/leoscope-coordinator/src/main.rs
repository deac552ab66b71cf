//! LEOScope coordinator binary.
//!
//! Serves the admission, query, and rendezvous API backed by the metadata
//! store.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leoscope_coordinator::{
    api, auth, Admission, AppState, AuthLayer, AuthState, CoordinatorConfig,
};
use leoscope_proto::{Role, User, UserId};
use leoscope_store::{ArtifactStore, MemoryMetaStore, MetaStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("leoscope_coordinator=info".parse()?),
        )
        .init();

    info!("LEOScope coordinator starting");

    let config: CoordinatorConfig = Figment::new()
        .merge(Toml::file("coordinator.toml"))
        .merge(Env::prefixed("LEOSCOPE_COORDINATOR_").split("__"))
        .extract()?;

    info!(listen_addr = %config.api.listen_addr, "configuration loaded");

    let store: Arc<dyn MetaStore> = Arc::new(MemoryMetaStore::new());
    let artifacts = Arc::new(ArtifactStore::new(&config.artifacts)?);

    bootstrap_admin(store.as_ref(), &config).await?;

    let state = Arc::new(AppState {
        store: store.clone(),
        artifacts,
        admission: Admission::new(),
    });
    let auth_layer = AuthLayer::new(Arc::new(AuthState {
        store,
        jwt_secret: config.auth.jwt_secret.clone(),
    }));

    let app = api::router(state, auth_layer)
        .layer(ConcurrencyLimitLayer::new(config.api.max_concurrency));

    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "coordinator API listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Ensure the bootstrap admin credential exists.
async fn bootstrap_admin(
    store: &dyn MetaStore,
    config: &CoordinatorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let admin_id = UserId::new(config.bootstrap.admin_id.as_str());
    if store.get_user(&admin_id).await?.is_some() {
        return Ok(());
    }

    let token = config
        .bootstrap
        .admin_token
        .clone()
        .unwrap_or_else(auth::generate_token);

    let admin = User {
        id: admin_id.clone(),
        name: "bootstrap admin".to_owned(),
        role: Role::Admin,
        team: "operators".to_owned(),
        token_hash: auth::hash_token(&token),
        created_at: chrono::Utc::now(),
    };
    store.insert_user(&admin).await?;

    if config.bootstrap.admin_token.is_none() {
        // Printed once; operators are expected to store it.
        info!(user = %admin_id, token = %token, "bootstrap admin created");
    } else {
        info!(user = %admin_id, "bootstrap admin created from configured token");
    }
    Ok(())
}

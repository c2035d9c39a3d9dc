use shared::{Config, StoreBackend};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::db;
use crate::domains::redemption::{
    CodeAdminService, CodeAdminStore, FactLog, MemoryStore, PgRedemptionStore, RedeemDelay,
    RedemptionService, RedemptionStore,
};

/// Estado compartido de la aplicación.
#[derive(Clone)]
pub struct AppState {
    /// Present only with the Postgres backend.
    pub db_pool: Option<PgPool>,
    pub redemption_service: Arc<RedemptionService>,
    pub admin_service: Arc<CodeAdminService>,
    pub jwt_secret: Arc<String>,
}

impl AppState {
    /// Builds the state for the configured backend. For Postgres this opens
    /// the pool and creates missing tables.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let delay = RedeemDelay::new(
            config.redeem.random_delay_ms_min,
            config.redeem.random_delay_ms_max,
        );

        let state = match config.redeem.store {
            StoreBackend::Postgres => {
                let pool = db::create_pool(&config.database).await?;
                db::schema::ensure_schema(&pool).await?;
                let store = Arc::new(PgRedemptionStore::new(pool.clone()));
                let mut state = Self::from_store(store, config.auth.jwt_secret.clone(), delay);
                state.db_pool = Some(pool);
                state
            }
            StoreBackend::Memory => {
                info!("🧪 Using in-memory redemption store");
                Self::from_store(
                    Arc::new(MemoryStore::new()),
                    config.auth.jwt_secret.clone(),
                    delay,
                )
            }
        };

        info!(backend = ?config.redeem.store, "🚀 Application state initialized");
        Ok(state)
    }

    /// Wires every service over one store.
    pub fn from_store<S>(store: Arc<S>, jwt_secret: String, delay: RedeemDelay) -> Self
    where
        S: RedemptionStore + FactLog + CodeAdminStore + 'static,
    {
        let redemption_service = RedemptionService::new(
            store.clone() as Arc<dyn RedemptionStore>,
            store.clone() as Arc<dyn FactLog>,
        )
        .with_delay(delay);
        let admin_service = CodeAdminService::new(store as Arc<dyn CodeAdminStore>);

        Self {
            db_pool: None,
            redemption_service: Arc::new(redemption_service),
            admin_service: Arc::new(admin_service),
            jwt_secret: Arc::new(jwt_secret),
        }
    }

    pub async fn database_healthy(&self) -> Option<bool> {
        match &self.db_pool {
            Some(pool) => Some(db::check_health(pool).await),
            None => None,
        }
    }
}

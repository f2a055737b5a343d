//! Process wiring shared by the carelog binaries.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use carelog_infra::command_dispatcher::{CommandHandlerMap, Dispatcher};
use carelog_infra::config::CarelogConfig;
use carelog_infra::db;
use carelog_infra::event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use carelog_infra::handlers::register_admission_handlers;
use carelog_infra::projections::{PatientDemographicsProjection, WardViewProjection};
use carelog_infra::read_model::{DocumentStore, InMemoryDocumentStore, PostgresDocumentStore};
use carelog_infra::repository::AggregateRepository;
use carelog_infra::workers::{ProjectionManager, ProjectionManagerHandle};

/// The two stores every process talks to.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub documents: Arc<dyn DocumentStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
        }
    }

    /// Postgres-backed stores; the schema is created if missing.
    pub async fn postgres(database_url: &str, config: &CarelogConfig) -> anyhow::Result<Self> {
        let pool = db::connect(database_url)
            .await
            .context("failed to connect to postgres")?;
        db::migrate(&pool).await.context("failed to apply schema")?;

        Ok(Self {
            events: Arc::new(PostgresEventStore::with_config(
                pool.clone(),
                config.event_store(),
            )),
            documents: Arc::new(PostgresDocumentStore::new(pool)),
        })
    }

    /// Postgres when `DATABASE_URL` is set, otherwise in-memory.
    pub async fn from_config(config: &CarelogConfig) -> anyhow::Result<Self> {
        match &config.database_url {
            Some(url) => Self::postgres(url, config).await,
            None => {
                warn!("DATABASE_URL not set; using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }
}

pub fn dispatcher(stores: &Stores) -> anyhow::Result<Dispatcher> {
    let repository = AggregateRepository::new(Arc::clone(&stores.events));
    let map = register_admission_handlers(CommandHandlerMap::builder(), repository)?.build();
    info!(commands = ?map.command_types(), "command handlers registered");
    Ok(Dispatcher::new(map))
}

/// Start the patient demographics and ward view projections.
pub async fn start_projections(
    stores: &Stores,
    config: &CarelogConfig,
    ct: CancellationToken,
) -> anyhow::Result<ProjectionManagerHandle> {
    let handle = ProjectionManager::new(
        Arc::clone(&stores.events),
        Arc::clone(&stores.documents),
        config.projection_manager(),
    )
    .register(PatientDemographicsProjection::new(Arc::clone(&stores.documents)))?
    .register(WardViewProjection::new(Arc::clone(&stores.documents)))?
    .start(ct)
    .await?;
    Ok(handle)
}

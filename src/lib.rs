pub mod adapters;
pub mod config;
pub mod directory;
pub mod matching;
pub mod services;
pub mod storage;

use std::sync::Arc;

use anyhow::Context;
use dimse::OutboundAssociator;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::adapters::{DimseAdapter, ExecutionContext};
use crate::config::{Config, LoggingConfig};
use crate::directory::StaticAeDirectory;
use crate::services::ServiceRegistry;
use crate::storage::{create_object_store, ObjectStore};

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// the configured level.
pub fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.log_level))
        .context("invalid log filter")?;

    if logging.log_to_file {
        let path = std::path::Path::new(&logging.log_file_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        let file_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(Arc::new(file));
        let stdout_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_appender)
            .with(stdout_appender)
            .try_init()
            .context("failed to initialize logging")?;
    } else {
        let stdout_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_appender)
            .try_init()
            .context("failed to initialize logging")?;
    }
    Ok(())
}

/// The service provider core: object store plus the services built on it
#[derive(Debug)]
pub struct ScpCore {
    pub config: Config,
    pub store: Arc<dyn ObjectStore>,
    pub registry: Arc<ServiceRegistry>,
}

impl ScpCore {
    /// Open the object store and register the enabled services. The
    /// associator is the transport's outbound capability used by C-MOVE.
    pub fn from_config(
        config: Config,
        associator: Arc<dyn OutboundAssociator>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let store = create_object_store(&config.storage)
            .with_context(|| format!("failed to open object store at {}", config.storage.path()))?;
        let directory = Arc::new(StaticAeDirectory::new(config.ae_titles.clone()));
        let registry = ServiceRegistry::standard(
            &config.scp,
            &config.services.storage_sop_classes,
            store.clone(),
            directory,
            associator,
        );

        tracing::info!(
            "🔧 {} ready: {} SOP classes, store at {}",
            config.scp.local_aet,
            registry.sop_classes().len(),
            config.storage.path()
        );

        Ok(Self {
            config,
            store,
            registry: Arc::new(registry),
        })
    }

    /// Adapter running requests on the transport's worker pool
    pub fn adapter(&self, context: ExecutionContext) -> DimseAdapter {
        DimseAdapter::new(self.registry.clone(), context)
    }

    /// Adapter on the current runtime, sized by `max_associations`
    pub fn default_adapter(&self) -> DimseAdapter {
        self.adapter(ExecutionContext::current(
            self.config.scp.max_associations as usize,
        ))
    }
}

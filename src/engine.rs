//! Engine assembly — builds the routing, transport and session layers from
//! one `EngineConfig`.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{load_engine_config, ConfigError, EngineConfig};
use crate::routing::directory::RoutingDirectoryClient;
use crate::routing::entities::EntityStore;
use crate::routing::errors::RoutingError;
use crate::routing::selector::DispatchTargetSelector;
use crate::session::manager::SessionManager;
use crate::transport::client::HttpStreamTransport;
use crate::transport::errors::TransportError;
use crate::transport::exchange::StreamingTransport;

/// Startup failures. Nothing after startup is reported through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A fully wired routing and session engine.
pub struct Engine {
    config: EngineConfig,
    directory: Arc<RoutingDirectoryClient>,
    selector: Arc<DispatchTargetSelector>,
    sessions: SessionManager,
}

impl Engine {
    /// Build the engine with the HTTP streaming transport.
    pub fn new(config: EngineConfig, entities: Arc<dyn EntityStore>) -> Result<Self, EngineError> {
        let transport = Arc::new(HttpStreamTransport::from_config(&config.transport)?);
        Self::with_transport(config, entities, transport)
    }

    /// Build the engine around a caller-supplied transport.
    pub fn with_transport(
        config: EngineConfig,
        entities: Arc<dyn EntityStore>,
        transport: Arc<dyn StreamingTransport>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let directory = Arc::new(RoutingDirectoryClient::from_config(&config.routing)?);
        let selector = Arc::new(DispatchTargetSelector::new(
            &config.routing,
            Arc::clone(&directory),
            entities,
        )?);
        let sessions = SessionManager::new(&config, Arc::clone(&selector), transport);

        tracing::info!(
            directory_url = %config.routing.directory_url,
            static_fallback = %selector.static_fallback(),
            default_workflow = ?config.routing.default_workflow_id,
            fallback_policy = ?config.session.fallback_policy,
            "engine ready"
        );

        Ok(Self {
            config,
            directory,
            selector,
            sessions,
        })
    }

    /// Load `turnrelay.yaml` from `path` and build the engine.
    pub fn from_config_file(path: &Path, entities: Arc<dyn EntityStore>) -> Result<Self, EngineError> {
        let config = load_engine_config(path)?;
        Self::new(config, entities)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<RoutingDirectoryClient> {
        &self.directory
    }

    pub fn selector(&self) -> &Arc<DispatchTargetSelector> {
        &self.selector
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Close every live session.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        tracing::info!("engine stopped");
    }
}

use std::time::Duration;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;

use super::entity::EntityIds;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::service::ServiceRegistry;
use crate::config::Config;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Channel types for messages FROM integrations TO the engine
/// These are bounded channels to provide backpressure
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Channel types for messages FROM the engine TO integrations (unbounded - engine must not block)
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// Result type for integration factory functions
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// Everything an integration may touch on the host during setup.
#[derive(Debug, Clone)]
pub struct Host {
    /// Sender for events back to the engine
    pub tx: FromIntegrationSender,

    /// Shared service registry
    pub services: ServiceRegistry,

    /// Shared entity ID allocator
    pub entity_ids: EntityIds,
}

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// The device or service behind the integration is not reachable yet.
    /// The engine retries setup later.
    #[error("integration not ready: {0}")]
    NotReady(#[source] BoxError),

    #[error(transparent)]
    Failed(BoxError),
}

impl IntegrationError {
    pub fn failed(e: impl Into<BoxError>) -> Self {
        Self::Failed(e.into())
    }
}

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Set up the integration: connect to devices, register entities and services.
    ///
    /// Returning `IntegrationError::NotReady` makes the engine call `setup` again later.
    async fn setup(&mut self, host: &Host) -> Result<(), IntegrationError>;

    /// Handle a command from the engine
    async fn handle_message(&mut self, msg: ToIntegrationMessage) -> Result<(), IntegrationError>;

    /// How often the engine should call `poll`, if at all
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic refresh, driven by the engine
    async fn poll(&mut self) -> Result<(), IntegrationError> {
        Ok(())
    }

    /// Shut down the integration gracefully
    async fn shutdown(&mut self) -> Result<(), IntegrationError>;
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::entity::EntityIds;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Host;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::IntegrationError;
use super::integration::ToIntegrationSender;
use super::message::ClimateCommand;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::service::ServiceName;
use super::service::ServiceRegistry;
use super::state::State;

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Delay between setup attempts of an integration that is not ready
const DEFAULT_SETUP_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// How long `shutdown` waits for an integration task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No integration found for entity: {0}")]
    UnknownEntity(String),

    #[error("Service not registered: {0}")]
    UnknownService(String),

    #[error("Integration channel not found: {0}")]
    IntegrationUnavailable(String),

    #[error("Engine lock poisoned")]
    Poisoned,
}

/// miheaterd engine
///
/// This structure runs integrations, routes commands and service calls to them, and
/// maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    services: ServiceRegistry,
    entity_ids: EntityIds,

    setup_retry_interval: Duration,

    /// Handles for integration tasks
    integration_handles: Mutex<Vec<JoinHandle<()>>>,

    stop: Notify,
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            services: ServiceRegistry::new(),
            entity_ids: EntityIds::default(),
            setup_retry_interval: DEFAULT_SETUP_RETRY_INTERVAL,
            integration_handles: Mutex::new(Vec::new()),
            stop: Notify::new(),
        }
    }

    /// Change how long a not-ready integration waits before its next setup attempt.
    /// Only affects integrations registered afterwards.
    pub fn with_setup_retry_interval(mut self, interval: Duration) -> Self {
        self.setup_retry_interval = interval;
        self
    }

    /// Register integrations from configuration
    ///
    /// Runs every registered factory; factories return None when their section is absent.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, integration: Box<dyn Integration>) {
        let (to_integration_tx, to_integration_rx) = mpsc::unbounded_channel();
        let host = Host {
            tx: self.message_tx.clone(),
            services: self.services.clone(),
            entity_ids: self.entity_ids.clone(),
        };

        if let Ok(channels) = self.integration_channels.get_mut() {
            channels.insert(name.clone(), to_integration_tx);
        }

        let handle = tokio::spawn(run_integration(
            name,
            integration,
            host,
            to_integration_rx,
            self.setup_retry_interval,
        ));

        self.integration_handles.get_mut().push(handle);
    }

    /// Send a command to a climate entity
    ///
    /// Routes the command to the integration that owns the entity.
    pub fn send_climate_command(
        &self,
        entity_id: &str,
        command: ClimateCommand,
    ) -> Result<(), EngineError> {
        let integration_name = {
            let map = self
                .entity_integration_map
                .lock()
                .map_err(|_| EngineError::Poisoned)?;
            map.get(entity_id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownEntity(entity_id.to_string()))?
        };

        self.send_to_integration(
            &integration_name,
            ToIntegrationMessage::ClimateCommand {
                entity_id: entity_id.to_string(),
                command,
            },
        )
    }

    /// Invoke a service registered by an integration
    pub fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> Result<(), EngineError> {
        let service = ServiceName::new(domain, service);
        let owner = self
            .services
            .owner(&service)
            .ok_or_else(|| EngineError::UnknownService(service.to_string()))?;

        info!("Calling service {} (owned by {})", service, owner);
        self.send_to_integration(&owner, ToIntegrationMessage::CallService { service, data })
    }

    fn send_to_integration(
        &self,
        integration_name: &str,
        msg: ToIntegrationMessage,
    ) -> Result<(), EngineError> {
        let channels = self
            .integration_channels
            .lock()
            .map_err(|_| EngineError::Poisoned)?;

        let tx = channels
            .get(integration_name)
            .ok_or_else(|| EngineError::IntegrationUnavailable(integration_name.to_string()))?;

        tx.send(msg)
            .map_err(|_| EngineError::IntegrationUnavailable(integration_name.to_string()))
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Run the engine's main event loop until `shutdown` is called
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_event(msg),
                    None => break,
                },
                _ = self.stop.notified() => break,
            }
        }

        info!("Engine shutting down");
    }

    /// Stop all integrations and the event loop
    pub async fn shutdown(&self) {
        // Closing the command channels ends each integration's loop
        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.clear();
        }

        let handles = std::mem::take(&mut *self.integration_handles.lock().await);
        for mut handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("Integration task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.stop.notify_one();
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                unique_id,
                platform,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} ({} platform, unique_id={:?}, from {})",
                    entity_id, platform, unique_id, integration_name
                );

                // State is not populated until the first state-change message arrives.
                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.insert(entity_id, integration_name);
                }
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.climates.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.remove(&entity_id);
                }
                self.entity_ids.release(&entity_id);
            }
            FromIntegrationMessage::ClimateStateChanged { entity_id, state } => {
                info!(
                    "Climate state changed: {} -> available={}, mode={:?}, current={:?}, target={:?}",
                    entity_id,
                    state.available,
                    state.hvac_mode,
                    state.current_temperature,
                    state.target_temperature
                );

                let mut snapshot = State::clone(&self.state.load());
                snapshot.climates.insert(entity_id, state);
                self.state.store(Arc::new(snapshot));
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of an integration task: setup (retried while not ready), then commands and polls
/// until the engine closes the command channel.
async fn run_integration(
    name: String,
    mut integration: Box<dyn Integration>,
    host: Host,
    mut commands: mpsc::UnboundedReceiver<ToIntegrationMessage>,
    setup_retry_interval: Duration,
) {
    loop {
        match integration.setup(&host).await {
            Ok(()) => break,
            Err(IntegrationError::NotReady(e)) => {
                warn!(
                    "Integration '{}' not ready, retrying in {:?}: {}",
                    name, setup_retry_interval, e
                );
                let retry = tokio::time::sleep(setup_retry_interval);
                tokio::pin!(retry);
                loop {
                    tokio::select! {
                        _ = &mut retry => break,
                        msg = commands.recv() => match msg {
                            Some(msg) => {
                                debug!("Integration '{}' not set up, dropping {:?}", name, msg);
                            }
                            None => {
                                info!("Integration '{}' stopped before setup completed", name);
                                return;
                            }
                        },
                    }
                }
            }
            Err(e) => {
                error!("Integration '{}' setup failed: {}", name, e);
                return;
            }
        }
    }
    info!("Integration '{}' set up", name);

    let mut ticker = integration.poll_interval().map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            msg = commands.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }
            _ = next_tick(&mut ticker) => {
                if let Err(e) = integration.poll().await {
                    warn!("Integration '{}' poll failed: {}", name, e);
                }
            }
        }
    }

    if let Err(e) = integration.shutdown().await {
        warn!("Integration '{}' shutdown failed: {}", name, e);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

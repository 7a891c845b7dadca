//! Type-safe message system for miheaterd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use super::service::ServiceName;
use super::state::ClimateState;
use super::state::HvacMode;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// An entity was set up and registered
    EntityDiscovered {
        entity_id: String,
        unique_id: Option<String>,
        platform: &'static str,
        integration_name: String,
    },

    /// An entity went away
    EntityRemoved { entity_id: String },

    /// A climate entity's state changed (or was refreshed)
    ClimateStateChanged {
        entity_id: String,
        state: ClimateState,
    },
}

/// Actions the engine can ask of a climate entity
#[derive(Debug, Clone, PartialEq)]
pub enum ClimateCommand {
    TurnOn,
    TurnOff,
    SetTemperature { temperature: Option<f64> },
    SetHvacMode { mode: HvacMode },
    Refresh,
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone)]
pub enum ToIntegrationMessage {
    /// Command for one of the integration's climate entities
    ClimateCommand {
        entity_id: String,
        command: ClimateCommand,
    },

    /// Invocation of a service the integration registered
    CallService {
        service: ServiceName,
        data: serde_json::Value,
    },
}

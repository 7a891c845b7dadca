mod engine;
mod entity;
mod integration;
mod message;
mod service;
mod state;

pub use engine::Engine;
pub use engine::EngineError;
pub use entity::ClimateEntity;
pub use entity::ClimateFeatures;
pub use entity::CommandOutcome;
pub use entity::Entity;
pub use entity::EntityError;
pub use integration::FromIntegrationSender;
pub use integration::Host;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationError;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::ClimateCommand;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use service::ServiceName;
pub use service::ServiceRegistration;
pub use state::ClimateState;
pub use state::HvacMode;
pub use state::State;
pub use state::TemperatureUnit;

pub mod config;
mod engine;
mod integrations;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::ClimateCommand;
pub use engine::ClimateState;
pub use engine::Engine;
pub use engine::EngineError;
pub use engine::HvacMode;
pub use engine::State;
pub use engine::TemperatureUnit;
pub use integrations::miheater::MiHeaterConfig;

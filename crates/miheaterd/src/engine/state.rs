use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use super::entity::ClimateEntity;

/// Operating mode of a climate entity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
    Auto,
    Dry,
    FanOnly,
}

/// Unit a climate entity reports temperatures in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum TemperatureUnit {
    #[strum(serialize = "°C")]
    Celsius,
    #[strum(serialize = "°F")]
    Fahrenheit,
}

/// State of a climate entity as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateState {
    pub name: String,

    /// False while the entity cannot reach its device.
    pub available: bool,

    /// None until the entity has read its device at least once.
    pub is_on: Option<bool>,
    pub hvac_mode: Option<HvacMode>,
    pub hvac_modes: Vec<HvacMode>,

    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub target_temperature_step: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub temperature_unit: TemperatureUnit,
    pub supported_features: u32,

    /// Raw device attributes, if any.
    pub attributes: Option<serde_json::Value>,
}

impl ClimateState {
    /// Capture the current view of a climate entity.
    pub fn from_entity(entity: &dyn ClimateEntity) -> Self {
        Self {
            name: entity.name().to_string(),
            available: entity.available(),
            is_on: entity.is_on().ok(),
            hvac_mode: entity.hvac_mode().ok(),
            hvac_modes: entity.hvac_modes().to_vec(),
            current_temperature: entity.current_temperature().ok(),
            target_temperature: entity.target_temperature().ok(),
            target_temperature_step: entity.target_temperature_step(),
            min_temp: entity.min_temp(),
            max_temp: entity.max_temp(),
            temperature_unit: entity.temperature_unit(),
            supported_features: entity.supported_features().bits(),
            attributes: entity.state_attributes(),
        }
    }
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub climates: HashMap<String, ClimateState>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_hvac_mode_strings() {
        assert_eq!(HvacMode::from_str("heat").unwrap(), HvacMode::Heat);
        assert_eq!(HvacMode::from_str("fan_only").unwrap(), HvacMode::FanOnly);
        assert_eq!(HvacMode::HeatCool.to_string(), "heat_cool");
        assert!(HvacMode::from_str("boost").is_err());
    }

    #[test]
    fn test_hvac_mode_serde_matches_display() {
        let json = serde_json::to_string(&HvacMode::FanOnly).unwrap();
        assert_eq!(json, "\"fan_only\"");

        let mode: HvacMode = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(mode, HvacMode::Off);
    }

    #[test]
    fn test_temperature_unit_display() {
        assert_eq!(TemperatureUnit::Celsius.to_string(), "°C");
    }
}

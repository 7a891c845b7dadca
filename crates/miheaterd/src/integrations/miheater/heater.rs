use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::client::DeviceClient;
use super::client::DeviceError;
use crate::engine::ClimateEntity;
use crate::engine::ClimateFeatures;
use crate::engine::CommandOutcome;
use crate::engine::Entity;
use crate::engine::EntityError;
use crate::engine::HvacMode;
use crate::engine::TemperatureUnit;

pub const MIN_TEMP: f64 = 16.0;
pub const MAX_TEMP: f64 = 38.0;
pub const TEMPERATURE_STEP: f64 = 1.0;

const HVAC_MODES: &[HvacMode] = &[HvacMode::Heat, HvacMode::Off];

/// Last successful read of the heater's properties.
///
/// Only ever built from a complete fetch, so no field is ever missing. The device replies are
/// kept as received for the attribute dump.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    is_on: bool,
    target_temperature: f64,
    current_temperature: f64,
    raw: Value,
}

/// `power` is boolean-like: `1`, `1.0` and `true` mean on, anything else off
fn power_is_on(power: &Value) -> bool {
    match power {
        Value::Bool(on) => *on,
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

/// Climate entity backed by a Xiaomi heater
pub struct MiHeater<C: DeviceClient> {
    device: C,
    entity_id: String,
    unique_id: String,
    name: String,
    snapshot: Option<Snapshot>,
    available: bool,
}

impl<C: DeviceClient> MiHeater<C> {
    /// Wrap a device client. The entity has no state until `update` succeeds.
    pub fn new(device: C, entity_id: String, unique_id: String, name: String) -> Self {
        Self {
            device,
            entity_id,
            unique_id,
            name,
            snapshot: None,
            available: false,
        }
    }

    /// Give the device client back, e.g. after a failed first fetch
    pub fn into_device(self) -> C {
        self.device
    }

    fn require_snapshot(&self) -> Result<&Snapshot, EntityError> {
        self.snapshot.as_ref().ok_or(EntityError::NoState)
    }

    /// Read one property; the device answers with a non-empty list
    async fn get_prop(&mut self, prop: &str) -> Result<Vec<Value>, DeviceError> {
        let reply = self.device.send("get_prop", vec![json!(prop)]).await?;
        match reply {
            Value::Array(values) if !values.is_empty() => Ok(values),
            other => Err(DeviceError::UnexpectedResponse {
                method: format!("get_prop {}", prop),
                detail: other.to_string(),
            }),
        }
    }

    /// Read a temperature property as a number of degrees
    async fn get_temperature(&mut self, prop: &str) -> Result<(f64, Vec<Value>), DeviceError> {
        let values = self.get_prop(prop).await?;
        let degrees = values.first().and_then(Value::as_f64).ok_or_else(|| {
            DeviceError::UnexpectedResponse {
                method: format!("get_prop {}", prop),
                detail: Value::Array(values.clone()).to_string(),
            }
        })?;
        Ok((degrees, values))
    }

    /// Read all three properties. Any failure discards the whole attempt.
    async fn fetch_snapshot(&mut self) -> Result<Snapshot, DeviceError> {
        let power = self.get_prop("power").await?;
        let (target_temperature, target) = self.get_temperature("temps").await?;
        let (current_temperature, current) = self.get_temperature("tempi").await?;

        Ok(Snapshot {
            is_on: power.first().is_some_and(power_is_on),
            target_temperature,
            current_temperature,
            raw: json!({
                "power": power,
                "target_temperature": target,
                "current_temperature": current,
            }),
        })
    }

    async fn set_power(&mut self, on: bool) -> Result<CommandOutcome, EntityError> {
        info!("[{}] Turning {}", self.entity_id, if on { "on" } else { "off" });
        self.device
            .send("set_power", vec![json!(if on { 1 } else { 0 })])
            .await
            .map_err(|e| EntityError::Command(Box::new(e)))?;
        Ok(CommandOutcome::Applied)
    }
}

impl<C: DeviceClient> Entity for MiHeater<C> {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn unique_id(&self) -> Option<&str> {
        Some(&self.unique_id)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &'static str {
        "climate"
    }

    fn available(&self) -> bool {
        self.available
    }
}

#[async_trait]
impl<C: DeviceClient> ClimateEntity for MiHeater<C> {
    fn hvac_mode(&self) -> Result<HvacMode, EntityError> {
        if self.is_on()? {
            Ok(HvacMode::Heat)
        } else {
            Ok(HvacMode::Off)
        }
    }

    fn hvac_modes(&self) -> &'static [HvacMode] {
        HVAC_MODES
    }

    fn supported_features(&self) -> ClimateFeatures {
        ClimateFeatures::TARGET_TEMPERATURE
    }

    fn temperature_unit(&self) -> TemperatureUnit {
        TemperatureUnit::Celsius
    }

    fn current_temperature(&self) -> Result<f64, EntityError> {
        Ok(self.require_snapshot()?.current_temperature)
    }

    fn target_temperature(&self) -> Result<f64, EntityError> {
        Ok(self.require_snapshot()?.target_temperature)
    }

    fn target_temperature_step(&self) -> f64 {
        TEMPERATURE_STEP
    }

    fn min_temp(&self) -> f64 {
        MIN_TEMP
    }

    fn max_temp(&self) -> f64 {
        MAX_TEMP
    }

    fn is_on(&self) -> Result<bool, EntityError> {
        Ok(self.require_snapshot()?.is_on)
    }

    fn state_attributes(&self) -> Option<Value> {
        self.snapshot.as_ref().map(|snapshot| snapshot.raw.clone())
    }

    async fn turn_on(&mut self) -> Result<CommandOutcome, EntityError> {
        self.set_power(true).await
    }

    async fn turn_off(&mut self) -> Result<CommandOutcome, EntityError> {
        self.set_power(false).await
    }

    async fn set_temperature(
        &mut self,
        temperature: Option<f64>,
    ) -> Result<CommandOutcome, EntityError> {
        let Some(temperature) = temperature else {
            debug!("[{}] No temperature given, nothing to set", self.entity_id);
            return Ok(CommandOutcome::Ignored);
        };
        if !temperature.is_finite() {
            warn!(
                "[{}] Ignoring non-finite target temperature {}",
                self.entity_id, temperature
            );
            return Ok(CommandOutcome::Ignored);
        }

        // Truncate toward zero
        let degrees = temperature.trunc() as i64;
        info!("[{}] Setting target temperature to {}", self.entity_id, degrees);
        self.device
            .send("set_temps", vec![json!(degrees)])
            .await
            .map_err(|e| EntityError::Command(Box::new(e)))?;
        Ok(CommandOutcome::Applied)
    }

    async fn set_hvac_mode(&mut self, mode: HvacMode) -> Result<CommandOutcome, EntityError> {
        match mode {
            HvacMode::Heat | HvacMode::Cool => self.turn_on().await,
            HvacMode::Off => self.turn_off().await,
            other => {
                error!("[{}] Unrecognized operation mode: {}", self.entity_id, other);
                Ok(CommandOutcome::Ignored)
            }
        }
    }

    /// Re-read the heater. On failure the previous snapshot stays readable and the entity
    /// is marked unavailable until a later refresh succeeds.
    async fn update(&mut self) -> Result<(), EntityError> {
        match self.fetch_snapshot().await {
            Ok(snapshot) => {
                debug!("[{}] Fetched {:?}", self.entity_id, snapshot);
                self.snapshot = Some(snapshot);
                self.available = true;
                Ok(())
            }
            Err(e) => {
                error!(
                    "[{}] Failed to get_prop from Xiaomi heater: {:?}",
                    self.entity_id, e
                );
                self.available = false;
                Err(EntityError::NotReady(Box::new(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::miheater::client::MockDeviceClient;

    async fn heater(mock: &MockDeviceClient) -> MiHeater<MockDeviceClient> {
        let mut heater = MiHeater::new(
            mock.clone(),
            "climate.bedroom_heater".to_string(),
            "zhimi.heater.za1-28:6C:07:AA:BB:CC".to_string(),
            "Bedroom heater".to_string(),
        );
        heater.update().await.unwrap();
        mock.calls.lock().unwrap().clear();
        heater
    }

    #[tokio::test]
    async fn test_reads_before_first_fetch_fail() {
        let heater = MiHeater::new(
            MockDeviceClient::new(),
            "climate.bedroom_heater".to_string(),
            "zhimi.heater.za1-28:6C:07:AA:BB:CC".to_string(),
            "Bedroom heater".to_string(),
        );

        assert!(matches!(heater.is_on(), Err(EntityError::NoState)));
        assert!(matches!(heater.hvac_mode(), Err(EntityError::NoState)));
        assert!(matches!(heater.target_temperature(), Err(EntityError::NoState)));
        assert!(heater.state_attributes().is_none());
        assert!(!heater.available());
    }

    #[tokio::test]
    async fn test_update_reads_three_properties() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        heater.update().await.unwrap();

        let props: Vec<_> = mock.calls_to("get_prop");
        assert_eq!(props, vec![vec![json!("power")], vec![json!("temps")], vec![json!("tempi")]]);
        assert_eq!(heater.target_temperature().unwrap(), 22.0);
        assert_eq!(heater.current_temperature().unwrap(), 19.0);
        assert!(heater.available());
    }

    #[tokio::test]
    async fn test_mode_follows_power() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        for (power, on) in [(1, true), (0, false), (2, false)] {
            mock.set_prop("power", json!([power]));
            heater.update().await.unwrap();

            assert_eq!(heater.is_on().unwrap(), on);
            let expected = if on { HvacMode::Heat } else { HvacMode::Off };
            assert_eq!(heater.hvac_mode().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_fixed_properties() {
        let mock = MockDeviceClient::new();
        let heater = heater(&mock).await;

        assert_eq!(heater.hvac_modes(), &[HvacMode::Heat, HvacMode::Off]);
        assert_eq!(heater.temperature_unit(), TemperatureUnit::Celsius);
        assert_eq!(heater.target_temperature_step(), 1.0);
        assert_eq!(heater.min_temp(), 16.0);
        assert_eq!(heater.max_temp(), 38.0);
        assert_eq!(heater.supported_features(), ClimateFeatures::TARGET_TEMPERATURE);
        assert_eq!(heater.platform(), "climate");
        assert_eq!(heater.unique_id(), Some("zhimi.heater.za1-28:6C:07:AA:BB:CC"));
    }

    #[tokio::test]
    async fn test_state_attributes_keep_device_shape() {
        let mock = MockDeviceClient::new();
        let heater = heater(&mock).await;

        let attributes = heater.state_attributes().unwrap();
        insta::assert_snapshot!(
            attributes.to_string(),
            @r#"{"current_temperature":[19],"power":[1],"target_temperature":[22]}"#
        );
    }

    #[tokio::test]
    async fn test_set_temperature_without_value_is_noop() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        let outcome = heater.set_temperature(None).await.unwrap();

        assert_eq!(outcome, CommandOutcome::Ignored);
        assert!(mock.calls_to("set_temps").is_empty());
    }

    #[tokio::test]
    async fn test_set_temperature_truncates() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        let outcome = heater.set_temperature(Some(21.9)).await.unwrap();

        assert_eq!(outcome, CommandOutcome::Applied);
        assert_eq!(mock.calls_to("set_temps"), vec![vec![json!(21)]]);
    }

    #[tokio::test]
    async fn test_set_temperature_ignores_nan() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        let outcome = heater.set_temperature(Some(f64::NAN)).await.unwrap();

        assert_eq!(outcome, CommandOutcome::Ignored);
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_hvac_mode() {
        let cases = [
            (HvacMode::Off, Some(0)),
            (HvacMode::Heat, Some(1)),
            (HvacMode::Cool, Some(1)),
            (HvacMode::FanOnly, None),
            (HvacMode::Auto, None),
        ];

        for (mode, power) in cases {
            let mock = MockDeviceClient::new();
            let mut heater = heater(&mock).await;

            let outcome = heater.set_hvac_mode(mode).await.unwrap();

            match power {
                Some(power) => {
                    assert_eq!(outcome, CommandOutcome::Applied, "{mode}");
                    assert_eq!(mock.calls_to("set_power"), vec![vec![json!(power)]], "{mode}");
                }
                None => {
                    assert_eq!(outcome, CommandOutcome::Ignored, "{mode}");
                    assert!(mock.calls.lock().unwrap().is_empty(), "{mode}");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_actions_do_not_touch_snapshot() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;
        let before = heater.state_attributes();

        heater.turn_off().await.unwrap();
        heater.set_temperature(Some(30.0)).await.unwrap();

        assert_eq!(heater.state_attributes(), before);
        assert!(mock.calls_to("get_prop").is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_propagates() {
        let mut mock = MockDeviceClient::new();
        mock.fail_commands = true;
        let mut heater = heater(&mock).await;

        let err = heater.turn_on().await.unwrap_err();
        assert!(matches!(err, EntityError::Command(_)));

        let err = heater.set_temperature(Some(20.0)).await.unwrap_err();
        assert!(matches!(err, EntityError::Command(_)));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_snapshot() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        mock.set_prop("temps", json!([25]));
        mock.fail_prop("tempi");
        let err = heater.update().await.unwrap_err();

        assert!(matches!(err, EntityError::NotReady(_)));
        assert!(!heater.available());
        // Nothing from the failed attempt leaks into the snapshot
        assert_eq!(heater.target_temperature().unwrap(), 22.0);
        assert_eq!(heater.current_temperature().unwrap(), 19.0);

        mock.recover_prop("tempi");
        heater.update().await.unwrap();
        assert!(heater.available());
        assert_eq!(heater.target_temperature().unwrap(), 25.0);
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_fetch() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        mock.set_prop("power", json!([]));
        assert!(matches!(heater.update().await, Err(EntityError::NotReady(_))));

        mock.set_prop("power", json!(1));
        assert!(matches!(heater.update().await, Err(EntityError::NotReady(_))));

        mock.set_prop("power", json!([1]));
        mock.set_prop("tempi", json!(["warm"]));
        assert!(matches!(heater.update().await, Err(EntityError::NotReady(_))));

        assert!(heater.is_on().unwrap());
        assert_eq!(heater.current_temperature().unwrap(), 19.0);
    }

    #[tokio::test]
    async fn test_boolean_like_power() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        let cases = [
            (json!([true]), true),
            (json!([1.0]), true),
            (json!([1]), true),
            (json!([false]), false),
            (json!([0]), false),
            (json!([0.5]), false),
            (json!(["on"]), false),
        ];
        for (power, on) in cases {
            mock.set_prop("power", power.clone());
            heater.update().await.unwrap();

            assert_eq!(heater.is_on().unwrap(), on, "{power}");
            let expected = if on { HvacMode::Heat } else { HvacMode::Off };
            assert_eq!(heater.hvac_mode().unwrap(), expected, "{power}");
            assert_eq!(heater.state_attributes().unwrap()["power"], power);
        }
    }

    #[tokio::test]
    async fn test_state_attributes_are_device_replies() {
        let mock = MockDeviceClient::new();
        let mut heater = heater(&mock).await;

        mock.set_prop("power", json!([true]));
        mock.set_prop("tempi", json!([19.5]));
        heater.update().await.unwrap();

        insta::assert_snapshot!(
            heater.state_attributes().unwrap().to_string(),
            @r#"{"current_temperature":[19.5],"power":[true],"target_temperature":[22]}"#
        );
        assert_eq!(heater.current_temperature().unwrap(), 19.5);
    }
}

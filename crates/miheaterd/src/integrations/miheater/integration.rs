use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Deserializer;
use serde::de::Error as _;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::MiHeaterConfig;
use super::client::DeviceClient;
use super::heater::MiHeater;
use crate::engine::ClimateCommand;
use crate::engine::ClimateEntity;
use crate::engine::ClimateState;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Host;
use crate::engine::Integration;
use crate::engine::IntegrationError;
use crate::engine::ServiceName;
use crate::engine::ServiceRegistration;
use crate::engine::ToIntegrationMessage;

/// Domain of the services this integration registers
pub const DOMAIN: &str = "miheater";

pub const SERVICE_SET_ROOM_TEMP: &str = "set_room_temperature";

/// Data accepted by `miheater.set_room_temperature`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetRoomTemperature {
    #[serde(default, deserialize_with = "non_negative_int")]
    temperature: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntLike {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Coerce an integer, a float (truncated) or a numeric string, then require it to be >= 0
fn non_negative_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let Some(value) = Option::<IntLike>::deserialize(deserializer)? else {
        return Ok(None);
    };

    let n = match value {
        IntLike::Int(n) => n,
        IntLike::Float(f) if f.is_finite() => f.trunc() as i64,
        IntLike::Float(f) => return Err(D::Error::custom(format!("expected int, got {}", f))),
        IntLike::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("expected int, got {:?}", s)))?,
    };

    u32::try_from(n)
        .map(Some)
        .map_err(|_| D::Error::custom(format!("value must be at least 0, got {}", n)))
}

enum Stage<C> {
    /// Not set up yet; holds the client for the next attempt
    Pending(C),
    Running {
        heater: Box<dyn ClimateEntity>,
        tx: FromIntegrationSender,
        _service: ServiceRegistration,
    },
    Stopped,
}

/// Xiaomi heater integration
///
/// Setup identifies the device, reads its state once, then registers one climate entity and
/// the `miheater.set_room_temperature` service.
pub struct MiHeaterIntegration<C: DeviceClient> {
    config: MiHeaterConfig,
    stage: Stage<C>,
}

impl<C: DeviceClient + 'static> MiHeaterIntegration<C> {
    pub fn new(client: C, config: MiHeaterConfig) -> Self {
        Self {
            config,
            stage: Stage::Pending(client),
        }
    }

    async fn bootstrap(&mut self, mut device: C, host: &Host) -> Result<(), IntegrationError> {
        let info = match device.info().await {
            Ok(info) => info,
            Err(e) => {
                error!("Fail to setup Xiaomi heater at {}: {:?}", self.config.host, e);
                self.stage = Stage::Pending(device);
                return Err(IntegrationError::NotReady(Box::new(e)));
            }
        };

        let unique_id = info.unique_id();
        info!(
            "{} {} {} detected",
            info.model, info.firmware_version, info.hardware_version
        );

        let entity_id = host.entity_ids.claim("climate", &unique_id);
        let mut heater = MiHeater::new(
            device,
            entity_id.clone(),
            unique_id,
            self.config.name.clone(),
        );

        if let Err(e) = heater.update().await {
            host.entity_ids.release(&entity_id);
            self.stage = Stage::Pending(heater.into_device());
            return Err(IntegrationError::NotReady(Box::new(e)));
        }

        let service = match self.register(&heater, host).await {
            Ok(service) => service,
            Err(e) => {
                host.entity_ids.release(&entity_id);
                self.stage = Stage::Pending(heater.into_device());
                return Err(e);
            }
        };

        info!(
            "[{}] Registered {} with service {}",
            self.config.name,
            entity_id,
            service.name()
        );

        self.stage = Stage::Running {
            heater: Box::new(heater),
            tx: host.tx.clone(),
            _service: service,
        };
        Ok(())
    }

    /// Register the service and announce the entity to the engine. The service is
    /// deregistered again if the announcement fails.
    async fn register(
        &self,
        heater: &MiHeater<C>,
        host: &Host,
    ) -> Result<ServiceRegistration, IntegrationError> {
        let service = host
            .services
            .register(ServiceName::new(DOMAIN, SERVICE_SET_ROOM_TEMP), self.name())
            .map_err(IntegrationError::failed)?;

        host.tx
            .send(FromIntegrationMessage::EntityDiscovered {
                entity_id: heater.entity_id().to_string(),
                unique_id: heater.unique_id().map(str::to_string),
                platform: heater.platform(),
                integration_name: self.name().to_string(),
            })
            .await
            .map_err(IntegrationError::failed)?;
        host.tx
            .send(FromIntegrationMessage::ClimateStateChanged {
                entity_id: heater.entity_id().to_string(),
                state: ClimateState::from_entity(heater),
            })
            .await
            .map_err(IntegrationError::failed)?;

        Ok(service)
    }
}

/// Refresh an entity and report its state, whether or not the device answered
async fn refresh(heater: &mut dyn ClimateEntity, tx: &FromIntegrationSender) {
    if let Err(e) = heater.update().await {
        warn!("[{}] Refresh failed: {}", heater.entity_id(), e);
    }

    let msg = FromIntegrationMessage::ClimateStateChanged {
        entity_id: heater.entity_id().to_string(),
        state: ClimateState::from_entity(&*heater),
    };
    if let Err(e) = tx.send(msg).await {
        warn!("Failed to send ClimateStateChanged message: {}", e);
    }
}

#[async_trait]
impl<C: DeviceClient + 'static> Integration for MiHeaterIntegration<C> {
    fn name(&self) -> &str {
        DOMAIN
    }

    async fn setup(&mut self, host: &Host) -> Result<(), IntegrationError> {
        let device = match std::mem::replace(&mut self.stage, Stage::Stopped) {
            Stage::Pending(device) => device,
            other => {
                self.stage = other;
                return Err(IntegrationError::failed("integration already set up"));
            }
        };

        info!(
            "Initializing Xiaomi heater with host {} (token {}...)",
            self.config.host,
            self.config.token_hint()
        );

        self.bootstrap(device, host).await
    }

    async fn handle_message(&mut self, msg: ToIntegrationMessage) -> Result<(), IntegrationError> {
        let Stage::Running { heater, tx, .. } = &mut self.stage else {
            return Err(IntegrationError::failed("integration is not running"));
        };

        let outcome = match msg {
            ToIntegrationMessage::ClimateCommand { entity_id, command } => {
                if entity_id != heater.entity_id() {
                    return Err(IntegrationError::failed(format!(
                        "unknown entity: {}",
                        entity_id
                    )));
                }

                debug!("[{}] Handling {:?}", entity_id, command);
                match command {
                    ClimateCommand::TurnOn => heater.turn_on().await,
                    ClimateCommand::TurnOff => heater.turn_off().await,
                    ClimateCommand::SetTemperature { temperature } => {
                        heater.set_temperature(temperature).await
                    }
                    ClimateCommand::SetHvacMode { mode } => heater.set_hvac_mode(mode).await,
                    ClimateCommand::Refresh => {
                        refresh(heater.as_mut(), tx).await;
                        return Ok(());
                    }
                }
            }
            ToIntegrationMessage::CallService { service, data } => {
                if service.domain != DOMAIN || service.service != SERVICE_SET_ROOM_TEMP {
                    return Err(IntegrationError::failed(format!(
                        "unknown service: {}",
                        service
                    )));
                }

                let request: SetRoomTemperature =
                    serde_json::from_value(data).map_err(IntegrationError::failed)?;
                heater
                    .set_temperature(request.temperature.map(f64::from))
                    .await
            }
        }
        .map_err(IntegrationError::failed)?;

        debug!("[{}] Command outcome: {:?}", heater.entity_id(), outcome);
        Ok(())
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.config.scan_interval())
    }

    async fn poll(&mut self) -> Result<(), IntegrationError> {
        if let Stage::Running { heater, tx, .. } = &mut self.stage {
            refresh(heater.as_mut(), tx).await;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), IntegrationError> {
        info!("[{}] Xiaomi heater integration shutting down", self.config.name);

        if let Stage::Running { heater, tx, .. } = std::mem::replace(&mut self.stage, Stage::Stopped)
        {
            let msg = FromIntegrationMessage::EntityRemoved {
                entity_id: heater.entity_id().to_string(),
            };
            if let Err(e) = tx.try_send(msg) {
                debug!("Engine did not take EntityRemoved message: {}", e);
            }
        }
        Ok(())
    }
}

mod bridge;
mod client;
mod config;
mod heater;
mod integration;

pub use bridge::MiioBridgeClient;
pub use config::Config as MiHeaterConfig;
use linkme::distributed_slice;
pub use integration::MiHeaterIntegration;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_miheater(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let Some(heater_config) = &ctx.config.integrations.miheater else {
        return Ok(None);
    };

    let client = MiioBridgeClient::new(heater_config);
    Ok(Some(Box::new(MiHeaterIntegration::new(
        client,
        heater_config.clone(),
    ))))
}

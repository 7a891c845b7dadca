use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

/// Identification reported by a miIO device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    pub mac_address: String,
    pub firmware_version: String,
    pub hardware_version: String,
}

impl DeviceInfo {
    /// Identifier that stays stable across restarts and IP changes
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.model, self.mac_address)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device (or the library talking to it) reported an error
    #[error("device error: {message}")]
    Device { message: String },

    /// The device answered with something we cannot interpret
    #[error("unexpected response to {method}: {detail}")]
    UnexpectedResponse { method: String, detail: String },

    #[error("bridge process exited")]
    BridgeClosed,

    #[error("bridge protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("bridge IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for miIO device operations
///
/// This trait allows for mocking the device for testing purposes
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Query model, MAC address and versions
    async fn info(&mut self) -> Result<DeviceInfo, DeviceError>;

    /// Send a raw miIO command, e.g. `get_prop ["power"]`, and return its result
    async fn send(
        &mut self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, DeviceError>;
}

#[cfg(test)]
pub use mock::MockDeviceClient;

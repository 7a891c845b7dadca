//! Entity abstraction for miheaterd
//!
//! All entities implement the Entity trait; climate devices additionally implement
//! ClimateEntity, which is the contract the engine drives them through.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use super::integration::BoxError;
use super::state::HvacMode;
use super::state::TemperatureUnit;

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Entity ID (e.g., "climate.bedroom_heater")
    fn entity_id(&self) -> &str;

    /// Stable identifier derived from the device, if it has one
    fn unique_id(&self) -> Option<&str> {
        None
    }

    /// Human-readable name
    fn name(&self) -> &str;

    /// Return the platform type of this entity (e.g. "climate")
    fn platform(&self) -> &'static str;

    /// Whether the entity can currently talk to its device
    fn available(&self) -> bool {
        true
    }
}

/// Feature flags a climate entity supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateFeatures(u32);

impl ClimateFeatures {
    pub const TARGET_TEMPERATURE: Self = Self(1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// What an entity did with a command.
///
/// Device failures are reported through `EntityError` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A request was sent to the device.
    Applied,
    /// The command was accepted but nothing was sent.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The entity has never read its device.
    #[error("entity has no state yet")]
    NoState,

    /// The device could not be read; the host should try again later.
    #[error("entity not ready: {0}")]
    NotReady(#[source] BoxError),

    /// The device rejected or failed to answer a command.
    #[error("command failed: {0}")]
    Command(#[source] BoxError),
}

/// Climate entity contract
///
/// Reads are answered from the entity's last snapshot; actions talk to the device.
#[async_trait]
pub trait ClimateEntity: Entity {
    fn hvac_mode(&self) -> Result<HvacMode, EntityError>;

    fn hvac_modes(&self) -> &'static [HvacMode];

    fn supported_features(&self) -> ClimateFeatures;

    fn temperature_unit(&self) -> TemperatureUnit;

    fn current_temperature(&self) -> Result<f64, EntityError>;

    fn target_temperature(&self) -> Result<f64, EntityError>;

    fn target_temperature_step(&self) -> f64;

    fn min_temp(&self) -> f64;

    fn max_temp(&self) -> f64;

    fn is_on(&self) -> Result<bool, EntityError>;

    /// Raw device attributes
    fn state_attributes(&self) -> Option<serde_json::Value>;

    async fn turn_on(&mut self) -> Result<CommandOutcome, EntityError>;

    async fn turn_off(&mut self) -> Result<CommandOutcome, EntityError>;

    async fn set_temperature(
        &mut self,
        temperature: Option<f64>,
    ) -> Result<CommandOutcome, EntityError>;

    async fn set_hvac_mode(&mut self, mode: HvacMode) -> Result<CommandOutcome, EntityError>;

    /// Re-read the device
    async fn update(&mut self) -> Result<(), EntityError>;
}

/// Registry of claimed entity IDs, shared by every integration.
#[derive(Debug, Clone, Default)]
pub struct EntityIds {
    claimed: Arc<Mutex<BTreeSet<String>>>,
}

impl EntityIds {
    /// Claim `<domain>.<slug(hint)>`, appending `_2`, `_3`, ... if it is taken.
    pub fn claim(&self, domain: &str, hint: &str) -> String {
        let base = format!("{}.{}", domain, slugify(hint));

        let Ok(mut claimed) = self.claimed.lock() else {
            return base;
        };

        let mut candidate = base.clone();
        let mut suffix = 2;
        while claimed.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        claimed.insert(candidate.clone());
        candidate
    }

    /// Give an entity ID back, e.g. when its entity is removed
    pub fn release(&self, entity_id: &str) {
        if let Ok(mut claimed) = self.claimed.lock() {
            claimed.remove(entity_id);
        }
    }
}

/// Lowercase `text` and collapse every run of non-alphanumeric characters into `_`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c);
        } else {
            pending_separator = true;
        }
    }

    if slug.is_empty() {
        slug.push_str("unknown");
    }
    slug
}

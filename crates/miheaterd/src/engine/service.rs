//! Host-level service registry.
//!
//! Integrations register named services (e.g. `miheater.set_room_temperature`) and keep the
//! returned `ServiceRegistration` for as long as the service should exist. Dropping the
//! registration removes the service.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use tracing::debug;

type ServiceMap = HashMap<ServiceName, String>;

/// Fully qualified service name, displayed as `domain.service`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    pub domain: String,
    pub service: String,
}

impl ServiceName {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.service)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service {name} is already registered by {owner}")]
    AlreadyRegistered { name: ServiceName, owner: String },

    #[error("service registry lock poisoned")]
    Poisoned,
}

/// Map of service name -> owning integration, shared between the engine and integrations.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<Mutex<ServiceMap>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` on behalf of `owner`.
    pub fn register(
        &self,
        name: ServiceName,
        owner: impl Into<String>,
    ) -> Result<ServiceRegistration, ServiceError> {
        let owner = owner.into();
        let mut services = self.services.lock().map_err(|_| ServiceError::Poisoned)?;

        if let Some(existing) = services.get(&name) {
            return Err(ServiceError::AlreadyRegistered {
                name,
                owner: existing.clone(),
            });
        }

        debug!("Registering service {} for {}", name, owner);
        services.insert(name.clone(), owner);

        Ok(ServiceRegistration {
            name,
            services: Arc::downgrade(&self.services),
        })
    }

    /// Integration that owns `name`, if registered
    pub fn owner(&self, name: &ServiceName) -> Option<String> {
        self.services.lock().ok()?.get(name).cloned()
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.owner(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.services.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a service registered; dropping it deregisters the service.
#[derive(Debug)]
#[must_use = "the service is deregistered when the registration is dropped"]
pub struct ServiceRegistration {
    name: ServiceName,
    services: Weak<Mutex<ServiceMap>>,
}

impl ServiceRegistration {
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Deregister the service now
    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for ServiceRegistration {
    fn drop(&mut self) {
        let Some(services) = self.services.upgrade() else {
            return;
        };
        let Ok(mut map) = services.lock() else {
            return;
        };
        map.remove(&self.name);
        debug!("Deregistered service {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_drop() {
        let registry = ServiceRegistry::new();
        let name = ServiceName::new("miheater", "set_room_temperature");

        let registration = registry.register(name.clone(), "miheater").unwrap();
        assert_eq!(registration.name().to_string(), "miheater.set_room_temperature");
        assert_eq!(registry.owner(&name).as_deref(), Some("miheater"));
        assert_eq!(registry.len(), 1);

        drop(registration);
        assert!(!registry.contains(&name));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ServiceRegistry::new();
        let name = ServiceName::new("miheater", "set_room_temperature");

        let _first = registry.register(name.clone(), "first").unwrap();
        let err = registry.register(name.clone(), "second").unwrap_err();

        assert!(matches!(
            err,
            ServiceError::AlreadyRegistered { ref owner, .. } if owner == "first"
        ));
        assert_eq!(registry.owner(&name).as_deref(), Some("first"));
    }

    #[test]
    fn test_unregister_outliving_registry() {
        let registry = ServiceRegistry::new();
        let registration = registry
            .register(ServiceName::new("miheater", "set_room_temperature"), "miheater")
            .unwrap();

        drop(registry);
        registration.unregister();
    }

    #[test]
    fn test_name_is_free_again_after_drop() {
        let registry = ServiceRegistry::new();
        let name = ServiceName::new("miheater", "set_room_temperature");

        {
            let _registration = registry.register(name.clone(), "first").unwrap();
        }
        let _registration = registry.register(name.clone(), "second").unwrap();

        assert_eq!(registry.owner(&name).as_deref(), Some("second"));
        assert_eq!(registry.len(), 1);
    }
}

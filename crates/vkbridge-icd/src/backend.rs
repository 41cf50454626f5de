//! Native backend selection.
//!
//! Backends register under a name; the first device creation selects one
//! for the rest of the process. Selecting a different backend afterwards is
//! an error rather than a silent switch.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::info;
use vkbridge_core::{CoreError, FeatureLevel};
use vkbridge_d3d11::native::null::NullDevice;
use vkbridge_d3d11::native::NativeDevice;
use vkbridge_d3d11::NativeError;

/// Creates a native device at the requested feature level.
pub type BackendFactory = fn(FeatureLevel) -> Result<Arc<dyn NativeDevice>, NativeError>;

pub struct BackendRegistry {
    factories: RwLock<BTreeMap<String, BackendFactory>>,
    selected: OnceLock<(String, BackendFactory)>,
}

fn null_backend(feature_level: FeatureLevel) -> Result<Arc<dyn NativeDevice>, NativeError> {
    Ok(NullDevice::new(feature_level))
}

impl BackendRegistry {
    /// A registry with the headless `"null"` backend registered.
    pub fn new() -> Self {
        let mut factories = BTreeMap::new();
        factories.insert("null".to_string(), null_backend as BackendFactory);
        Self {
            factories: RwLock::new(factories),
            selected: OnceLock::new(),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::new)
    }

    /// Register `factory` under `name`. Fails once a backend has been selected.
    pub fn register(&self, name: &str, factory: BackendFactory) -> Result<(), CoreError> {
        if let Some((selected, _)) = self.selected.get() {
            return Err(CoreError::BackendAlreadySelected {
                selected: selected.clone(),
                requested: name.to_string(),
            });
        }
        self.factories.write().insert(name.to_string(), factory);
        Ok(())
    }

    /// Select `name` for the process, or confirm it is the one selected.
    pub fn select(&self, name: &str) -> Result<BackendFactory, CoreError> {
        if let Some((selected, factory)) = self.selected.get() {
            return if selected == name {
                Ok(*factory)
            } else {
                Err(CoreError::BackendAlreadySelected {
                    selected: selected.clone(),
                    requested: name.to_string(),
                })
            };
        }
        let factory = *self
            .factories
            .read()
            .get(name)
            .ok_or_else(|| CoreError::UnknownBackend(name.to_string()))?;
        let (selected, factory) = self.selected.get_or_init(|| {
            info!("selected native backend {}", name);
            (name.to_string(), factory)
        });
        // Another thread may have won the race with a different name
        if selected != name {
            return Err(CoreError::BackendAlreadySelected {
                selected: selected.clone(),
                requested: name.to_string(),
            });
        }
        Ok(*factory)
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.get().map(|(name, _)| name.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let registry = BackendRegistry::new();
        assert!(matches!(registry.select("d3d12"), Err(CoreError::UnknownBackend(_))));
        assert_eq!(registry.selected(), None);
    }

    #[test]
    fn selection_happens_once() {
        let registry = BackendRegistry::new();
        registry.register("other", null_backend).unwrap();
        assert_eq!(registry.names(), vec!["null".to_string(), "other".to_string()]);

        let factory = registry.select("null").unwrap();
        assert_eq!(factory(FeatureLevel::L11_0).unwrap().feature_level(), FeatureLevel::L11_0);
        assert!(registry.select("null").is_ok());
        assert!(matches!(
            registry.select("other"),
            Err(CoreError::BackendAlreadySelected { .. })
        ));
        assert!(registry.register("late", null_backend).is_err());
        assert_eq!(registry.selected(), Some("null"));
    }
}

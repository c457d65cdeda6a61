use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{Category, Component};
use crate::{
    components::{DebugComponent, QueryComponent},
    config::{ConfigError, ConfigResult},
    error::ComponentResult,
};

/// Immutable identity of a registered component instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Instance name, unique within a registry
    pub name: String,
    /// Factory key used when building from configuration
    pub kind: String,
    /// Opaque per-instance parameters
    #[serde(default)]
    pub params: Value,
}

impl ComponentConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Introspection record for one registered component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentInfo {
    pub name: String,
    pub kind: &'static str,
    pub description: &'static str,
    pub category: Category,
}

/// A component together with the configuration it was registered under
#[derive(Clone)]
pub struct RegisteredComponent {
    pub config: Arc<ComponentConfig>,
    pub component: Arc<dyn Component>,
}

impl RegisteredComponent {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl fmt::Debug for RegisteredComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredComponent")
            .field("name", &self.config.name)
            .field("kind", &self.component.kind())
            .finish()
    }
}

/// Ordered, immutable list of components. Registration order is the only
/// ordering guarantee components get from the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    entries: Vec<RegisteredComponent>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component under `config.name`; names must be unique
    pub fn register(
        &mut self,
        config: ComponentConfig,
        component: Arc<dyn Component>,
    ) -> ConfigResult<()> {
        if self.entries.iter().any(|e| e.config.name == config.name) {
            return Err(ConfigError::DuplicateComponent { name: config.name });
        }
        debug!(
            name = %config.name,
            kind = component.kind(),
            position = self.entries.len(),
            "Registered component"
        );
        self.entries.push(RegisteredComponent {
            config: Arc::new(config),
            component,
        });
        Ok(())
    }

    /// Builder-style registration using the component's kind as config kind
    pub fn with(
        mut self,
        name: impl Into<String>,
        component: Arc<dyn Component>,
    ) -> ConfigResult<Self> {
        let config = ComponentConfig::new(name, component.kind());
        self.register(config, component)?;
        Ok(self)
    }

    /// Instantiate every configured component through its factory, keeping
    /// the configured order
    pub fn from_configs(
        configs: Vec<ComponentConfig>,
        factories: &ComponentFactories,
    ) -> ConfigResult<Self> {
        let mut registry = Self::new();
        for config in configs {
            let component = factories.create(&config)?;
            registry.register(config, component)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RegisteredComponent> {
        self.entries.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&RegisteredComponent> {
        self.entries.iter().find(|e| e.config.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RegisteredComponent> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    /// Name, kind, description and category of every component, in
    /// registration order
    pub fn describe(&self) -> Vec<ComponentInfo> {
        self.entries
            .iter()
            .map(|e| ComponentInfo {
                name: e.config.name.clone(),
                kind: e.component.kind(),
                description: e.component.description(),
                category: e.component.category(),
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a ComponentRegistry {
    type Item = &'a RegisteredComponent;
    type IntoIter = std::slice::Iter<'a, RegisteredComponent>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

pub type ComponentFactory =
    Arc<dyn Fn(&ComponentConfig) -> ComponentResult<Arc<dyn Component>> + Send + Sync>;

/// Factory table keyed by component kind
#[derive(Clone, Default)]
pub struct ComponentFactories {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories for the components shipped with this crate
    pub fn builtin() -> Self {
        let mut factories = Self::new();
        factories.register(QueryComponent::KIND, |config| {
            Ok(Arc::new(QueryComponent::from_config(config)?) as Arc<dyn Component>)
        });
        factories.register(DebugComponent::KIND, |config| {
            Ok(Arc::new(DebugComponent::from_config(config)?) as Arc<dyn Component>)
        });
        factories
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ComponentConfig) -> ComponentResult<Arc<dyn Component>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, config: &ComponentConfig) -> ConfigResult<Arc<dyn Component>> {
        let factory =
            self.factories
                .get(&config.kind)
                .ok_or_else(|| ConfigError::UnknownComponentKind {
                    name: config.name.clone(),
                    kind: config.kind.clone(),
                })?;
        factory(config).map_err(|e| ConfigError::ComponentInit {
            name: config.name.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for ComponentFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("ComponentFactories")
            .field("kinds", &kinds)
            .finish()
    }
}

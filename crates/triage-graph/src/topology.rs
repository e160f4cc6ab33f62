//! Topology sources
//!
//! A [`TopologyProvider`] answers "what is this component and what does it
//! talk to". [`StaticTopology`] is the declarative implementation, loaded
//! from code or from a TOML file of `[[component]]` tables:
//!
//! ```toml
//! [[component]]
//! id = "orders-api"
//! service = "orders"
//! tags = ["http"]
//!
//! [[component.dependencies]]
//! component_id = "orders-db"
//! dependency_type = "runtime"
//! weight = 0.9
//! ```

use crate::error::TopologyError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use triage_model::DependencyType;

/// A declared relationship to another component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredDependency {
    /// Other component
    pub component_id: String,
    /// Dependency kind
    #[serde(default)]
    pub dependency_type: DependencyType,
    /// Explicit weight; the kind's default when absent
    #[serde(default)]
    pub weight: Option<f64>,
}

impl DeclaredDependency {
    /// Runtime dependency with default weight
    #[must_use]
    pub fn runtime(component_id: impl Into<String>) -> Self {
        Self::new(component_id, DependencyType::Runtime)
    }

    /// Dependency of the given kind with default weight
    #[must_use]
    pub fn new(component_id: impl Into<String>, dependency_type: DependencyType) -> Self {
        Self {
            component_id: component_id.into(),
            dependency_type,
            weight: None,
        }
    }

    /// With explicit weight
    #[inline]
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Weight used for the edge
    #[must_use]
    pub fn effective_weight(&self) -> f64 {
        self.weight
            .unwrap_or_else(|| self.dependency_type.default_weight())
            .clamp(0.0, 1.0)
    }
}

/// What the topology knows about a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Component id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Owning service
    pub service: String,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Components this one depends on
    #[serde(default)]
    pub dependencies: Vec<DeclaredDependency>,
    /// Components that depend on this one
    #[serde(default)]
    pub dependents: Vec<DeclaredDependency>,
}

impl ComponentDescriptor {
    /// Descriptor with no relationships
    #[must_use]
    pub fn new(id: impl Into<String>, service: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            service: service.into(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// With a dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, dependency: DeclaredDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// With tags
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Display name, falling back to the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Source of component descriptors
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// Describe a component; `Ok(None)` when the component is unknown
    async fn describe(&self, component_id: &str) -> Result<Option<ComponentDescriptor>, TopologyError>;
}

#[derive(Debug, Default, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    component: Vec<ComponentDescriptor>,
}

/// In-memory topology
///
/// Only dependencies need to be declared; the reverse `dependents` index is
/// maintained on insert.
#[derive(Debug, Default)]
pub struct StaticTopology {
    components: RwLock<HashMap<String, ComponentDescriptor>>,
}

impl StaticTopology {
    /// Empty topology
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Topology from descriptors
    #[must_use]
    pub fn from_components(components: impl IntoIterator<Item = ComponentDescriptor>) -> Self {
        let topology = Self::new();
        for component in components {
            topology.insert(component);
        }
        topology
    }

    /// Parse TOML `[[component]]` tables
    ///
    /// # Errors
    /// [`TopologyError::Invalid`] on malformed TOML or a blank component id.
    pub fn from_toml_str(input: &str) -> Result<Self, TopologyError> {
        let file: TopologyFile =
            toml::from_str(input).map_err(|e| TopologyError::Invalid(e.to_string()))?;
        if let Some(blank) = file.component.iter().find(|c| c.id.trim().is_empty()) {
            return Err(TopologyError::Invalid(format!(
                "component in service {:?} has an empty id",
                blank.service
            )));
        }
        Ok(Self::from_components(file.component))
    }

    /// Load a TOML topology file
    ///
    /// # Errors
    /// [`TopologyError::Io`] if the file cannot be read, otherwise as
    /// [`StaticTopology::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| TopologyError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    /// Insert or replace a component, updating the reverse index
    pub fn insert(&self, mut component: ComponentDescriptor) {
        let mut components = self.components.write();

        for dependency in &component.dependencies {
            let reverse = DeclaredDependency {
                component_id: component.id.clone(),
                dependency_type: dependency.dependency_type,
                weight: dependency.weight,
            };
            if let Some(target) = components.get_mut(&dependency.component_id) {
                if !target.dependents.iter().any(|d| d.component_id == component.id) {
                    target.dependents.push(reverse);
                }
            }
        }

        for (id, other) in components.iter() {
            if let Some(dep) = other.dependencies.iter().find(|d| d.component_id == component.id) {
                if !component.dependents.iter().any(|d| &d.component_id == id) {
                    component.dependents.push(DeclaredDependency {
                        component_id: id.clone(),
                        dependency_type: dep.dependency_type,
                        weight: dep.weight,
                    });
                }
            }
        }

        components.insert(component.id.clone(), component);
    }

    /// Number of components
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    /// Whether the topology is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}

#[async_trait]
impl TopologyProvider for StaticTopology {
    async fn describe(&self, component_id: &str) -> Result<Option<ComponentDescriptor>, TopologyError> {
        Ok(self.components.read().get(component_id).cloned())
    }
}

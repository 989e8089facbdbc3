//! Model repository
//!
//! Holds device and port templates in two disjoint name spaces. Models are
//! registered with their raw configuration and a factory identifier; the
//! factory builds the model and the model is initialized on first access.
//! Initializing a model initializes everything it refers to first, so the
//! repository resolves the reference graph in dependency order without the
//! caller having to sort it. A reference cycle is detected and reported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ModelConfig, ModelDefinition, ModelDefinitions};
use crate::logical::{LogicalDevice, LogicalPort};
use crate::model::{DeviceModel, ModelError, ModelResolver, PortModel};
use crate::types::{DeviceType, ModelKind};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Model repository is not initialized")]
    NotInitialized,
    #[error("Model repository is already initialized")]
    AlreadyInitialized,
    #[error("The {kind} model '{name}' is already loaded")]
    DuplicateModel { kind: ModelKind, name: String },
    #[error("Unknown {kind} model '{name}'")]
    UnknownModel { kind: ModelKind, name: String },
    #[error("No {kind} factory '{type_id}' for model '{name}'")]
    UnknownFactory {
        kind: ModelKind,
        name: String,
        type_id: String,
    },
    #[error("Reference cycle through {kind} model '{name}'")]
    Cycle { kind: ModelKind, name: String },
    #[error("The {kind} model '{name}' is not initialized")]
    NotReady { kind: ModelKind, name: String },
    #[error("Failed to initialize {kind} model '{name}': {source}")]
    Initialization {
        kind: ModelKind,
        name: String,
        #[source]
        source: ModelError,
    },
}

impl RepositoryError {
    /// The innermost repository error along a chain of failed dependencies
    pub fn root_cause(&self) -> &RepositoryError {
        match self {
            RepositoryError::Initialization {
                source: ModelError::Dependency { source, .. },
                ..
            } => source.root_cause(),
            other => other,
        }
    }
}

/// Builds a device model with the given name
pub type DeviceFactory = fn(&str) -> DeviceModel;
/// Builds a port model with the given name
pub type PortFactory = fn(&str) -> PortModel;

/// Lifecycle of a repository entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Registered; the model may not exist yet
    Created,
    /// Being initialized; reaching it again means a reference cycle
    Initializing,
    Ready,
}

#[derive(Debug)]
enum Model {
    Device(DeviceModel),
    Port(PortModel),
}

impl Model {
    fn is_initialized(&self) -> bool {
        match self {
            Model::Device(device) => device.is_initialized(),
            Model::Port(port) => port.is_initialized(),
        }
    }
}

/// A registered model
#[derive(Debug)]
pub struct ModelEntry {
    name: String,
    kind: ModelKind,
    type_id: String,
    config: ModelConfig,
    state: EntryState,
    model: Option<Model>,
}

impl ModelEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == EntryState::Ready && self.model.as_ref().is_some_and(Model::is_initialized)
    }
}

/// Repository settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryOptions {
    /// Initialize models as soon as they are loaded instead of on first access
    #[serde(default)]
    pub force_initialization_at_load: bool,
}

/// Repository of device and port models
#[derive(Debug)]
pub struct ModelRepository {
    options: RepositoryOptions,
    initialized: bool,
    entries: BTreeMap<(ModelKind, String), ModelEntry>,
    device_factories: BTreeMap<String, DeviceFactory>,
    port_factories: BTreeMap<String, PortFactory>,
    /// Logical views of ready models, by logical name
    logical_devices: BTreeMap<String, Arc<LogicalDevice>>,
    logical_ports: BTreeMap<String, Arc<LogicalPort>>,
}

impl Default for ModelRepository {
    fn default() -> Self {
        Self::new(RepositoryOptions::default())
    }
}

impl ModelRepository {
    /// Create an empty repository with the built-in factories registered
    pub fn new(options: RepositoryOptions) -> Self {
        let mut repository = Self {
            options,
            initialized: false,
            entries: BTreeMap::new(),
            device_factories: BTreeMap::new(),
            port_factories: BTreeMap::new(),
            logical_devices: BTreeMap::new(),
            logical_ports: BTreeMap::new(),
        };
        repository.register_builtin_factories();
        repository
    }

    fn register_builtin_factories(&mut self) {
        let devices: [(&str, DeviceFactory); 7] = [
            ("device.generic", |name| DeviceModel::new(name)),
            ("device.chip", |name| DeviceModel::with_type(name, DeviceType::Chip)),
            ("device.board", |name| DeviceModel::with_type(name, DeviceType::Board)),
            ("device.module", |name| DeviceModel::with_type(name, DeviceType::Module)),
            ("device.crate", |name| DeviceModel::with_type(name, DeviceType::Crate)),
            ("device.rack", |name| DeviceModel::with_type(name, DeviceType::Rack)),
            ("device.setup", |name| DeviceModel::with_type(name, DeviceType::Setup)),
        ];
        for (type_id, factory) in devices {
            self.device_factories.insert(type_id.to_string(), factory);
        }
        self.port_factories
            .insert("port.generic".to_string(), |name| PortModel::new(name));
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn register_device_factory(&mut self, type_id: impl Into<String>, factory: DeviceFactory) {
        let type_id = type_id.into();
        if self.device_factories.insert(type_id.clone(), factory).is_some() {
            warn!(type_id = %type_id, "Replacing device factory");
        }
    }

    pub fn register_port_factory(&mut self, type_id: impl Into<String>, factory: PortFactory) {
        let type_id = type_id.into();
        if self.port_factories.insert(type_id.clone(), factory).is_some() {
            warn!(type_id = %type_id, "Replacing port factory");
        }
    }

    pub fn has_device_factory(&self, type_id: &str) -> bool {
        self.device_factories.contains_key(type_id)
    }

    pub fn has_port_factory(&self, type_id: &str) -> bool {
        self.port_factories.contains_key(type_id)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Load `definitions` and mark the repository initialized
    pub fn initialize(&mut self, definitions: &ModelDefinitions) -> Result<(), RepositoryError> {
        if self.initialized {
            return Err(RepositoryError::AlreadyInitialized);
        }
        self.load_definitions(definitions)?;
        self.initialized = true;
        info!(
            devices = self.count(ModelKind::Device),
            ports = self.count(ModelKind::Port),
            "Model repository initialized"
        );
        Ok(())
    }

    /// Tear down every model and forget all registrations
    pub fn reset(&mut self) -> Result<(), RepositoryError> {
        if !self.initialized && self.entries.is_empty() {
            return Err(RepositoryError::NotInitialized);
        }
        for entry in self.entries.values_mut() {
            let outcome = match entry.model.as_mut() {
                Some(Model::Device(device)) if device.is_initialized() => device.reset(),
                Some(Model::Port(port)) if port.is_initialized() => port.reset(),
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                warn!(model = %entry.name, error = %e, "Failed to reset model");
            }
        }
        self.entries.clear();
        self.logical_devices.clear();
        self.logical_ports.clear();
        self.initialized = false;
        info!("Model repository reset");
        Ok(())
    }

    fn count(&self, kind: ModelKind) -> usize {
        self.entries.keys().filter(|(k, _)| *k == kind).count()
    }

    fn register(
        &mut self,
        kind: ModelKind,
        name: &str,
        type_id: &str,
        config: ModelConfig,
    ) -> Result<(), RepositoryError> {
        let key = (kind, name.to_string());
        if self.entries.contains_key(&key) {
            return Err(RepositoryError::DuplicateModel {
                kind,
                name: name.to_string(),
            });
        }
        debug!(kind = %kind, model = %name, type_id = %type_id, "Loading model");
        self.entries.insert(
            key,
            ModelEntry {
                name: name.to_string(),
                kind,
                type_id: type_id.to_string(),
                config,
                state: EntryState::Created,
                model: None,
            },
        );
        Ok(())
    }

    /// Register a device model; it is built and initialized on first access
    /// unless eager initialization is configured
    pub fn load_device_model(
        &mut self,
        name: &str,
        type_id: &str,
        config: ModelConfig,
    ) -> Result<(), RepositoryError> {
        self.register(ModelKind::Device, name, type_id, config)?;
        self.initialize_at_load(ModelKind::Device, name)
    }

    /// Register a port model
    pub fn load_port_model(
        &mut self,
        name: &str,
        type_id: &str,
        config: ModelConfig,
    ) -> Result<(), RepositoryError> {
        self.register(ModelKind::Port, name, type_id, config)?;
        self.initialize_at_load(ModelKind::Port, name)
    }

    /// Eager initialization of a single load; a model that fails is unregistered
    fn initialize_at_load(&mut self, kind: ModelKind, name: &str) -> Result<(), RepositoryError> {
        if !self.options.force_initialization_at_load {
            return Ok(());
        }
        if let Err(e) = self.ensure_ready(kind, name) {
            self.entries.remove(&(kind, name.to_string()));
            warn!(kind = %kind, model = %name, error = %e, "Dropping model that failed to initialize at load");
            return Err(e);
        }
        Ok(())
    }

    pub fn load(&mut self, name: &str, definition: &ModelDefinition) -> Result<(), RepositoryError> {
        match definition.kind {
            ModelKind::Device => self.load_device_model(name, definition.type_id(), definition.config.clone()),
            ModelKind::Port => self.load_port_model(name, definition.type_id(), definition.config.clone()),
        }
    }

    /// Register a batch of models; with eager initialization the whole batch
    /// is initialized once every model of it is registered
    pub fn load_definitions(&mut self, definitions: &ModelDefinitions) -> Result<(), RepositoryError> {
        for (name, definition) in &definitions.models {
            self.register(definition.kind, name, definition.type_id(), definition.config.clone())?;
        }
        if self.options.force_initialization_at_load {
            self.initialize_all()?;
        }
        Ok(())
    }

    /// Bring every registered model to the ready state
    pub fn initialize_all(&mut self) -> Result<(), RepositoryError> {
        let keys: Vec<(ModelKind, String)> = self.entries.keys().cloned().collect();
        for (kind, name) in keys {
            self.ensure_ready(kind, &name)?;
        }
        Ok(())
    }

    fn construct(&self, kind: ModelKind, name: &str, type_id: &str) -> Result<Model, RepositoryError> {
        let unknown = || RepositoryError::UnknownFactory {
            kind,
            name: name.to_string(),
            type_id: type_id.to_string(),
        };
        match kind {
            ModelKind::Device => {
                let factory = self.device_factories.get(type_id).ok_or_else(unknown)?;
                Ok(Model::Device(factory(name)))
            }
            ModelKind::Port => {
                let factory = self.port_factories.get(type_id).ok_or_else(unknown)?;
                Ok(Model::Port(factory(name)))
            }
        }
    }

    fn restore(&mut self, key: &(ModelKind, String), model: Option<Model>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.state = EntryState::Created;
            entry.model = model;
        }
    }

    /// Construct and initialize a model, and everything it refers to, once
    pub fn ensure_ready(&mut self, kind: ModelKind, name: &str) -> Result<(), RepositoryError> {
        let key = (kind, name.to_string());
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| RepositoryError::UnknownModel {
                kind,
                name: name.to_string(),
            })?;
        match entry.state {
            EntryState::Ready if entry.is_ready() => return Ok(()),
            EntryState::Initializing => {
                return Err(RepositoryError::Cycle {
                    kind,
                    name: name.to_string(),
                })
            }
            _ => {}
        }
        entry.state = EntryState::Initializing;
        let config = entry.config.clone();
        let type_id = entry.type_id.clone();
        let existing = entry.model.take();

        let mut model = match existing {
            Some(model) => model,
            None => match self.construct(kind, name, &type_id) {
                Ok(model) => model,
                Err(e) => {
                    self.restore(&key, None);
                    return Err(e);
                }
            },
        };

        debug!(kind = %kind, model = %name, "Initializing model");
        let outcome = match &mut model {
            Model::Device(device) => device.initialize(&config, self),
            Model::Port(port) => port.initialize(&config),
        };
        if let Err(source) = outcome {
            self.restore(&key, Some(model));
            return Err(RepositoryError::Initialization {
                kind,
                name: name.to_string(),
                source,
            });
        }

        match &model {
            Model::Device(device) => {
                if let Some(logical) = device.logical() {
                    self.logical_devices
                        .insert(logical.name().to_string(), Arc::clone(logical));
                }
            }
            Model::Port(port) => {
                if let Some(logical) = port.logical() {
                    self.logical_ports
                        .insert(logical.name().to_string(), Arc::clone(logical));
                }
            }
        }
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.state = EntryState::Ready;
            entry.model = Some(model);
        }
        Ok(())
    }

    pub fn has_device_model(&self, name: &str) -> bool {
        self.entries.contains_key(&(ModelKind::Device, name.to_string()))
    }

    pub fn has_port_model(&self, name: &str) -> bool {
        self.entries.contains_key(&(ModelKind::Port, name.to_string()))
    }

    pub fn is_device_model_initialized(&self, name: &str) -> bool {
        self.entry(ModelKind::Device, name).is_some_and(ModelEntry::is_ready)
    }

    pub fn is_port_model_initialized(&self, name: &str) -> bool {
        self.entry(ModelKind::Port, name).is_some_and(ModelEntry::is_ready)
    }

    pub fn entry(&self, kind: ModelKind, name: &str) -> Option<&ModelEntry> {
        self.entries.get(&(kind, name.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ready_entry(&self, kind: ModelKind, name: &str) -> Result<&ModelEntry, RepositoryError> {
        let entry = self.entry(kind, name).ok_or_else(|| RepositoryError::UnknownModel {
            kind,
            name: name.to_string(),
        })?;
        if !entry.is_ready() {
            return Err(RepositoryError::NotReady {
                kind,
                name: name.to_string(),
            });
        }
        Ok(entry)
    }

    /// A ready device model, without initializing it
    pub fn device_model(&self, name: &str) -> Result<&DeviceModel, RepositoryError> {
        match &self.ready_entry(ModelKind::Device, name)?.model {
            Some(Model::Device(device)) => Ok(device),
            _ => Err(RepositoryError::NotReady {
                kind: ModelKind::Device,
                name: name.to_string(),
            }),
        }
    }

    /// A ready port model, without initializing it
    pub fn port_model(&self, name: &str) -> Result<&PortModel, RepositoryError> {
        match &self.ready_entry(ModelKind::Port, name)?.model {
            Some(Model::Port(port)) => Ok(port),
            _ => Err(RepositoryError::NotReady {
                kind: ModelKind::Port,
                name: name.to_string(),
            }),
        }
    }

    /// The device model `name`, initialized on first access
    pub fn get_device_model(&mut self, name: &str) -> Result<&DeviceModel, RepositoryError> {
        self.ensure_ready(ModelKind::Device, name)?;
        self.device_model(name)
    }

    /// Mutable access to the device model `name`, initialized on first access
    ///
    /// Resetting the model through this handle makes the next access
    /// initialize it again.
    pub fn grab_device_model(&mut self, name: &str) -> Result<&mut DeviceModel, RepositoryError> {
        self.ensure_ready(ModelKind::Device, name)?;
        match self
            .entries
            .get_mut(&(ModelKind::Device, name.to_string()))
            .and_then(|entry| entry.model.as_mut())
        {
            Some(Model::Device(device)) => Ok(device),
            _ => Err(RepositoryError::NotReady {
                kind: ModelKind::Device,
                name: name.to_string(),
            }),
        }
    }

    pub fn get_port_model(&mut self, name: &str) -> Result<&PortModel, RepositoryError> {
        self.ensure_ready(ModelKind::Port, name)?;
        self.port_model(name)
    }

    pub fn grab_port_model(&mut self, name: &str) -> Result<&mut PortModel, RepositoryError> {
        self.ensure_ready(ModelKind::Port, name)?;
        match self
            .entries
            .get_mut(&(ModelKind::Port, name.to_string()))
            .and_then(|entry| entry.model.as_mut())
        {
            Some(Model::Port(port)) => Ok(port),
            _ => Err(RepositoryError::NotReady {
                kind: ModelKind::Port,
                name: name.to_string(),
            }),
        }
    }

    /// Logical views of every device model initialized so far, by logical name
    pub fn logical_devices(&self) -> &BTreeMap<String, Arc<LogicalDevice>> {
        &self.logical_devices
    }

    pub fn logical_ports(&self) -> &BTreeMap<String, Arc<LogicalPort>> {
        &self.logical_ports
    }

    pub fn logical_device(&self, logical_name: &str) -> Option<&Arc<LogicalDevice>> {
        self.logical_devices.get(logical_name)
    }

    pub fn logical_port(&self, logical_name: &str) -> Option<&Arc<LogicalPort>> {
        self.logical_ports.get(logical_name)
    }
}

impl ModelResolver for ModelRepository {
    fn resolve_device(&mut self, name: &str) -> Result<Arc<LogicalDevice>, RepositoryError> {
        self.ensure_ready(ModelKind::Device, name)?;
        self.device_model(name)?
            .logical()
            .cloned()
            .ok_or_else(|| RepositoryError::NotReady {
                kind: ModelKind::Device,
                name: name.to_string(),
            })
    }

    fn resolve_port(&mut self, name: &str) -> Result<Arc<LogicalPort>, RepositoryError> {
        self.ensure_ready(ModelKind::Port, name)?;
        self.port_model(name)?
            .logical()
            .cloned()
            .ok_or_else(|| RepositoryError::NotReady {
                kind: ModelKind::Port,
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacementDecl;

    const DEFINITIONS: &str = r#"
[models.Setup]
kind = "device"
type_id = "device.setup"

[models.Setup.embedded_devices.PS]
model = "PS"
instance = "grid=[2]"

[models.PS]
kind = "device"
type_id = "device.crate"

[models.PS.ports.out]
model = "Out"

[models.Out]
kind = "port"
io = "out"
"#;

    fn loaded_repository() -> ModelRepository {
        let mut repository = ModelRepository::default();
        let definitions = ModelDefinitions::from_toml(DEFINITIONS).unwrap();
        repository.initialize(&definitions).unwrap();
        repository
    }

    fn device_config(embedded: &[(&str, &str)]) -> ModelConfig {
        let mut config = ModelConfig::default();
        for (label, model) in embedded {
            config
                .embedded_devices
                .insert(label.to_string(), PlacementDecl::new(*model));
        }
        config
    }

    #[test]
    fn test_lazy_initialization_in_dependency_order() {
        let mut repository = loaded_repository();
        assert!(!repository.is_device_model_initialized("Setup"));
        assert!(!repository.is_port_model_initialized("Out"));

        let setup = repository.get_device_model("Setup").unwrap();
        assert_eq!(setup.device_type(), DeviceType::Setup);
        assert_eq!(setup.embedded_device("PS").unwrap().instance().number_of_items(), 2);

        assert!(repository.is_device_model_initialized("PS"));
        assert!(repository.is_port_model_initialized("Out"));
        assert!(repository.logical_device("PS.log").is_some());
        assert!(repository.logical_port("Out.log").is_some());
        assert_eq!(repository.logical_devices().len(), 2);
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let mut repository = loaded_repository();
        let first = Arc::clone(repository.get_device_model("PS").unwrap().logical().unwrap());
        let second = Arc::clone(repository.get_device_model("PS").unwrap().logical().unwrap());
        assert!(Arc::ptr_eq(&first, &second));

        let setup = repository.get_device_model("Setup").unwrap();
        let placed = setup.embedded_device("PS").unwrap().logical();
        assert!(Arc::ptr_eq(placed, &first));
    }

    #[test]
    fn test_read_only_access_does_not_initialize() {
        let repository = loaded_repository();
        assert!(matches!(
            repository.device_model("PS"),
            Err(RepositoryError::NotReady { .. })
        ));
        assert!(matches!(
            repository.device_model("Nope"),
            Err(RepositoryError::UnknownModel { .. })
        ));
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let mut repository = ModelRepository::default();
        repository
            .load_device_model("X", "device.generic", ModelConfig::default())
            .unwrap();
        repository
            .load_port_model("X", "port.generic", ModelConfig::default())
            .unwrap();
        assert!(matches!(
            repository.load_device_model("X", "device.board", ModelConfig::default()),
            Err(RepositoryError::DuplicateModel {
                kind: ModelKind::Device,
                ..
            })
        ));
        assert!(repository.get_device_model("X").is_ok());
        assert!(repository.get_port_model("X").is_ok());
        assert_eq!(repository.len(), 2);
    }

    #[test]
    fn test_unknown_factory() {
        let mut repository = ModelRepository::default();
        repository
            .load_device_model("X", "device.spaceship", ModelConfig::default())
            .unwrap();
        assert!(matches!(
            repository.get_device_model("X"),
            Err(RepositoryError::UnknownFactory { .. })
        ));
        assert_eq!(
            repository.entry(ModelKind::Device, "X").unwrap().state(),
            EntryState::Created
        );
    }

    #[test]
    fn test_missing_reference() {
        let mut repository = ModelRepository::default();
        repository
            .load_device_model("Top", "device.generic", device_config(&[("a", "Ghost")]))
            .unwrap();
        let err = repository.get_device_model("Top").unwrap_err();
        assert!(matches!(
            err.root_cause(),
            RepositoryError::UnknownModel { name, .. } if name == "Ghost"
        ));
        assert!(!repository.is_device_model_initialized("Top"));
    }

    #[test]
    fn test_reference_cycle_is_detected() {
        let mut repository = ModelRepository::default();
        repository
            .load_device_model("A", "device.generic", device_config(&[("b", "B")]))
            .unwrap();
        repository
            .load_device_model("B", "device.generic", device_config(&[("a", "A")]))
            .unwrap();
        let err = repository.get_device_model("A").unwrap_err();
        assert!(matches!(
            err.root_cause(),
            RepositoryError::Cycle { name, .. } if name == "A"
        ));
        assert_eq!(repository.entry(ModelKind::Device, "A").unwrap().state(), EntryState::Created);
        assert_eq!(repository.entry(ModelKind::Device, "B").unwrap().state(), EntryState::Created);
    }

    #[test]
    fn test_embedding_violation_leaves_parent_uninitialized() {
        let mut repository = ModelRepository::default();
        repository
            .load_device_model("Crate", "device.crate", ModelConfig::default())
            .unwrap();
        repository
            .load_device_model("Asic", "device.chip", device_config(&[("c", "Crate")]))
            .unwrap();
        let err = repository.get_device_model("Asic").unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Initialization {
                source: ModelError::TypeRuleViolation { .. },
                ..
            }
        ));
        assert!(!repository.is_device_model_initialized("Asic"));
        assert!(repository.is_device_model_initialized("Crate"));
        assert!(repository.logical_device("Asic.log").is_none());
    }

    #[test]
    fn test_force_initialization_at_load() {
        let options = RepositoryOptions {
            force_initialization_at_load: true,
        };
        let mut repository = ModelRepository::new(options.clone());
        repository
            .load_port_model("Out", "port.generic", ModelConfig::default())
            .unwrap();
        assert!(repository.is_port_model_initialized("Out"));

        // Single loads must come in dependency order
        let mut repository = ModelRepository::new(options.clone());
        let mut config = ModelConfig::default();
        config.ports.insert("out".to_string(), PlacementDecl::new("Out"));
        let err = repository
            .load_device_model("PS", "device.crate", config.clone())
            .unwrap_err();
        assert!(matches!(
            err.root_cause(),
            RepositoryError::UnknownModel { name, .. } if name == "Out"
        ));
        assert!(!repository.has_device_model("PS"));

        // A failed load can be retried once its dependency is there
        repository
            .load_port_model("Out", "port.generic", ModelConfig::default())
            .unwrap();
        repository.load_device_model("PS", "device.crate", config).unwrap();
        assert!(repository.is_device_model_initialized("PS"));

        // Batches may come in any order
        let mut repository = ModelRepository::new(options);
        let definitions = ModelDefinitions::from_toml(DEFINITIONS).unwrap();
        repository.initialize(&definitions).unwrap();
        assert!(repository.entries().all(ModelEntry::is_ready));
    }

    #[test]
    fn test_reset() {
        let mut repository = ModelRepository::default();
        assert!(matches!(repository.reset(), Err(RepositoryError::NotInitialized)));

        let mut repository = loaded_repository();
        repository.initialize_all().unwrap();
        repository.reset().unwrap();
        assert!(repository.is_empty());
        assert!(repository.logical_devices().is_empty());
        assert!(!repository.is_initialized());
        assert!(matches!(repository.reset(), Err(RepositoryError::NotInitialized)));
    }

    #[test]
    fn test_reset_after_single_loads() {
        let mut repository = ModelRepository::default();
        repository
            .load_port_model("Out", "port.generic", ModelConfig::default())
            .unwrap();
        repository.get_port_model("Out").unwrap();
        assert!(!repository.is_initialized());

        repository.reset().unwrap();
        assert!(repository.is_empty());
        assert!(repository.logical_port("Out.log").is_none());
        assert!(matches!(repository.reset(), Err(RepositoryError::NotInitialized)));
    }

    #[test]
    fn test_initialize_twice() {
        let mut repository = loaded_repository();
        assert!(matches!(
            repository.initialize(&ModelDefinitions::new()),
            Err(RepositoryError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_custom_factory() {
        fn trigger_board(name: &str) -> DeviceModel {
            let mut model = DeviceModel::with_type(name, DeviceType::Board);
            if let Ok(aux) = model.auxiliaries_mut() {
                aux.insert("family", "trigger");
            }
            model
        }

        let mut repository = ModelRepository::default();
        repository.register_device_factory("device.trigger", trigger_board);
        assert!(repository.has_device_factory("device.trigger"));
        repository
            .load_device_model("TB", "device.trigger", ModelConfig::default())
            .unwrap();
        let model = repository.get_device_model("TB").unwrap();
        assert_eq!(model.device_type(), DeviceType::Board);
        assert_eq!(model.auxiliaries().get("family"), Some("trigger"));
    }

    #[test]
    fn test_grab_and_reset_reinitializes() {
        let mut repository = loaded_repository();
        repository.grab_device_model("PS").unwrap().reset().unwrap();
        assert!(!repository.is_device_model_initialized("PS"));
        let model = repository.get_device_model("PS").unwrap();
        assert!(model.is_initialized());
        assert!(model.has_port("out"));
    }
}

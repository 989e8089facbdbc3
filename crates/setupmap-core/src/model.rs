//! Device and port models (templates)
//!
//! A model is a named, typed definition. Device models hold labelled
//! placements of ports, embedded devices and links; port models are leaves.
//! A model is mutable until it is initialized, at which point it produces its
//! unique logical view and freezes. `reset` returns it to the editable state.

use semver::Version;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ModelConfig, PlacementDecl};
use crate::instance::{Instance, InstanceError};
use crate::link::{LinkDescriptor, LinkEnd, LinkError, PhysicalLink};
use crate::logical::{
    logical_name, physical_name, Auxiliaries, LogicalDevice, LogicalPort, MappingScope,
    PhysicalDevice, PhysicalPort,
};
use crate::repository::RepositoryError;
use crate::types::{DeviceType, ModelKind, PortIo, PortType};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model '{0}' is already initialized")]
    AlreadyInitialized(String),
    #[error("Model '{0}' is not initialized")]
    NotInitialized(String),
    #[error("Model '{model}': duplicate {what} label '{label}'")]
    DuplicateLabel {
        model: String,
        what: &'static str,
        label: String,
    },
    #[error("Model '{model}': no {what} labelled '{label}'")]
    UnknownLabel {
        model: String,
        what: &'static str,
        label: String,
    },
    #[error("Model '{model}': referenced model '{reference}' is not initialized")]
    ReferenceNotInitialized { model: String, reference: String },
    #[error("Model '{0}' does not allow embedded devices")]
    EmbeddedDevicesNotAllowed(String),
    #[error("Model '{model}' of type {parent} cannot embed '{label}' of type {child}")]
    TypeRuleViolation {
        model: String,
        label: String,
        parent: DeviceType,
        child: DeviceType,
    },
    #[error("Port model '{0}' cannot hold placements")]
    PlacementsInPort(String),
    #[error("Model '{model}': placement '{label}' has an invalid instance rule: {source}")]
    Instance {
        model: String,
        label: String,
        #[source]
        source: InstanceError,
    },
    #[error("Model '{model}': invalid link '{label}': {source}")]
    InvalidLink {
        model: String,
        label: String,
        #[source]
        source: LinkError,
    },
    #[error("Model '{model}': invalid version '{version}': {reason}")]
    InvalidVersion {
        model: String,
        version: String,
        reason: String,
    },
    #[error("Model '{model}': cannot resolve {kind} model '{reference}': {source}")]
    Dependency {
        model: String,
        kind: ModelKind,
        reference: String,
        #[source]
        source: Box<RepositoryError>,
    },
}

/// Source of the logical views a model refers to while initializing
///
/// The model repository implements this, initializing referenced models on
/// demand. [`Standalone`] resolves nothing.
pub trait ModelResolver {
    fn resolve_device(&mut self, name: &str) -> Result<Arc<LogicalDevice>, RepositoryError>;
    fn resolve_port(&mut self, name: &str) -> Result<Arc<LogicalPort>, RepositoryError>;
}

/// Resolver for models initialized outside of a repository
#[derive(Debug, Default, Clone, Copy)]
pub struct Standalone;

impl ModelResolver for Standalone {
    fn resolve_device(&mut self, name: &str) -> Result<Arc<LogicalDevice>, RepositoryError> {
        Err(RepositoryError::UnknownModel {
            kind: ModelKind::Device,
            name: name.to_string(),
        })
    }

    fn resolve_port(&mut self, name: &str) -> Result<Arc<LogicalPort>, RepositoryError> {
        Err(RepositoryError::UnknownModel {
            kind: ModelKind::Port,
            name: name.to_string(),
        })
    }
}

fn parse_version(model: &str, version: &str) -> Result<Version, ModelError> {
    Version::parse(version).map_err(|e| ModelError::InvalidVersion {
        model: model.to_string(),
        version: version.to_string(),
        reason: e.to_string(),
    })
}

fn placement_instance(model: &str, label: &str, decl: &PlacementDecl) -> Result<Arc<Instance>, ModelError> {
    let instance = match &decl.instance {
        Some(rule) => Instance::from_str(rule).map_err(|source| ModelError::Instance {
            model: model.to_string(),
            label: label.to_string(),
            source,
        })?,
        None => Instance::Single,
    };
    Ok(Arc::new(instance))
}

/// Template of a device
#[derive(Debug, Clone)]
pub struct DeviceModel {
    name: String,
    /// Type fixed by the factory that built this model
    preset_type: Option<DeviceType>,
    device_type: Option<DeviceType>,
    model_key: Option<u32>,
    version: Option<Version>,
    virtual_device: bool,
    allow_embedded_devices: bool,
    auxiliaries: Auxiliaries,
    ports: BTreeMap<String, PhysicalPort>,
    embedded_devices: BTreeMap<String, PhysicalDevice>,
    links: BTreeMap<String, PhysicalLink>,
    logical: Option<Arc<LogicalDevice>>,
}

impl DeviceModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preset_type: None,
            device_type: None,
            model_key: None,
            version: None,
            virtual_device: false,
            allow_embedded_devices: true,
            auxiliaries: Auxiliaries::new(),
            ports: BTreeMap::new(),
            embedded_devices: BTreeMap::new(),
            links: BTreeMap::new(),
            logical: None,
        }
    }

    /// Model whose type is fixed regardless of configuration
    pub fn with_type(name: impl Into<String>, device_type: DeviceType) -> Self {
        let mut model = Self::new(name);
        model.preset_type = Some(device_type);
        model.device_type = Some(device_type);
        model
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.logical.is_some()
    }

    /// The logical view, once initialized
    pub fn logical(&self) -> Option<&Arc<LogicalDevice>> {
        self.logical.as_ref()
    }

    fn check_editable(&self) -> Result<(), ModelError> {
        if self.is_initialized() {
            return Err(ModelError::AlreadyInitialized(self.name.clone()));
        }
        Ok(())
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type.unwrap_or_default()
    }

    pub fn set_device_type(&mut self, device_type: DeviceType) -> Result<(), ModelError> {
        self.check_editable()?;
        self.device_type = Some(device_type);
        Ok(())
    }

    pub fn model_key(&self) -> Option<u32> {
        self.model_key
    }

    pub fn set_model_key(&mut self, key: u32) -> Result<(), ModelError> {
        self.check_editable()?;
        self.model_key = Some(key);
        Ok(())
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn set_version(&mut self, version: &str) -> Result<(), ModelError> {
        self.check_editable()?;
        self.version = Some(parse_version(&self.name, version)?);
        Ok(())
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_device
    }

    pub fn set_virtual(&mut self, virtual_device: bool) -> Result<(), ModelError> {
        self.check_editable()?;
        self.virtual_device = virtual_device;
        Ok(())
    }

    pub fn allows_embedded_devices(&self) -> bool {
        self.allow_embedded_devices
    }

    pub fn set_allow_embedded_devices(&mut self, allow: bool) -> Result<(), ModelError> {
        self.check_editable()?;
        if !allow && !self.embedded_devices.is_empty() {
            return Err(ModelError::EmbeddedDevicesNotAllowed(self.name.clone()));
        }
        self.allow_embedded_devices = allow;
        Ok(())
    }

    pub fn auxiliaries(&self) -> &Auxiliaries {
        &self.auxiliaries
    }

    pub fn auxiliaries_mut(&mut self) -> Result<&mut Auxiliaries, ModelError> {
        self.check_editable()?;
        Ok(&mut self.auxiliaries)
    }

    pub fn ports(&self) -> &BTreeMap<String, PhysicalPort> {
        &self.ports
    }

    pub fn port(&self, label: &str) -> Option<&PhysicalPort> {
        self.ports.get(label)
    }

    pub fn has_port(&self, label: &str) -> bool {
        self.ports.contains_key(label)
    }

    pub fn embedded_devices(&self) -> &BTreeMap<String, PhysicalDevice> {
        &self.embedded_devices
    }

    pub fn embedded_device(&self, label: &str) -> Option<&PhysicalDevice> {
        self.embedded_devices.get(label)
    }

    pub fn has_embedded_device(&self, label: &str) -> bool {
        self.embedded_devices.contains_key(label)
    }

    pub fn links(&self) -> &BTreeMap<String, PhysicalLink> {
        &self.links
    }

    pub fn link(&self, label: &str) -> Option<&PhysicalLink> {
        self.links.get(label)
    }

    pub fn has_link(&self, label: &str) -> bool {
        self.links.contains_key(label)
    }

    /// Place an initialized port model under `label`
    pub fn add_port(
        &mut self,
        label: &str,
        port_model: &PortModel,
        instance: Arc<Instance>,
    ) -> Result<&mut PhysicalPort, ModelError> {
        self.check_editable()?;
        let logical = port_model
            .logical()
            .cloned()
            .ok_or_else(|| ModelError::ReferenceNotInitialized {
                model: self.name.clone(),
                reference: port_model.name().to_string(),
            })?;
        self.add_port_logical(label, logical, instance)
    }

    /// Place the logical view of a port model under `label`
    pub fn add_port_logical(
        &mut self,
        label: &str,
        logical: Arc<LogicalPort>,
        instance: Arc<Instance>,
    ) -> Result<&mut PhysicalPort, ModelError> {
        self.check_editable()?;
        match self.ports.entry(label.to_string()) {
            Entry::Occupied(_) => Err(ModelError::DuplicateLabel {
                model: self.name.clone(),
                what: "port",
                label: label.to_string(),
            }),
            Entry::Vacant(slot) => {
                debug!(
                    model = %self.name,
                    label = %label,
                    port = %logical.model_name(),
                    instance = %instance,
                    "Adding port"
                );
                Ok(slot.insert(PhysicalPort {
                    name: physical_name(&self.name, label),
                    label: label.to_string(),
                    logical,
                    instance,
                    auxiliaries: Auxiliaries::new(),
                }))
            }
        }
    }

    /// Place an initialized device model under `label`
    pub fn add_embedded_device(
        &mut self,
        label: &str,
        device_model: &DeviceModel,
        instance: Arc<Instance>,
    ) -> Result<&mut PhysicalDevice, ModelError> {
        self.check_editable()?;
        let logical = device_model
            .logical()
            .cloned()
            .ok_or_else(|| ModelError::ReferenceNotInitialized {
                model: self.name.clone(),
                reference: device_model.name().to_string(),
            })?;
        self.add_embedded_logical(label, logical, instance)
    }

    /// Place the logical view of a device model under `label`
    pub fn add_embedded_logical(
        &mut self,
        label: &str,
        logical: Arc<LogicalDevice>,
        instance: Arc<Instance>,
    ) -> Result<&mut PhysicalDevice, ModelError> {
        self.check_editable()?;
        if !self.allow_embedded_devices {
            return Err(ModelError::EmbeddedDevicesNotAllowed(self.name.clone()));
        }
        let parent = self.device_type();
        let child = logical.device_type();
        if !parent.accepts(child) {
            return Err(ModelError::TypeRuleViolation {
                model: self.name.clone(),
                label: label.to_string(),
                parent,
                child,
            });
        }
        match self.embedded_devices.entry(label.to_string()) {
            Entry::Occupied(_) => Err(ModelError::DuplicateLabel {
                model: self.name.clone(),
                what: "embedded device",
                label: label.to_string(),
            }),
            Entry::Vacant(slot) => {
                debug!(
                    model = %self.name,
                    label = %label,
                    device = %logical.model_name(),
                    instance = %instance,
                    "Adding embedded device"
                );
                Ok(slot.insert(PhysicalDevice {
                    name: physical_name(&self.name, label),
                    label: label.to_string(),
                    logical,
                    instance,
                    auxiliaries: Auxiliaries::new(),
                }))
            }
        }
    }

    /// Declare a link between two port placements reachable from this model
    pub fn add_link(&mut self, label: &str, descriptor: &LinkDescriptor) -> Result<&PhysicalLink, ModelError> {
        self.check_editable()?;
        if self.links.contains_key(label) {
            return Err(ModelError::DuplicateLabel {
                model: self.name.clone(),
                what: "link",
                label: label.to_string(),
            });
        }
        let invalid = |source: LinkError| ModelError::InvalidLink {
            model: self.name.clone(),
            label: label.to_string(),
            source,
        };
        let from = LinkEnd::resolve(&descriptor.from, &self.ports, &self.embedded_devices).map_err(&invalid)?;
        let to = LinkEnd::resolve(&descriptor.to, &self.ports, &self.embedded_devices).map_err(&invalid)?;
        if from.cardinality() != to.cardinality() {
            warn!(
                model = %self.name,
                label = %label,
                from = from.cardinality(),
                to = to.cardinality(),
                "Link ends designate different numbers of ports"
            );
        }
        let link = PhysicalLink {
            name: physical_name(&self.name, label),
            label: label.to_string(),
            from,
            to,
        };
        Ok(self.links.entry(label.to_string()).or_insert(link))
    }

    pub fn remove_port(&mut self, label: &str) -> Result<(), ModelError> {
        self.check_editable()?;
        self.ports
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| self.unknown_label("port", label))
    }

    pub fn remove_embedded_device(&mut self, label: &str) -> Result<(), ModelError> {
        self.check_editable()?;
        self.embedded_devices
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| self.unknown_label("embedded device", label))
    }

    pub fn remove_link(&mut self, label: &str) -> Result<(), ModelError> {
        self.check_editable()?;
        self.links
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| self.unknown_label("link", label))
    }

    fn unknown_label(&self, what: &'static str, label: &str) -> ModelError {
        ModelError::UnknownLabel {
            model: self.name.clone(),
            what,
            label: label.to_string(),
        }
    }

    /// Apply `config`, resolve referenced models through `resolver` and freeze
    ///
    /// On failure the model is left exactly as it was before the call.
    pub fn initialize(&mut self, config: &ModelConfig, resolver: &mut dyn ModelResolver) -> Result<(), ModelError> {
        self.check_editable()?;
        let saved = self.clone();
        if let Err(e) = self.configure(config, resolver) {
            *self = saved;
            return Err(e);
        }
        let logical = LogicalDevice {
            name: logical_name(&self.name),
            model_name: self.name.clone(),
            device_type: self.device_type(),
            model_key: self.model_key,
            virtual_device: self.virtual_device,
            ports: self.ports.clone(),
            embedded_devices: self.embedded_devices.clone(),
            links: self.links.clone(),
            auxiliaries: self.auxiliaries.clone(),
        };
        debug!(
            model = %self.name,
            device_type = %logical.device_type,
            ports = logical.ports.len(),
            embedded_devices = logical.embedded_devices.len(),
            links = logical.links.len(),
            "Device model initialized"
        );
        self.logical = Some(Arc::new(logical));
        Ok(())
    }

    /// Initialize from `config` without access to other models
    pub fn initialize_standalone(&mut self, config: &ModelConfig) -> Result<(), ModelError> {
        self.initialize(config, &mut Standalone)
    }

    /// Initialize with the placements added so far and no configuration
    pub fn initialize_simple(&mut self) -> Result<(), ModelError> {
        self.initialize_standalone(&ModelConfig::default())
    }

    fn configure(&mut self, config: &ModelConfig, resolver: &mut dyn ModelResolver) -> Result<(), ModelError> {
        if let Some(device_type) = config.device_type {
            match self.preset_type {
                Some(preset) if preset != device_type => warn!(
                    model = %self.name,
                    preset = %preset,
                    configured = %device_type,
                    "Ignoring configured device type"
                ),
                _ => self.device_type = Some(device_type),
            }
        }
        if self.device_type.is_none() {
            self.device_type = Some(DeviceType::Generic);
        }
        if let Some(key) = config.model_key {
            self.model_key = Some(key);
        }
        if let Some(version) = &config.version {
            self.version = Some(parse_version(&self.name, version)?);
        }
        if let Some(virtual_device) = config.virtual_device {
            self.virtual_device = virtual_device;
        }
        if let Some(allow) = config.allow_embedded_devices {
            self.allow_embedded_devices = allow;
        }
        if config.port_type.is_some() || config.io.is_some() {
            warn!(model = %self.name, "Ignoring port attributes on a device model");
        }

        self.auxiliaries.merge(&config.auxiliaries);
        for (label, rule) in &config.mapping.device_id {
            self.auxiliaries.set_mapping_rule(MappingScope::Device, label, rule.as_str());
        }
        for (label, rule) in &config.mapping.port_id {
            self.auxiliaries.set_mapping_rule(MappingScope::Port, label, rule.as_str());
        }
        for (label, rule) in &config.mapping.link_id {
            self.auxiliaries.set_mapping_rule(MappingScope::Link, label, rule.as_str());
        }

        for (label, decl) in &config.ports {
            let logical = resolver
                .resolve_port(&decl.model)
                .map_err(|e| self.dependency(ModelKind::Port, &decl.model, e))?;
            let instance = placement_instance(&self.name, label, decl)?;
            let port = self.add_port_logical(label, logical, instance)?;
            port.auxiliaries.merge(&decl.auxiliaries);
        }

        if !config.embedded_devices.is_empty() && !self.allow_embedded_devices {
            return Err(ModelError::EmbeddedDevicesNotAllowed(self.name.clone()));
        }
        for (label, decl) in &config.embedded_devices {
            let logical = resolver
                .resolve_device(&decl.model)
                .map_err(|e| self.dependency(ModelKind::Device, &decl.model, e))?;
            let instance = placement_instance(&self.name, label, decl)?;
            let device = self.add_embedded_logical(label, logical, instance)?;
            device.auxiliaries.merge(&decl.auxiliaries);
        }

        for (label, descriptor) in &config.links {
            self.add_link(label, descriptor)?;
        }
        Ok(())
    }

    fn dependency(&self, kind: ModelKind, reference: &str, source: RepositoryError) -> ModelError {
        ModelError::Dependency {
            model: self.name.clone(),
            kind,
            reference: reference.to_string(),
            source: Box::new(source),
        }
    }

    /// Discard the logical view, placements and configured attributes
    pub fn reset(&mut self) -> Result<(), ModelError> {
        if !self.is_initialized() {
            return Err(ModelError::NotInitialized(self.name.clone()));
        }
        self.logical = None;
        self.device_type = self.preset_type;
        self.model_key = None;
        self.version = None;
        self.virtual_device = false;
        self.allow_embedded_devices = true;
        self.auxiliaries.clear();
        self.ports.clear();
        self.embedded_devices.clear();
        self.links.clear();
        debug!(model = %self.name, "Device model reset");
        Ok(())
    }
}

/// Template of a port
#[derive(Debug, Clone)]
pub struct PortModel {
    name: String,
    port_type: PortType,
    io: PortIo,
    model_key: Option<u32>,
    version: Option<Version>,
    auxiliaries: Auxiliaries,
    logical: Option<Arc<LogicalPort>>,
}

impl PortModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_type: PortType::default(),
            io: PortIo::default(),
            model_key: None,
            version: None,
            auxiliaries: Auxiliaries::new(),
            logical: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.logical.is_some()
    }

    pub fn logical(&self) -> Option<&Arc<LogicalPort>> {
        self.logical.as_ref()
    }

    fn check_editable(&self) -> Result<(), ModelError> {
        if self.is_initialized() {
            return Err(ModelError::AlreadyInitialized(self.name.clone()));
        }
        Ok(())
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn set_port_type(&mut self, port_type: PortType) -> Result<(), ModelError> {
        self.check_editable()?;
        self.port_type = port_type;
        Ok(())
    }

    pub fn io(&self) -> PortIo {
        self.io
    }

    pub fn set_io(&mut self, io: PortIo) -> Result<(), ModelError> {
        self.check_editable()?;
        self.io = io;
        Ok(())
    }

    pub fn model_key(&self) -> Option<u32> {
        self.model_key
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn auxiliaries(&self) -> &Auxiliaries {
        &self.auxiliaries
    }

    pub fn auxiliaries_mut(&mut self) -> Result<&mut Auxiliaries, ModelError> {
        self.check_editable()?;
        Ok(&mut self.auxiliaries)
    }

    pub fn initialize(&mut self, config: &ModelConfig) -> Result<(), ModelError> {
        self.check_editable()?;
        if config.has_placements() {
            return Err(ModelError::PlacementsInPort(self.name.clone()));
        }
        if let Some(version) = &config.version {
            self.version = Some(parse_version(&self.name, version)?);
        }
        if let Some(port_type) = config.port_type {
            self.port_type = port_type;
        }
        if let Some(io) = config.io {
            self.io = io;
        }
        if let Some(key) = config.model_key {
            self.model_key = Some(key);
        }
        self.auxiliaries.merge(&config.auxiliaries);

        self.logical = Some(Arc::new(LogicalPort {
            name: logical_name(&self.name),
            model_name: self.name.clone(),
            port_type: self.port_type,
            io: self.io,
            model_key: self.model_key,
            auxiliaries: self.auxiliaries.clone(),
        }));
        debug!(model = %self.name, port_type = %self.port_type, "Port model initialized");
        Ok(())
    }

    pub fn initialize_simple(&mut self) -> Result<(), ModelError> {
        self.initialize(&ModelConfig::default())
    }

    pub fn reset(&mut self) -> Result<(), ModelError> {
        if !self.is_initialized() {
            return Err(ModelError::NotInitialized(self.name.clone()));
        }
        self.logical = None;
        self.port_type = PortType::default();
        self.io = PortIo::default();
        self.model_key = None;
        self.version = None;
        self.auxiliaries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_port(name: &str) -> PortModel {
        let mut port = PortModel::new(name);
        port.initialize_simple().unwrap();
        port
    }

    fn ready_device(name: &str, device_type: DeviceType) -> DeviceModel {
        let mut device = DeviceModel::with_type(name, device_type);
        device.initialize_simple().unwrap();
        device
    }

    #[test]
    fn test_add_port_and_initialize() {
        let out = ready_port("Out");
        let mut model = DeviceModel::new("PS");
        model.add_port("out", &out, Arc::new(Instance::Single)).unwrap();
        model.initialize_simple().unwrap();

        let logical = model.logical().unwrap();
        assert_eq!(logical.name(), "PS.log");
        assert_eq!(logical.device_type(), DeviceType::Generic);
        let port = logical.port("out").unwrap();
        assert_eq!(port.name(), "PS.out.phys");
        assert!(Arc::ptr_eq(port.logical(), out.logical().unwrap()));
    }

    #[test]
    fn test_duplicate_label() {
        let out = ready_port("Out");
        let mut model = DeviceModel::new("PS");
        model.add_port("out", &out, Arc::new(Instance::Single)).unwrap();
        let err = model.add_port("out", &out, Arc::new(Instance::Single)).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateLabel { what: "port", .. }));
    }

    #[test]
    fn test_reference_must_be_initialized() {
        let out = PortModel::new("Out");
        let mut model = DeviceModel::new("PS");
        let err = model.add_port("out", &out, Arc::new(Instance::Single)).unwrap_err();
        assert!(matches!(err, ModelError::ReferenceNotInitialized { .. }));
    }

    #[test]
    fn test_no_mutation_after_initialize() {
        let out = ready_port("Out");
        let mut model = DeviceModel::new("PS");
        model.initialize_simple().unwrap();
        assert!(matches!(
            model.add_port("out", &out, Arc::new(Instance::Single)),
            Err(ModelError::AlreadyInitialized(_))
        ));
        assert!(model.set_model_key(3).is_err());
        assert!(model.auxiliaries_mut().is_err());
        assert!(matches!(model.initialize_simple(), Err(ModelError::AlreadyInitialized(_))));
    }

    #[test]
    fn test_embedding_type_rule() {
        let big = ready_device("Crate", DeviceType::Crate);
        let mut chip = DeviceModel::with_type("Asic", DeviceType::Chip);
        let err = chip
            .add_embedded_device("crate", &big, Arc::new(Instance::Single))
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::TypeRuleViolation {
                parent: DeviceType::Chip,
                child: DeviceType::Crate,
                ..
            }
        ));

        let board = ready_device("Board", DeviceType::Board);
        let mut rack = DeviceModel::with_type("Rack", DeviceType::Rack);
        rack.add_embedded_device("board", &board, Arc::new(Instance::linear(3).unwrap()))
            .unwrap();
        assert_eq!(rack.embedded_device("board").unwrap().instance().number_of_items(), 3);
    }

    #[test]
    fn test_embedded_devices_disallowed() {
        let board = ready_device("Board", DeviceType::Board);
        let mut model = DeviceModel::new("Leaf");
        model.set_allow_embedded_devices(false).unwrap();
        assert!(matches!(
            model.add_embedded_device("b", &board, Arc::new(Instance::Single)),
            Err(ModelError::EmbeddedDevicesNotAllowed(_))
        ));
    }

    #[test]
    fn test_standalone_initialize_fails_on_reference_and_rolls_back() {
        let out = ready_port("Out");
        let mut model = DeviceModel::new("PS");
        model.add_port("aux", &out, Arc::new(Instance::Single)).unwrap();

        let mut config = ModelConfig::default();
        config.model_key = Some(9);
        config.ports.insert("out".to_string(), PlacementDecl::new("Out"));

        let err = model.initialize_standalone(&config).unwrap_err();
        assert!(matches!(err, ModelError::Dependency { kind: ModelKind::Port, .. }));
        assert!(!model.is_initialized());
        assert!(model.has_port("aux"));
        assert!(!model.has_port("out"));
        assert_eq!(model.model_key(), None);
    }

    #[test]
    fn test_configured_attributes() {
        let mut config = ModelConfig::default();
        config.device_type = Some(DeviceType::Board);
        config.model_key = Some(42);
        config.version = Some("2.1.0".to_string());
        config.virtual_device = Some(true);
        config.mapping.device_id.insert("chip".to_string(), "[chip:slot+0]".to_string());

        let mut model = DeviceModel::new("Board");
        model.initialize_standalone(&config).unwrap();
        assert_eq!(model.device_type(), DeviceType::Board);
        assert_eq!(model.model_key(), Some(42));
        assert_eq!(model.version().unwrap().major, 2);
        assert!(model.is_virtual());
        assert_eq!(
            model.logical().unwrap().mapping_rule(MappingScope::Device, "chip"),
            Some("[chip:slot+0]")
        );
    }

    #[test]
    fn test_preset_type_wins() {
        let mut config = ModelConfig::default();
        config.device_type = Some(DeviceType::Chip);
        let mut model = DeviceModel::with_type("Crate", DeviceType::Crate);
        model.initialize_standalone(&config).unwrap();
        assert_eq!(model.device_type(), DeviceType::Crate);
    }

    #[test]
    fn test_invalid_version() {
        let mut config = ModelConfig::default();
        config.version = Some("one".to_string());
        let mut model = DeviceModel::new("X");
        assert!(matches!(
            model.initialize_standalone(&config),
            Err(ModelError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_reset() {
        let out = ready_port("Out");
        let mut model = DeviceModel::with_type("PS", DeviceType::Crate);
        assert!(matches!(model.reset(), Err(ModelError::NotInitialized(_))));

        model.add_port("out", &out, Arc::new(Instance::Single)).unwrap();
        model.initialize_simple().unwrap();
        model.reset().unwrap();
        assert!(!model.is_initialized());
        assert!(model.ports().is_empty());
        assert_eq!(model.device_type(), DeviceType::Crate);
        model.add_port("out", &out, Arc::new(Instance::Single)).unwrap();
    }

    #[test]
    fn test_links() {
        let out = ready_port("Out");
        let mut ps = DeviceModel::with_type("PS", DeviceType::Crate);
        ps.add_port("out", &out, Arc::new(Instance::Single)).unwrap();
        ps.initialize_simple().unwrap();

        let mut setup = DeviceModel::with_type("Setup", DeviceType::Setup);
        setup
            .add_embedded_device("PS", &ps, Arc::new(Instance::linear(4).unwrap()))
            .unwrap();
        let link = setup
            .add_link("chain", &LinkDescriptor::new("PS[0-1]/out", "PS[2-3]/out"))
            .unwrap();
        assert_eq!(link.from().cardinality(), 2);
        assert_eq!(link.to().port_model(), "Out");

        let err = setup
            .add_link("bad", &LinkDescriptor::new("PS[4]/out", "PS[0]/out"))
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidLink { .. }));
        let err = setup
            .add_link("bad", &LinkDescriptor::new("PS/in", "PS/out"))
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidLink {
                source: LinkError::UnknownPort { .. },
                ..
            }
        ));

        setup.remove_link("chain").unwrap();
        assert!(matches!(
            setup.remove_link("chain"),
            Err(ModelError::UnknownLabel { what: "link", .. })
        ));
    }

    #[test]
    fn test_port_model_rejects_placements() {
        let mut config = ModelConfig::default();
        config.ports.insert("x".to_string(), PlacementDecl::new("Out"));
        let mut port = PortModel::new("Bad");
        assert!(matches!(port.initialize(&config), Err(ModelError::PlacementsInPort(_))));

        let mut config = ModelConfig::default();
        config.io = Some(PortIo::In);
        config.port_type = Some(PortType::Signal);
        let mut port = PortModel::new("In");
        port.initialize(&config).unwrap();
        let logical = port.logical().unwrap();
        assert_eq!(logical.io(), PortIo::In);
        assert_eq!(logical.port_type(), PortType::Signal);
        assert_eq!(logical.name(), "In.log");
    }
}

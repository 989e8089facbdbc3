//! Logical views and placements
//!
//! Initializing a model produces exactly one logical view: the read-only
//! aggregate of its port, embedded-device and link placements plus the
//! model's auxiliary metadata. Placements refer to the logical view of the
//! model they instantiate through a shared handle, so a model used in many
//! places is represented once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::instance::Instance;
use crate::link::PhysicalLink;
use crate::types::{DeviceType, PortIo, PortType};

/// Name of the logical view of `model`
pub fn logical_name(model: &str) -> String {
    format!("{}.log", model)
}

/// Name of the placement `label` inside `model`
pub fn physical_name(model: &str, label: &str) -> String {
    format!("{}.{}.phys", model, label)
}

/// Which kind of placement an addressing rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingScope {
    Device,
    Port,
    Link,
}

impl MappingScope {
    pub fn key_prefix(&self) -> &'static str {
        match self {
            MappingScope::Device => "mapping.device_id.",
            MappingScope::Port => "mapping.port_id.",
            MappingScope::Link => "mapping.link_id.",
        }
    }

    /// Auxiliary key holding the addressing rule of placement `label`
    pub fn key(&self, label: &str) -> String {
        format!("{}{}", self.key_prefix(), label)
    }
}

/// Free-form string metadata attached to models and placements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Auxiliaries(BTreeMap<String, String>);

impl Auxiliaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy all entries of `other`, overwriting existing keys
    pub fn merge(&mut self, other: &Auxiliaries) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Entries whose key starts with `prefix`, with the prefix stripped
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.0
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(move |(k, v)| (&k[prefix.len()..], v.as_str()))
    }

    pub fn mapping_rule(&self, scope: MappingScope, label: &str) -> Option<&str> {
        self.get(&scope.key(label))
    }

    pub fn set_mapping_rule(&mut self, scope: MappingScope, label: &str, rule: impl Into<String>) {
        self.insert(scope.key(label), rule);
    }
}

impl From<BTreeMap<String, String>> for Auxiliaries {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Placement of a device model inside another device model
#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub(crate) name: String,
    pub(crate) label: String,
    pub(crate) logical: Arc<LogicalDevice>,
    pub(crate) instance: Arc<Instance>,
    pub(crate) auxiliaries: Auxiliaries,
}

impl PhysicalDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn logical(&self) -> &Arc<LogicalDevice> {
        &self.logical
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn auxiliaries(&self) -> &Auxiliaries {
        &self.auxiliaries
    }

    pub fn auxiliaries_mut(&mut self) -> &mut Auxiliaries {
        &mut self.auxiliaries
    }
}

/// Placement of a port model inside a device model
#[derive(Debug, Clone)]
pub struct PhysicalPort {
    pub(crate) name: String,
    pub(crate) label: String,
    pub(crate) logical: Arc<LogicalPort>,
    pub(crate) instance: Arc<Instance>,
    pub(crate) auxiliaries: Auxiliaries,
}

impl PhysicalPort {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn logical(&self) -> &Arc<LogicalPort> {
        &self.logical
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn auxiliaries(&self) -> &Auxiliaries {
        &self.auxiliaries
    }

    pub fn auxiliaries_mut(&mut self) -> &mut Auxiliaries {
        &mut self.auxiliaries
    }
}

/// Read-only aggregate of an initialized device model
#[derive(Debug)]
pub struct LogicalDevice {
    pub(crate) name: String,
    pub(crate) model_name: String,
    pub(crate) device_type: DeviceType,
    pub(crate) model_key: Option<u32>,
    pub(crate) virtual_device: bool,
    pub(crate) ports: BTreeMap<String, PhysicalPort>,
    pub(crate) embedded_devices: BTreeMap<String, PhysicalDevice>,
    pub(crate) links: BTreeMap<String, PhysicalLink>,
    pub(crate) auxiliaries: Auxiliaries,
}

impl LogicalDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the device model this view belongs to
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn model_key(&self) -> Option<u32> {
        self.model_key
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_device
    }

    pub fn ports(&self) -> &BTreeMap<String, PhysicalPort> {
        &self.ports
    }

    pub fn port(&self, label: &str) -> Option<&PhysicalPort> {
        self.ports.get(label)
    }

    pub fn embedded_devices(&self) -> &BTreeMap<String, PhysicalDevice> {
        &self.embedded_devices
    }

    pub fn embedded_device(&self, label: &str) -> Option<&PhysicalDevice> {
        self.embedded_devices.get(label)
    }

    pub fn links(&self) -> &BTreeMap<String, PhysicalLink> {
        &self.links
    }

    pub fn link(&self, label: &str) -> Option<&PhysicalLink> {
        self.links.get(label)
    }

    pub fn auxiliaries(&self) -> &Auxiliaries {
        &self.auxiliaries
    }

    /// Addressing rule declared for placement `label`, if any
    pub fn mapping_rule(&self, scope: MappingScope, label: &str) -> Option<&str> {
        self.auxiliaries.mapping_rule(scope, label)
    }
}

/// Read-only aggregate of an initialized port model
#[derive(Debug)]
pub struct LogicalPort {
    pub(crate) name: String,
    pub(crate) model_name: String,
    pub(crate) port_type: PortType,
    pub(crate) io: PortIo,
    pub(crate) model_key: Option<u32>,
    pub(crate) auxiliaries: Auxiliaries,
}

impl LogicalPort {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn io(&self) -> PortIo {
        self.io
    }

    pub fn model_key(&self) -> Option<u32> {
        self.model_key
    }

    pub fn auxiliaries(&self) -> &Auxiliaries {
        &self.auxiliaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(logical_name("PS"), "PS.log");
        assert_eq!(physical_name("Setup", "PS"), "Setup.PS.phys");
    }

    #[test]
    fn test_mapping_rules_are_scoped() {
        let mut aux = Auxiliaries::new();
        aux.set_mapping_rule(MappingScope::Device, "out", "[board:slot+0]");
        aux.set_mapping_rule(MappingScope::Port, "out", "[port:port=0]");

        assert_eq!(aux.mapping_rule(MappingScope::Device, "out"), Some("[board:slot+0]"));
        assert_eq!(aux.mapping_rule(MappingScope::Port, "out"), Some("[port:port=0]"));
        assert_eq!(aux.mapping_rule(MappingScope::Link, "out"), None);
        assert_eq!(aux.get("mapping.port_id.out"), Some("[port:port=0]"));
    }

    #[test]
    fn test_with_prefix() {
        let mut aux = Auxiliaries::new();
        aux.insert("mapping.port_id.a", "1");
        aux.insert("mapping.port_id.b", "2");
        aux.insert("mapping.device_id.c", "3");
        aux.insert("vendor", "acme");

        let ports: Vec<_> = aux.with_prefix("mapping.port_id.").collect();
        assert_eq!(ports, vec![("a", "1"), ("b", "2")]);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut base = Auxiliaries::new();
        base.insert("vendor", "acme");
        base.insert("rev", "1");
        let mut other = Auxiliaries::new();
        other.insert("rev", "2");
        base.merge(&other);
        assert_eq!(base.get("rev"), Some("2"));
        assert_eq!(base.len(), 2);
    }
}

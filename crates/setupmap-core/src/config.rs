//! Model definitions - the TOML form of device and port templates
//!
//! A definitions file declares every model under `[models.<name>]`:
//!
//! ```toml
//! [models.Out]
//! kind = "port"
//! io = "out"
//!
//! [models.PS]
//! kind = "device"
//! type_id = "device.crate"
//!
//! [models.PS.ports.out]
//! model = "Out"
//!
//! [models.PS.mapping.port_id]
//! out = "[ps_port:port=0]"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::link::LinkDescriptor;
use crate::logical::Auxiliaries;
use crate::types::{DeviceType, ModelKind, PortIo, PortType};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read model definitions: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse model definitions: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model definitions: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Model '{0}' is defined more than once")]
    DuplicateModel(String),
}

/// Use of a model inside a device model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecl {
    /// Name of the placed model
    pub model: String,
    /// Instance rule, `single` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Auxiliaries::is_empty")]
    pub auxiliaries: Auxiliaries,
}

impl PlacementDecl {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instance: None,
            auxiliaries: Auxiliaries::new(),
        }
    }

    pub fn with_instance(mut self, rule: impl Into<String>) -> Self {
        self.instance = Some(rule.into());
        self
    }
}

/// Addressing rules of the placements of a model, keyed by placement label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingRules {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub device_id: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_id: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub link_id: BTreeMap<String, String>,
}

/// Raw configuration of a model, applied when the model is initialized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<PortType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io: Option<PortIo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_key: Option<u32>,
    /// Semantic version of the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "virtual", skip_serializing_if = "Option::is_none")]
    pub virtual_device: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_embedded_devices: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, PlacementDecl>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub embedded_devices: BTreeMap<String, PlacementDecl>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, LinkDescriptor>,
    #[serde(default)]
    pub mapping: MappingRules,
    #[serde(default, skip_serializing_if = "Auxiliaries::is_empty")]
    pub auxiliaries: Auxiliaries,
}

impl ModelConfig {
    pub fn has_placements(&self) -> bool {
        !self.ports.is_empty() || !self.embedded_devices.is_empty() || !self.links.is_empty()
    }
}

/// One model of a definitions file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub kind: ModelKind,
    /// Factory identifier; defaults to the generic factory of the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<String>,
    #[serde(flatten)]
    pub config: ModelConfig,
}

impl ModelDefinition {
    pub fn device(config: ModelConfig) -> Self {
        Self {
            kind: ModelKind::Device,
            type_id: None,
            config,
        }
    }

    pub fn port(config: ModelConfig) -> Self {
        Self {
            kind: ModelKind::Port,
            type_id: None,
            config,
        }
    }

    pub fn with_type_id(mut self, type_id: impl Into<String>) -> Self {
        self.type_id = Some(type_id.into());
        self
    }

    pub fn type_id(&self) -> &str {
        match (&self.type_id, self.kind) {
            (Some(type_id), _) => type_id,
            (None, ModelKind::Device) => "device.generic",
            (None, ModelKind::Port) => "port.generic",
        }
    }
}

/// A set of model definitions keyed by model name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinitions {
    #[serde(default)]
    pub models: BTreeMap<String, ModelDefinition>,
}

impl ModelDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load definitions from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let definitions = Self::from_toml(&content)?;
        info!(
            path = %path.display(),
            models = definitions.models.len(),
            "Loaded model definitions"
        );
        Ok(definitions)
    }

    /// Load definitions from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let definitions: ModelDefinitions = toml::from_str(content)?;
        Ok(definitions)
    }

    /// Save definitions to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn add(&mut self, name: impl Into<String>, definition: ModelDefinition) -> Result<(), ConfigError> {
        let name = name.into();
        if self.models.contains_key(&name) {
            return Err(ConfigError::DuplicateModel(name));
        }
        self.models.insert(name, definition);
        Ok(())
    }

    /// Merge another set of definitions; a name defined in both is an error
    pub fn extend(&mut self, other: ModelDefinitions) -> Result<(), ConfigError> {
        for (name, definition) in other.models {
            self.add(name, definition)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DEFINITIONS: &str = r#"
[models.Out]
kind = "port"
io = "out"
port_type = "power"

[models.PS]
kind = "device"
type_id = "device.crate"
model_key = 7
version = "1.2.0"
virtual = false

[models.PS.ports.out]
model = "Out"

[models.PS.mapping.port_id]
out = "[ps_port:port=0]"

[models.PS.auxiliaries]
vendor = "acme"

[models.Setup]
kind = "device"
device_type = "setup"

[models.Setup.embedded_devices.PS]
model = "PS"
instance = "grid=[2]"

[models.Setup.links.feed]
from = "PS[0]/out"
to = "PS[1]/out"
"#;

    #[test]
    fn test_parse_definitions() {
        let definitions = ModelDefinitions::from_toml(DEFINITIONS).unwrap();
        assert_eq!(definitions.len(), 3);

        let out = &definitions.models["Out"];
        assert_eq!(out.kind, ModelKind::Port);
        assert_eq!(out.type_id(), "port.generic");
        assert_eq!(out.config.io, Some(PortIo::Out));
        assert_eq!(out.config.port_type, Some(PortType::Power));

        let ps = &definitions.models["PS"];
        assert_eq!(ps.type_id(), "device.crate");
        assert_eq!(ps.config.model_key, Some(7));
        assert_eq!(ps.config.version.as_deref(), Some("1.2.0"));
        assert_eq!(ps.config.virtual_device, Some(false));
        assert_eq!(ps.config.ports["out"].model, "Out");
        assert_eq!(ps.config.mapping.port_id["out"], "[ps_port:port=0]");
        assert_eq!(ps.config.auxiliaries.get("vendor"), Some("acme"));

        let setup = &definitions.models["Setup"];
        assert_eq!(setup.type_id(), "device.generic");
        assert_eq!(setup.config.device_type, Some(DeviceType::Setup));
        assert_eq!(setup.config.embedded_devices["PS"].instance.as_deref(), Some("grid=[2]"));
        assert_eq!(setup.config.links["feed"], LinkDescriptor::new("PS[0]/out", "PS[1]/out"));
    }

    #[test]
    fn test_missing_kind_is_rejected() {
        let result = ModelDefinitions::from_toml("[models.X]\nmodel_key = 1\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_extend_rejects_duplicates() {
        let mut definitions = ModelDefinitions::from_toml(DEFINITIONS).unwrap();
        let mut other = ModelDefinitions::new();
        other
            .add("PS", ModelDefinition::device(ModelConfig::default()))
            .unwrap();
        assert!(matches!(
            definitions.extend(other),
            Err(ConfigError::DuplicateModel(name)) if name == "PS"
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models.toml");
        let definitions = ModelDefinitions::from_toml(DEFINITIONS).unwrap();
        definitions.to_file(&path).unwrap();

        let loaded = ModelDefinitions::from_file(&path).unwrap();
        assert_eq!(loaded, definitions);
    }
}

//! Enumerations shared by device and port models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device category, ordered by significance
///
/// `Generic` is the wildcard: a generic parent accepts any child and a
/// generic child fits in any parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Generic,
    Chip,
    Board,
    Module,
    Crate,
    Rack,
    Setup,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Generic => "generic",
            DeviceType::Chip => "chip",
            DeviceType::Board => "board",
            DeviceType::Module => "module",
            DeviceType::Crate => "crate",
            DeviceType::Rack => "rack",
            DeviceType::Setup => "setup",
        }
    }

    /// Whether a device of type `child` may be embedded in a device of this type
    pub fn accepts(&self, child: DeviceType) -> bool {
        *self == DeviceType::Generic || child == DeviceType::Generic || child <= *self
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" => Ok(DeviceType::Generic),
            "chip" => Ok(DeviceType::Chip),
            "board" => Ok(DeviceType::Board),
            "module" => Ok(DeviceType::Module),
            "crate" => Ok(DeviceType::Crate),
            "rack" => Ok(DeviceType::Rack),
            "setup" => Ok(DeviceType::Setup),
            other => Err(format!("unknown device type '{}'", other)),
        }
    }
}

/// Nature of a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    #[default]
    Generic,
    Data,
    Power,
    Signal,
    Method,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortType::Generic => "generic",
            PortType::Data => "data",
            PortType::Power => "power",
            PortType::Signal => "signal",
            PortType::Method => "method",
        };
        f.write_str(name)
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortIo {
    In,
    Out,
    #[default]
    InOut,
}

/// The two disjoint model name spaces of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Device,
    Port,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Device => f.write_str("device"),
            ModelKind::Port => f.write_str("port"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_rule() {
        assert!(DeviceType::Crate.accepts(DeviceType::Board));
        assert!(DeviceType::Board.accepts(DeviceType::Board));
        assert!(DeviceType::Board.accepts(DeviceType::Chip));
        assert!(!DeviceType::Chip.accepts(DeviceType::Crate));
        assert!(!DeviceType::Board.accepts(DeviceType::Rack));
    }

    #[test]
    fn test_generic_is_wildcard() {
        assert!(DeviceType::Generic.accepts(DeviceType::Setup));
        assert!(DeviceType::Chip.accepts(DeviceType::Generic));
    }

    #[test]
    fn test_device_type_parse() {
        assert_eq!("Crate".parse::<DeviceType>().unwrap(), DeviceType::Crate);
        assert!("spaceship".parse::<DeviceType>().is_err());
        assert_eq!(DeviceType::Module.to_string(), "module");
    }
}

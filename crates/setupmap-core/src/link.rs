//! Links between port placements
//!
//! A link end is written as a `/` separated walk from the owning model down
//! to a port: every segment but the last names an embedded device, the last
//! names a port. Any segment may select a subset of the replicas of its
//! placement:
//!
//! ```text
//! out                  the port 'out' of the model itself
//! PS[1]/out            port 'out' of the second PS replica
//! board[0-3]/adc/in[*] every 'in' of the ADC on boards 0..=3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::logical::{LogicalDevice, PhysicalDevice, PhysicalPort};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Malformed link end '{end}': {reason}")]
    Syntax { end: String, reason: String },
    #[error("Link end '{end}': no embedded device '{label}'")]
    UnknownDevice { end: String, label: String },
    #[error("Link end '{end}': no port '{label}'")]
    UnknownPort { end: String, label: String },
    #[error("Link end '{end}': bad selection on '{label}': {reason}")]
    Selection {
        end: String,
        label: String,
        reason: String,
    },
}

/// Declared endpoints of a link, as read from a model definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescriptor {
    pub from: String,
    pub to: String,
}

impl LinkDescriptor {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Subset of the replicas of a placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSelection {
    All,
    Index(usize),
    /// Inclusive range
    Range(usize, usize),
}

impl ReplicaSelection {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text == "*" {
            return Some(ReplicaSelection::All);
        }
        match text.split_once('-') {
            Some((first, last)) => {
                let first = first.trim().parse().ok()?;
                let last = last.trim().parse().ok()?;
                (first <= last).then_some(ReplicaSelection::Range(first, last))
            }
            None => text.parse().ok().map(ReplicaSelection::Index),
        }
    }

    /// Number of selected replicas out of `items`, or `None` when out of range
    pub fn count(&self, items: usize) -> Option<usize> {
        match *self {
            ReplicaSelection::All => Some(items),
            ReplicaSelection::Index(index) => (index < items).then_some(1),
            ReplicaSelection::Range(first, last) => (last < items).then_some(last - first + 1),
        }
    }
}

impl fmt::Display for ReplicaSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaSelection::All => write!(f, "*"),
            ReplicaSelection::Index(index) => write!(f, "{}", index),
            ReplicaSelection::Range(first, last) => write!(f, "{}-{}", first, last),
        }
    }
}

/// One resolved segment of a link end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLevel {
    pub label: String,
    pub selection: ReplicaSelection,
    /// Number of replicas selected at this level
    pub replicas: usize,
}

/// A link end resolved against the placements of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEnd {
    text: String,
    levels: Vec<LinkLevel>,
    port_model: String,
}

impl LinkEnd {
    /// Resolve `text` against the placements of the model declaring the link
    pub fn resolve(
        text: &str,
        ports: &BTreeMap<String, PhysicalPort>,
        devices: &BTreeMap<String, PhysicalDevice>,
    ) -> Result<Self, LinkError> {
        let syntax = |reason: &str| LinkError::Syntax {
            end: text.to_string(),
            reason: reason.to_string(),
        };
        let segments: Vec<&str> = text.trim().split('/').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(syntax("empty segment"));
        }

        let mut levels = Vec::with_capacity(segments.len());
        // Logical view of the device reached so far; None while still at the declaring model
        let mut reached: Option<Arc<LogicalDevice>> = None;
        let last = segments.len() - 1;

        for (depth, segment) in segments.iter().enumerate() {
            let (label, selection) = parse_segment(segment).ok_or_else(|| syntax("bad selector"))?;
            let selection_error = |reason: &str| LinkError::Selection {
                end: text.to_string(),
                label: label.to_string(),
                reason: reason.to_string(),
            };
            let (level_devices, level_ports) = match &reached {
                Some(logical) => (logical.embedded_devices(), logical.ports()),
                None => (devices, ports),
            };

            if depth < last {
                let device = level_devices.get(label).ok_or_else(|| LinkError::UnknownDevice {
                    end: text.to_string(),
                    label: label.to_string(),
                })?;
                let items = device.instance().number_of_items();
                let replicas = selection.count(items).ok_or_else(|| selection_error("out of range"))?;
                let next = Arc::clone(device.logical());
                levels.push(LinkLevel {
                    label: label.to_string(),
                    selection,
                    replicas,
                });
                reached = Some(next);
            } else {
                let port = level_ports.get(label).ok_or_else(|| LinkError::UnknownPort {
                    end: text.to_string(),
                    label: label.to_string(),
                })?;
                let items = port.instance().number_of_items();
                let replicas = selection.count(items).ok_or_else(|| selection_error("out of range"))?;
                levels.push(LinkLevel {
                    label: label.to_string(),
                    selection,
                    replicas,
                });
                return Ok(Self {
                    text: text.trim().to_string(),
                    levels,
                    port_model: port.logical().model_name().to_string(),
                });
            }
        }
        Err(syntax("missing port segment"))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn levels(&self) -> &[LinkLevel] {
        &self.levels
    }

    /// Name of the port model at the end of the walk
    pub fn port_model(&self) -> &str {
        &self.port_model
    }

    /// Number of port replicas this end designates
    pub fn cardinality(&self) -> usize {
        self.levels.iter().map(|level| level.replicas).product()
    }
}

fn parse_segment(segment: &str) -> Option<(&str, ReplicaSelection)> {
    match segment.find('[') {
        None => Some((segment, ReplicaSelection::All)),
        Some(open) => {
            let label = segment[..open].trim();
            let inner = segment[open + 1..].strip_suffix(']')?;
            if label.is_empty() {
                return None;
            }
            Some((label, ReplicaSelection::parse(inner)?))
        }
    }
}

/// Link placement inside a device model
#[derive(Debug, Clone)]
pub struct PhysicalLink {
    pub(crate) name: String,
    pub(crate) label: String,
    pub(crate) from: LinkEnd,
    pub(crate) to: LinkEnd,
}

impl PhysicalLink {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn from(&self) -> &LinkEnd {
        &self.from
    }

    pub fn to(&self) -> &LinkEnd {
        &self.to
    }
}

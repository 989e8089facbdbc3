//! Instance mapping
//!
//! Walks the logical tree of an initialized top-level device model and gives
//! every mapped replica of every port and embedded device a hierarchical
//! identifier and a path. A placement is mapped when its parent model carries
//! an addressing rule for it (`mapping.device_id.<label>`,
//! `mapping.port_id.<label>`); placements without a rule are traversed
//! transparently. Identifiers are derived from the nearest mapped ancestor,
//! which is not necessarily the structural parent, while paths carry the label
//! of every placement crossed on the way down.
//!
//! The result is a [`MappingTable`] indexed both by identifier and by path.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::instance::Slot;
use crate::link::PhysicalLink;
use crate::logical::{LogicalDevice, LogicalPort, MappingScope};
use crate::model::DeviceModel;
use crate::path;
use crate::schema::{MappingId, MappingSchema, SchemaError};

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Top-level model '{0}' is not initialized")]
    NotInitialized(String),
    #[error("'only_categories' and 'excluded_categories' cannot both be set")]
    ConflictingFilters,
    #[error("Failed to build the setup identifier: {0}")]
    Root(#[source] SchemaError),
    #[error("Identifier {id} is mapped twice ('{existing}' and '{path}')")]
    DuplicateId {
        id: MappingId,
        existing: String,
        path: String,
    },
    #[error("Path '{0}' is mapped twice")]
    DuplicatePath(String),
}

/// Mapping settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Keep the setup root entry in the table
    #[serde(default = "default_true")]
    pub include_root: bool,
    #[serde(default = "default_true")]
    pub port_mapping: bool,
    #[serde(default)]
    pub link_mapping: bool,
    /// Deepest mapped level below the root, 0 for no limit
    #[serde(default)]
    pub max_depth: u32,
    #[serde(default)]
    pub only_categories: Vec<String>,
    #[serde(default)]
    pub excluded_categories: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            include_root: true,
            port_mapping: true,
            link_mapping: false,
            max_depth: 0,
            only_categories: Vec::new(),
            excluded_categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum CategoryFilter {
    All,
    Only(BTreeSet<String>),
    Excluded(BTreeSet<String>),
}

impl CategoryFilter {
    fn from_config(config: &MappingConfig) -> Result<Self, MappingError> {
        match (config.only_categories.is_empty(), config.excluded_categories.is_empty()) {
            (true, true) => Ok(CategoryFilter::All),
            (false, true) => Ok(CategoryFilter::Only(config.only_categories.iter().cloned().collect())),
            (true, false) => Ok(CategoryFilter::Excluded(
                config.excluded_categories.iter().cloned().collect(),
            )),
            (false, false) => Err(MappingError::ConflictingFilters),
        }
    }

    fn admits(&self, category: Option<&str>) -> bool {
        match (self, category) {
            (CategoryFilter::All, _) => true,
            (CategoryFilter::Only(names), Some(name)) => names.contains(name),
            (CategoryFilter::Only(_), None) => false,
            (CategoryFilter::Excluded(names), Some(name)) => !names.contains(name),
            (CategoryFilter::Excluded(_), None) => true,
        }
    }
}

/// What a mapping entry stands for
#[derive(Debug, Clone)]
pub enum MappedObject {
    Device(Arc<LogicalDevice>),
    Port(Arc<LogicalPort>),
    Link(PhysicalLink),
}

impl MappedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            MappedObject::Device(_) => "device",
            MappedObject::Port(_) => "port",
            MappedObject::Link(_) => "link",
        }
    }

    /// Name of the model (devices, ports) or placement (links) behind the entry
    pub fn model_name(&self) -> &str {
        match self {
            MappedObject::Device(logical) => logical.model_name(),
            MappedObject::Port(logical) => logical.model_name(),
            MappedObject::Link(link) => link.name(),
        }
    }

    pub fn as_device(&self) -> Option<&Arc<LogicalDevice>> {
        match self {
            MappedObject::Device(logical) => Some(logical),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<&Arc<LogicalPort>> {
        match self {
            MappedObject::Port(logical) => Some(logical),
            _ => None,
        }
    }
}

/// One mapped replica
#[derive(Debug, Clone)]
pub struct MappingEntry {
    id: MappingId,
    path: String,
    parent_id: Option<MappingId>,
    object: MappedObject,
    children: BTreeSet<MappingId>,
    depth: u32,
}

impl MappingEntry {
    pub fn id(&self) -> &MappingId {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identifier of the nearest mapped ancestor; it may itself be filtered out
    pub fn parent_id(&self) -> Option<&MappingId> {
        self.parent_id.as_ref()
    }

    pub fn object(&self) -> &MappedObject {
        &self.object
    }

    /// Direct mapped device children
    pub fn children(&self) -> &BTreeSet<MappingId> {
        &self.children
    }

    /// Number of mapped levels between the root and this entry
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_device(&self) -> bool {
        matches!(self.object, MappedObject::Device(_))
    }

    pub fn is_port(&self) -> bool {
        matches!(self.object, MappedObject::Port(_))
    }

    pub fn to_record(&self, schema: &dyn MappingSchema) -> MappingRecord {
        MappingRecord {
            id: self.id.to_string(),
            path: self.path.clone(),
            parent: self.parent_id.as_ref().map(MappingId::to_string),
            kind: self.object.kind().to_string(),
            category: schema.category_name(self.id.category()).map(str::to_string),
            model: self.object.model_name().to_string(),
            children: self.children.iter().map(MappingId::to_string).collect(),
        }
    }
}

/// Serializable summary of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

/// Entries indexed by identifier and by path; both are unique
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    setup_label: String,
    entries: BTreeMap<MappingId, MappingEntry>,
    paths: BTreeMap<String, MappingId>,
}

impl MappingTable {
    fn new(setup_label: &str) -> Self {
        Self {
            setup_label: setup_label.to_string(),
            entries: BTreeMap::new(),
            paths: BTreeMap::new(),
        }
    }

    fn insert(&mut self, entry: MappingEntry) -> Result<(), MappingError> {
        if let Some(existing) = self.entries.get(&entry.id) {
            return Err(MappingError::DuplicateId {
                id: entry.id,
                existing: existing.path.clone(),
                path: entry.path,
            });
        }
        if self.paths.contains_key(&entry.path) {
            return Err(MappingError::DuplicatePath(entry.path));
        }
        trace!(id = %entry.id, path = %entry.path, kind = entry.object.kind(), "Mapped");
        self.paths.insert(entry.path.clone(), entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    fn add_child(&mut self, parent: &MappingId, child: MappingId) {
        if let Some(entry) = self.entries.get_mut(parent) {
            entry.children.insert(child);
        }
    }

    pub fn setup_label(&self) -> &str {
        &self.setup_label
    }

    /// Path of the setup root
    pub fn top_path(&self) -> String {
        path::root_path(&self.setup_label)
    }

    pub fn root(&self) -> Option<&MappingEntry> {
        self.by_path(&self.top_path())
    }

    pub fn by_id(&self, id: &MappingId) -> Option<&MappingEntry> {
        self.entries.get(id)
    }

    pub fn by_path(&self, path: &str) -> Option<&MappingEntry> {
        self.paths.get(path).and_then(|id| self.entries.get(id))
    }

    pub fn has_id(&self, id: &MappingId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in identifier order
    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    /// Paths in lexical order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    pub fn devices(&self) -> impl Iterator<Item = &MappingEntry> {
        self.iter().filter(|e| e.is_device())
    }

    pub fn ports(&self) -> impl Iterator<Item = &MappingEntry> {
        self.iter().filter(|e| e.is_port())
    }

    pub fn entries_in_category(&self, category: u32) -> impl Iterator<Item = &MappingEntry> {
        self.iter().filter(move |e| e.id.category() == category)
    }

    /// Mapped device children of `id`
    pub fn children(&self, id: &MappingId) -> Vec<&MappingEntry> {
        self.by_id(id)
            .map(|entry| entry.children.iter().filter_map(|c| self.by_id(c)).collect())
            .unwrap_or_default()
    }

    /// The entry's parent, when it is present in the table
    pub fn parent_of(&self, entry: &MappingEntry) -> Option<&MappingEntry> {
        entry.parent_id.as_ref().and_then(|id| self.by_id(id))
    }

    pub fn to_records(&self, schema: &dyn MappingSchema) -> Vec<MappingRecord> {
        self.iter().map(|entry| entry.to_record(schema)).collect()
    }
}

/// Nearest mapped ancestor of the placements being visited
#[derive(Debug, Clone)]
struct Ancestor {
    id: MappingId,
    path: String,
    depth: u32,
    in_table: bool,
}

/// One replica of an embedded device waiting to be visited
struct Candidate {
    label: String,
    slot: Slot,
    rule: Option<String>,
    logical: Arc<LogicalDevice>,
}

/// A logical device being visited: its ancestor and its unvisited replicas
struct Frame {
    ancestor: Ancestor,
    /// Reversed, so that popping yields label then item order
    pending: Vec<Candidate>,
}

struct Walk<'a> {
    config: &'a MappingConfig,
    schema: &'a dyn MappingSchema,
    filter: CategoryFilter,
    table: MappingTable,
    stack: Vec<Frame>,
}

impl Walk<'_> {
    fn derive(&self, parent: &MappingId, rule: &str, slot: &Slot, label: &str) -> Option<MappingId> {
        match self.schema.derive(parent, rule, slot.coordinates()) {
            Ok(id) if self.schema.validate(&id) => Some(id),
            Ok(id) => {
                debug!(label = %label, slot = %slot, rule = %rule, id = %id, "Identifier rejected by schema");
                None
            }
            Err(e) => {
                debug!(label = %label, slot = %slot, rule = %rule, error = %e, "Cannot derive identifier");
                None
            }
        }
    }

    fn admits(&self, id: &MappingId) -> bool {
        self.filter.admits(self.schema.category_name(id.category()))
    }

    fn can_descend(&self, depth: u32) -> bool {
        self.config.max_depth == 0 || depth < self.config.max_depth
    }

    /// Map the ports and links of `logical` and queue its embedded devices
    fn enter(&mut self, logical: &Arc<LogicalDevice>, ancestor: Ancestor) -> Result<(), MappingError> {
        if self.config.port_mapping {
            self.map_ports(logical, &ancestor)?;
        }
        if self.config.link_mapping {
            self.map_links(logical, &ancestor)?;
        }

        let mut pending = Vec::new();
        for (label, device) in logical.embedded_devices() {
            let rule = logical.mapping_rule(MappingScope::Device, label);
            for slot in device.instance().slots() {
                pending.push(Candidate {
                    label: label.clone(),
                    slot,
                    rule: rule.map(str::to_string),
                    logical: Arc::clone(device.logical()),
                });
            }
        }
        pending.reverse();
        self.stack.push(Frame { ancestor, pending });
        Ok(())
    }

    fn map_ports(&mut self, logical: &LogicalDevice, ancestor: &Ancestor) -> Result<(), MappingError> {
        for (label, port) in logical.ports() {
            let Some(rule) = logical.mapping_rule(MappingScope::Port, label) else {
                continue;
            };
            for slot in port.instance().slots() {
                let Some(id) = self.derive(&ancestor.id, rule, &slot, label) else {
                    continue;
                };
                if !self.admits(&id) {
                    continue;
                }
                self.table.insert(MappingEntry {
                    id,
                    path: path::child_path(&ancestor.path, label, slot.coordinates()),
                    parent_id: Some(ancestor.id.clone()),
                    object: MappedObject::Port(Arc::clone(port.logical())),
                    children: BTreeSet::new(),
                    depth: ancestor.depth + 1,
                })?;
            }
        }
        Ok(())
    }

    fn map_links(&mut self, logical: &LogicalDevice, ancestor: &Ancestor) -> Result<(), MappingError> {
        for (label, link) in logical.links() {
            let Some(rule) = logical.mapping_rule(MappingScope::Link, label) else {
                continue;
            };
            let Some(id) = self.derive(&ancestor.id, rule, &Slot::dimensionless(), label) else {
                continue;
            };
            if !self.admits(&id) {
                continue;
            }
            self.table.insert(MappingEntry {
                id,
                path: path::child_path(&ancestor.path, label, &[]),
                parent_id: Some(ancestor.id.clone()),
                object: MappedObject::Link(link.clone()),
                children: BTreeSet::new(),
                depth: ancestor.depth + 1,
            })?;
        }
        Ok(())
    }

    fn visit(&mut self, candidate: Candidate, ancestor: Ancestor) -> Result<(), MappingError> {
        let Some(rule) = candidate.rule.as_deref() else {
            // No rule: the placement is not mapped but its content is, under
            // the nearest mapped ancestor and below the placement's path
            let through = Ancestor {
                path: path::child_path(&ancestor.path, &candidate.label, candidate.slot.coordinates()),
                ..ancestor
            };
            return self.enter(&candidate.logical, through);
        };
        let Some(id) = self.derive(&ancestor.id, rule, &candidate.slot, &candidate.label) else {
            return Ok(());
        };

        let depth = ancestor.depth + 1;
        let path = path::child_path(&ancestor.path, &candidate.label, candidate.slot.coordinates());
        let in_table = self.admits(&id);
        if in_table {
            self.table.insert(MappingEntry {
                id: id.clone(),
                path: path.clone(),
                parent_id: Some(ancestor.id.clone()),
                object: MappedObject::Device(Arc::clone(&candidate.logical)),
                children: BTreeSet::new(),
                depth,
            })?;
            if ancestor.in_table {
                self.table.add_child(&ancestor.id, id.clone());
            }
        } else {
            trace!(path = %path, id = %id, "Filtered out");
        }

        if self.can_descend(depth) {
            let child = Ancestor {
                id,
                path,
                depth,
                in_table,
            };
            self.enter(&candidate.logical, child)?;
        } else {
            trace!(path = %path, depth, "Depth limit reached");
        }
        Ok(())
    }

    fn run(mut self, top: &Arc<LogicalDevice>, root: Ancestor) -> Result<MappingTable, MappingError> {
        self.enter(top, root)?;
        while let Some(frame) = self.stack.last_mut() {
            let Some(candidate) = frame.pending.pop() else {
                self.stack.pop();
                continue;
            };
            let ancestor = frame.ancestor.clone();
            self.visit(candidate, ancestor)?;
        }
        Ok(self.table)
    }
}

/// Builds the mapping table of a setup
#[derive(Debug, Clone)]
pub struct MappingBuilder {
    setup_label: String,
    config: MappingConfig,
}

impl MappingBuilder {
    pub fn new(setup_label: impl Into<String>, config: MappingConfig) -> Self {
        Self {
            setup_label: setup_label.into(),
            config,
        }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn setup_label(&self) -> &str {
        &self.setup_label
    }

    /// Map the logical tree of the initialized model `top`
    pub fn build(&self, top: &DeviceModel, schema: &dyn MappingSchema) -> Result<MappingTable, MappingError> {
        let logical = top
            .logical()
            .ok_or_else(|| MappingError::NotInitialized(top.name().to_string()))?;
        self.build_from_logical(logical, schema)
    }

    pub fn build_from_logical(
        &self,
        top: &Arc<LogicalDevice>,
        schema: &dyn MappingSchema,
    ) -> Result<MappingTable, MappingError> {
        let filter = CategoryFilter::from_config(&self.config)?;
        let root_id = schema.root_id().map_err(MappingError::Root)?;
        let root_path = path::root_path(&self.setup_label);

        let mut table = MappingTable::new(&self.setup_label);
        if self.config.include_root {
            table.insert(MappingEntry {
                id: root_id.clone(),
                path: root_path.clone(),
                parent_id: None,
                object: MappedObject::Device(Arc::clone(top)),
                children: BTreeSet::new(),
                depth: 0,
            })?;
        }
        let root = Ancestor {
            id: root_id,
            path: root_path,
            depth: 0,
            in_table: self.config.include_root,
        };

        let walk = Walk {
            config: &self.config,
            schema,
            filter,
            table,
            stack: Vec::new(),
        };
        let table = walk.run(top, root)?;
        info!(
            setup = %self.setup_label,
            top = %top.model_name(),
            entries = table.len(),
            "Mapping built"
        );
        Ok(table)
    }
}

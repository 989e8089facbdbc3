//! Mapping schema - categories and hierarchical identifiers
//!
//! An identifier is a category type plus an ordered tuple of address fields.
//! Categories form a hierarchy: a category either declares its own address
//! layout, `extends` a parent category with extra addresses, or `inherits`
//! the layout of a parent category unchanged. A child identifier therefore
//! starts with the address fields of its ancestor's identifier.
//!
//! Identifiers are derived from an ancestor identifier, an addressing rule
//! and the replica coordinates of a placement:
//!
//! ```text
//! [crate:crate+0]            crate = first coordinate
//! [board:slot+1]             slot = first coordinate + 1
//! [ps_port:port=0]           port fixed to 0
//! [module:row+0,column+0]    two coordinates
//! ```
//!
//! The mapping builder only needs the [`MappingSchema`] trait; the
//! [`CategoryRegistry`] is the TOML-configured implementation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Value of an address field that has not been set
pub const INVALID_ADDRESS: u32 = u32::MAX;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read category file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse category file: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid category '{name}': {reason}")]
    InvalidCategory { name: String, reason: String },
    #[error("Category '{0}' is declared more than once")]
    DuplicateCategory(String),
    #[error("Category type {0} is used more than once")]
    DuplicateType(u32),
    #[error("Unknown category '{0}'")]
    UnknownCategory(String),
    #[error("Category '{category}' refers to unknown parent '{parent}'")]
    UnknownParent { category: String, parent: String },
    #[error("Category inheritance cycle through '{0}'")]
    InheritanceCycle(String),
    #[error("Invalid addressing rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
    #[error("Category '{category}' has no address '{address}'")]
    UnknownAddress { category: String, address: String },
    #[error("Addressing rule '{rule}' needs more than {available} coordinates")]
    MissingCoordinate { rule: String, available: usize },
    #[error("Invalid identifier '{0}'")]
    InvalidId(String),
}

/// Hierarchical identifier of a mapped object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingId {
    category: u32,
    fields: Vec<u32>,
}

impl MappingId {
    pub fn new(category: u32, fields: Vec<u32>) -> Self {
        Self { category, fields }
    }

    /// Identifier of `category` with `depth` unset fields
    pub fn unset(category: u32, depth: usize) -> Self {
        Self::new(category, vec![INVALID_ADDRESS; depth])
    }

    pub fn category(&self) -> u32 {
        self.category
    }

    pub fn fields(&self) -> &[u32] {
        &self.fields
    }

    pub fn depth(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: usize) -> Option<u32> {
        self.fields.get(index).copied()
    }

    /// Whether every address field is set
    pub fn is_complete(&self) -> bool {
        self.fields.iter().all(|f| *f != INVALID_ADDRESS)
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.category)?;
        for (index, field) in self.fields.iter().enumerate() {
            f.write_str(if index == 0 { ":" } else { "." })?;
            if *field == INVALID_ADDRESS {
                f.write_str("*")?;
            } else {
                write!(f, "{}", field)?;
            }
        }
        f.write_str("]")
    }
}

impl FromStr for MappingId {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::InvalidId(s.to_string());
        let body = s
            .trim()
            .strip_prefix('[')
            .and_then(|b| b.strip_suffix(']'))
            .ok_or_else(invalid)?;
        let (category, fields) = match body.split_once(':') {
            Some((category, fields)) => (category, Some(fields)),
            None => (body, None),
        };
        let category = category.trim().parse().map_err(|_| invalid())?;
        let fields = match fields {
            None => Vec::new(),
            Some(fields) => fields
                .split('.')
                .map(|field| match field.trim() {
                    "*" => Ok(INVALID_ADDRESS),
                    value => value.parse().map_err(|_| invalid()),
                })
                .collect::<Result<Vec<u32>, _>>()?,
        };
        Ok(Self::new(category, fields))
    }
}

/// Identifier scheme used by the mapping builder
pub trait MappingSchema {
    /// Identifier of the setup root
    fn root_id(&self) -> Result<MappingId, SchemaError>;

    /// Identifier derived from `parent` by `rule` for a replica at `coordinates`
    fn derive(&self, parent: &MappingId, rule: &str, coordinates: &[u32]) -> Result<MappingId, SchemaError>;

    /// Whether `id` belongs to a known category and has all its fields set
    fn validate(&self, id: &MappingId) -> bool;

    fn category_name(&self, category: u32) -> Option<&str>;

    /// Whether `ancestor` is a strict ancestor of `descendant`
    fn is_ancestor_category(&self, ancestor: u32, descendant: u32) -> bool;
}

/// One `[[category]]` table of a category file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_id: u32,
    /// Address layout of a root category
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Addresses appended to the extended category
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,
}

/// Contents of a category file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFile {
    /// Category of the setup root
    #[serde(default = "default_setup_category")]
    pub setup_category: String,
    #[serde(default)]
    pub category: Vec<CategoryDef>,
}

fn default_setup_category() -> String {
    "setup".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryRelation {
    Root,
    Extends(String),
    Inherits(String),
}

/// A resolved category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInfo {
    pub name: String,
    pub type_id: u32,
    pub relation: CategoryRelation,
    /// Full address layout, ancestors' addresses first
    pub addresses: Vec<String>,
}

impl CategoryInfo {
    pub fn parent(&self) -> Option<&str> {
        match &self.relation {
            CategoryRelation::Root => None,
            CategoryRelation::Extends(parent) | CategoryRelation::Inherits(parent) => Some(parent),
        }
    }
}

enum AddressValue {
    Fixed(u32),
    Offset(u32),
}

struct Assignment<'a> {
    address: &'a str,
    value: AddressValue,
}

fn parse_rule(rule: &str) -> Result<(&str, Vec<Assignment<'_>>), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidRule {
        rule: rule.to_string(),
        reason: reason.to_string(),
    };
    let body = rule
        .trim()
        .strip_prefix('[')
        .and_then(|b| b.strip_suffix(']'))
        .ok_or_else(|| invalid("expected '[category:...]'"))?;
    let (category, assignments) = body.split_once(':').unwrap_or((body, ""));
    let category = category.trim();
    if category.is_empty() {
        return Err(invalid("missing category"));
    }

    let mut parsed = Vec::new();
    for item in assignments.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        let (address, value) = if let Some((address, value)) = item.split_once('=') {
            let value = value.trim().parse().map_err(|_| invalid("bad fixed value"))?;
            (address, AddressValue::Fixed(value))
        } else if let Some((address, offset)) = item.split_once('+') {
            let offset = offset.trim().parse().map_err(|_| invalid("bad offset"))?;
            (address, AddressValue::Offset(offset))
        } else {
            return Err(invalid("expected 'address=value' or 'address+offset'"));
        };
        let address = address.trim();
        if address.is_empty() {
            return Err(invalid("missing address name"));
        }
        parsed.push(Assignment { address, value });
    }
    Ok((category, parsed))
}

/// Category hierarchy loaded from configuration
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    setup_category: String,
    categories: BTreeMap<String, CategoryInfo>,
    by_type: BTreeMap<u32, String>,
}

impl CategoryRegistry {
    pub fn new(file: CategoryFile) -> Result<Self, SchemaError> {
        let mut definitions: BTreeMap<&str, &CategoryDef> = BTreeMap::new();
        let mut types = BTreeSet::new();
        for def in &file.category {
            if definitions.insert(def.name.as_str(), def).is_some() {
                return Err(SchemaError::DuplicateCategory(def.name.clone()));
            }
            if !types.insert(def.type_id) {
                return Err(SchemaError::DuplicateType(def.type_id));
            }
            check_definition(def)?;
        }

        let mut layouts = BTreeMap::new();
        for name in definitions.keys() {
            resolve_layout(name, &definitions, &mut layouts, &mut BTreeSet::new())?;
        }

        let mut categories = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for def in &file.category {
            let relation = match (&def.extends, &def.inherits) {
                (Some(parent), _) => CategoryRelation::Extends(parent.clone()),
                (None, Some(parent)) => CategoryRelation::Inherits(parent.clone()),
                (None, None) => CategoryRelation::Root,
            };
            let addresses = layouts.get(def.name.as_str()).cloned().unwrap_or_default();
            by_type.insert(def.type_id, def.name.clone());
            categories.insert(
                def.name.clone(),
                CategoryInfo {
                    name: def.name.clone(),
                    type_id: def.type_id,
                    relation,
                    addresses,
                },
            );
        }

        if !categories.contains_key(&file.setup_category) {
            return Err(SchemaError::UnknownCategory(file.setup_category));
        }
        debug!(categories = categories.len(), setup = %file.setup_category, "Category registry built");
        Ok(Self {
            setup_category: file.setup_category,
            categories,
            by_type,
        })
    }

    /// Load categories from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, SchemaError> {
        let file: CategoryFile = toml::from_str(content)?;
        Self::new(file)
    }

    /// Load categories from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_toml(&content)?;
        info!(
            path = %path.display(),
            categories = registry.len(),
            "Loaded mapping categories"
        );
        Ok(registry)
    }

    pub fn setup_category(&self) -> &str {
        &self.setup_category
    }

    pub fn category(&self, name: &str) -> Option<&CategoryInfo> {
        self.categories.get(name)
    }

    pub fn category_by_type(&self, type_id: u32) -> Option<&CategoryInfo> {
        self.by_type.get(&type_id).and_then(|name| self.categories.get(name))
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategoryInfo> {
        self.categories.values()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

fn check_definition(def: &CategoryDef) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidCategory {
        name: def.name.clone(),
        reason: reason.to_string(),
    };
    match (&def.extends, &def.inherits) {
        (Some(_), Some(_)) => Err(invalid("cannot both extend and inherit")),
        (Some(_), None) if def.by.is_empty() => Err(invalid("'extends' needs at least one 'by' address")),
        (Some(_), None) if !def.addresses.is_empty() => Err(invalid("'extends' takes 'by', not 'addresses'")),
        (None, Some(_)) if !def.addresses.is_empty() || !def.by.is_empty() => {
            Err(invalid("'inherits' takes no addresses"))
        }
        (None, None) if def.addresses.is_empty() => Err(invalid("a root category needs 'addresses'")),
        (None, None) if !def.by.is_empty() => Err(invalid("'by' requires 'extends'")),
        _ => Ok(()),
    }
}

fn resolve_layout(
    name: &str,
    definitions: &BTreeMap<&str, &CategoryDef>,
    layouts: &mut BTreeMap<String, Vec<String>>,
    visiting: &mut BTreeSet<String>,
) -> Result<Vec<String>, SchemaError> {
    if let Some(layout) = layouts.get(name) {
        return Ok(layout.clone());
    }
    if !visiting.insert(name.to_string()) {
        return Err(SchemaError::InheritanceCycle(name.to_string()));
    }
    let def = definitions
        .get(name)
        .ok_or_else(|| SchemaError::UnknownCategory(name.to_string()))?;

    let mut parent_layout = |parent: &str| {
        if !definitions.contains_key(parent) {
            return Err(SchemaError::UnknownParent {
                category: name.to_string(),
                parent: parent.to_string(),
            });
        }
        resolve_layout(parent, definitions, layouts, visiting)
    };
    let layout = match (&def.extends, &def.inherits) {
        (Some(parent), _) => {
            let mut layout = parent_layout(parent)?;
            layout.extend(def.by.iter().cloned());
            layout
        }
        (None, Some(parent)) => parent_layout(parent)?,
        (None, None) => def.addresses.clone(),
    };

    let distinct: BTreeSet<&String> = layout.iter().collect();
    if distinct.len() != layout.len() {
        return Err(SchemaError::InvalidCategory {
            name: name.to_string(),
            reason: "address names must be unique".to_string(),
        });
    }
    visiting.remove(name);
    layouts.insert(name.to_string(), layout.clone());
    Ok(layout)
}

impl MappingSchema for CategoryRegistry {
    fn root_id(&self) -> Result<MappingId, SchemaError> {
        let setup = self
            .categories
            .get(&self.setup_category)
            .ok_or_else(|| SchemaError::UnknownCategory(self.setup_category.clone()))?;
        Ok(MappingId::new(setup.type_id, vec![0; setup.addresses.len()]))
    }

    fn derive(&self, parent: &MappingId, rule: &str, coordinates: &[u32]) -> Result<MappingId, SchemaError> {
        let (category, assignments) = parse_rule(rule)?;
        let info = self
            .categories
            .get(category)
            .ok_or_else(|| SchemaError::UnknownCategory(category.to_string()))?;

        let mut id = MappingId::unset(info.type_id, info.addresses.len());
        if parent.category == info.type_id || self.is_ancestor_category(parent.category, info.type_id) {
            for (field, value) in id.fields.iter_mut().zip(&parent.fields) {
                *field = *value;
            }
        }

        let mut next_coordinate = coordinates.iter();
        for assignment in assignments {
            let index = info
                .addresses
                .iter()
                .position(|a| a == assignment.address)
                .ok_or_else(|| SchemaError::UnknownAddress {
                    category: info.name.clone(),
                    address: assignment.address.to_string(),
                })?;
            id.fields[index] = match assignment.value {
                AddressValue::Fixed(value) => value,
                AddressValue::Offset(offset) => {
                    let coordinate = next_coordinate.next().ok_or_else(|| SchemaError::MissingCoordinate {
                        rule: rule.to_string(),
                        available: coordinates.len(),
                    })?;
                    coordinate.saturating_add(offset)
                }
            };
        }
        Ok(id)
    }

    fn validate(&self, id: &MappingId) -> bool {
        match self.category_by_type(id.category) {
            Some(info) => info.addresses.len() == id.fields.len() && id.is_complete(),
            None => false,
        }
    }

    fn category_name(&self, category: u32) -> Option<&str> {
        self.by_type.get(&category).map(String::as_str)
    }

    fn is_ancestor_category(&self, ancestor: u32, descendant: u32) -> bool {
        let mut current = self.category_by_type(descendant);
        while let Some(info) = current {
            current = info.parent().and_then(|parent| self.categories.get(parent));
            if current.is_some_and(|parent| parent.type_id == ancestor) {
                return true;
            }
        }
        false
    }
}

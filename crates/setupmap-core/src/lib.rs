//! Setupmap Core - Device models, model repository and instance mapping
//!
//! This crate provides the building blocks of a device setup description:
//! - Port and device models, their placements, replication rules and links
//! - A repository that loads model definitions and initializes them lazily
//! - A category schema for hierarchical addressing
//! - The mapping engine that gives every replica in a setup an identifier and a path

pub mod config;
pub mod instance;
pub mod link;
pub mod logical;
pub mod mapping;
pub mod model;
pub mod path;
pub mod repository;
pub mod schema;
pub mod types;

pub use config::{ConfigError, MappingRules, ModelConfig, ModelDefinition, ModelDefinitions, PlacementDecl};
pub use instance::{GridAxis, Instance, InstanceError, RegularGrid, Slot};
pub use link::{LinkDescriptor, LinkEnd, LinkError, PhysicalLink, ReplicaSelection};
pub use logical::{Auxiliaries, LogicalDevice, LogicalPort, MappingScope, PhysicalDevice, PhysicalPort};
pub use mapping::{
    MappedObject, MappingBuilder, MappingConfig, MappingEntry, MappingError, MappingRecord, MappingTable,
};
pub use model::{DeviceModel, ModelError, ModelResolver, PortModel};
pub use repository::{EntryState, ModelEntry, ModelRepository, RepositoryError, RepositoryOptions};
pub use schema::{CategoryFile, CategoryRegistry, MappingId, MappingSchema, SchemaError};
pub use types::{DeviceType, ModelKind, PortIo, PortType};

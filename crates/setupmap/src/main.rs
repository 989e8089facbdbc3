//! Setupmap - Main entry point
//!
//! Loads a setup configuration, initializes its device models and prints or
//! queries the resulting instance mapping.

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use setupmap_core::{
    CategoryRegistry, MappedObject, MappingBuilder, MappingEntry, MappingId, MappingTable, ModelDefinitions,
    ModelRepository,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "setupmap")]
#[command(about = "Device setup model repository and instance mapping")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "setup.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration to the config path and exit
    #[arg(long)]
    init: bool,

    /// List the registered models and exit
    #[arg(long)]
    models: bool,

    /// List every mapping entry
    #[arg(long)]
    list: bool,

    /// Print the mapping as JSON
    #[arg(long)]
    json: bool,

    /// Show the entry at this path
    #[arg(short, long)]
    resolve: Option<String>,

    /// Show the entry with this identifier, e.g. "[100:0.1]"
    #[arg(long)]
    id: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Setupmap v{}", env!("CARGO_PKG_VERSION"));

    if args.init {
        if args.config.exists() {
            bail!("{} already exists", args.config.display());
        }
        config::save_default_config(&args.config)?;
        println!("Wrote {}", args.config.display());
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    let base = config::base_dir(&args.config);
    info!(
        setup = %config.setup.label,
        top = %config.setup.top_level_model,
        "Configuration loaded"
    );

    let mut repository = load_repository(&config, &base)?;

    if args.models {
        println!("{} models:", repository.len());
        for entry in repository.entries() {
            println!(
                "  - {} ({} {}) {:?}",
                entry.name(),
                entry.kind(),
                entry.type_id(),
                entry.state()
            );
        }
        return Ok(());
    }

    let schema_file = config.schema_file(&base);
    let schema = CategoryRegistry::from_file(&schema_file)
        .with_context(|| format!("Failed to load categories from {}", schema_file.display()))?;
    let table = build_mapping(&config, &mut repository, &schema)?;

    if let Some(path) = &args.resolve {
        match table.by_path(path) {
            Some(entry) => print_entry(&table, entry),
            None => bail!("No entry at path '{}'", path),
        }
    }

    if let Some(id) = &args.id {
        let id: MappingId = id.parse()?;
        match table.by_id(&id) {
            Some(entry) => print_entry(&table, entry),
            None => bail!("No entry with identifier {}", id),
        }
    }

    if args.json {
        let records = table.to_records(&schema);
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if args.list || (args.resolve.is_none() && args.id.is_none()) {
        println!("Mapping of {}: {} entries", table.setup_label(), table.len());
        for entry in table.iter() {
            println!(
                "  {} {} ({} {})",
                entry.id(),
                entry.path(),
                entry.object().kind(),
                entry.object().model_name()
            );
        }
    }

    Ok(())
}

/// Read every model file and load the definitions into a new repository
fn load_repository(config: &Config, base: &Path) -> Result<ModelRepository> {
    let mut definitions = ModelDefinitions::new();
    for file in config.model_files(base) {
        let loaded = ModelDefinitions::from_file(&file)
            .with_context(|| format!("Failed to load models from {}", file.display()))?;
        definitions.extend(loaded)?;
    }

    let mut repository = ModelRepository::new(config.repository.clone());
    repository.initialize(&definitions)?;
    Ok(repository)
}

fn build_mapping(config: &Config, repository: &mut ModelRepository, schema: &CategoryRegistry) -> Result<MappingTable> {
    let top = repository
        .get_device_model(&config.setup.top_level_model)
        .with_context(|| format!("Cannot initialize top-level model '{}'", config.setup.top_level_model))?;
    let builder = MappingBuilder::new(config.setup.label.clone(), config.mapping.clone());
    Ok(builder.build(top, schema)?)
}

fn print_entry(table: &MappingTable, entry: &MappingEntry) {
    println!("{} {}", entry.id(), entry.path());
    match entry.object() {
        MappedObject::Device(device) => {
            println!("  device: {} ({})", device.model_name(), device.device_type());
        }
        MappedObject::Port(port) => {
            println!("  port: {} ({}, {:?})", port.model_name(), port.port_type(), port.io());
        }
        MappedObject::Link(link) => {
            println!("  link: {} -> {}", link.from().text(), link.to().text());
        }
    }
    if let Some(parent) = table.parent_of(entry) {
        println!("  parent: {} {}", parent.id(), parent.path());
    }
    for child in table.children(entry.id()) {
        println!("  child: {} {}", child.id(), child.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")
    }

    #[test]
    fn test_sample_setup() {
        let dir = sample_dir();
        let config = config::load_config(&dir.join("setup.toml")).unwrap();
        let mut repository = load_repository(&config, &dir).unwrap();
        let schema = CategoryRegistry::from_file(&config.schema_file(&dir)).unwrap();
        let table = build_mapping(&config, &mut repository, &schema).unwrap();

        let root = table.root().unwrap();
        assert_eq!(root.path(), "Lab:");
        assert!(table.has_path("Lab:/PS_0/out"));
        assert!(table.has_path("Lab:/PS_1/out"));
        let board = table.by_path("Lab:/PS_1/ADC_3").unwrap();
        assert_eq!(table.parent_of(board).unwrap().path(), "Lab:/PS_1");
        assert!(table.has_path("Lab:/PS_1/ADC_3/ch_7"));
    }

    #[test]
    fn test_missing_top_level_model() {
        let dir = sample_dir();
        let mut config = config::load_config(&dir.join("setup.toml")).unwrap();
        config.setup.top_level_model = "Nowhere".to_string();
        let mut repository = load_repository(&config, &dir).unwrap();
        let schema = CategoryRegistry::from_file(&config.schema_file(&dir)).unwrap();
        assert!(build_mapping(&config, &mut repository, &schema).is_err());
    }
}

//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use setupmap_core::{MappingConfig, RepositoryOptions};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub repository: RepositoryOptions,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Name of the setup, used as the root of every path
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Device model at the top of the setup
    #[serde(default = "default_top_level_model")]
    pub top_level_model: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            description: None,
            version: None,
            top_level_model: default_top_level_model(),
        }
    }
}

fn default_label() -> String {
    "Setup".to_string()
}

fn default_top_level_model() -> String {
    "Setup".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model definition files, merged in order
    #[serde(default = "default_model_files")]
    pub files: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            files: default_model_files(),
        }
    }
}

fn default_model_files() -> Vec<String> {
    vec!["models.toml".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Path to the category file
    #[serde(default = "default_schema_path")]
    pub path: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: default_schema_path(),
        }
    }
}

fn default_schema_path() -> String {
    "categories.toml".to_string()
}

impl Config {
    /// Model files, relative paths taken from `base`
    pub fn model_files(&self, base: &Path) -> Vec<PathBuf> {
        self.models.files.iter().map(|f| resolve(base, f)).collect()
    }

    pub fn schema_file(&self, base: &Path) -> PathBuf {
        resolve(base, &self.schema.path)
    }
}

fn resolve(base: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Directory other configured files are relative to
pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        setup: SetupConfig {
            description: Some("Example setup".to_string()),
            version: Some("1.0.0".to_string()),
            ..SetupConfig::default()
        },
        ..Config::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.setup.label, "Setup");
        assert_eq!(config.models.files, vec!["models.toml".to_string()]);
        assert!(config.mapping.include_root);
        assert!(!config.repository.force_initialization_at_load);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setup.toml");
        std::fs::write(
            &path,
            r#"
[setup]
label = "Lab"
top_level_model = "Bench"

[mapping]
max_depth = 2
excluded_categories = ["board"]
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.setup.label, "Lab");
        assert_eq!(config.setup.top_level_model, "Bench");
        assert_eq!(config.mapping.max_depth, 2);
        assert_eq!(config.mapping.excluded_categories, vec!["board".to_string()]);
        assert!(config.mapping.port_mapping);
        assert_eq!(config.schema.path, "categories.toml");
    }

    #[test]
    fn test_save_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setup.toml");
        save_default_config(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.setup.version.as_deref(), Some("1.0.0"));
        assert_eq!(config.mapping, MappingConfig::default());
    }

    #[test]
    fn test_relative_paths() {
        let config = Config::default();
        let base = base_dir(Path::new("/etc/setupmap/setup.toml"));
        assert_eq!(base, PathBuf::from("/etc/setupmap"));
        assert_eq!(
            config.schema_file(&base),
            PathBuf::from("/etc/setupmap/categories.toml")
        );
        assert_eq!(base_dir(Path::new("setup.toml")), PathBuf::from("."));
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Engine configuration

use crate::eval::{RunOptions, Value, DEFAULT_MAX_RECURSION_DEPTH};
use crate::io::{FsResolver, DEFAULT_MAX_IMPORT_BYTES};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File looked up in the working directory by [`EngineConfig::load`]
pub const CONFIG_FILE: &str = "polyframe.toml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting of user function, user module and `children()` calls
    pub max_recursion_depth: usize,
    /// Directories searched for `include`/`use` libraries, in order
    pub library_paths: Vec<PathBuf>,
    /// Largest library file accepted, in bytes
    pub max_import_bytes: u64,
    /// Library file extensions accepted, without the dot
    pub import_extensions: Vec<String>,
    /// Initial `$` variables; the `$` prefix is optional in the file
    pub special_vars: BTreeMap<String, toml::Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            library_paths: Vec::new(),
            max_import_bytes: DEFAULT_MAX_IMPORT_BYTES,
            import_extensions: vec!["scad".to_string()],
            special_vars: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load `polyframe.toml` from the working directory if present, then
    /// apply environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if Path::new(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `POLYFRAME_MAX_RECURSION`, `POLYFRAME_LIBRARY_PATH` and
    /// `POLYFRAME_MAX_IMPORT_BYTES` from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(depth) = lookup("POLYFRAME_MAX_RECURSION") {
            self.max_recursion_depth = depth
                .trim()
                .parse()
                .with_context(|| format!("Invalid POLYFRAME_MAX_RECURSION: {}", depth))?;
        }

        if let Some(paths) = lookup("POLYFRAME_LIBRARY_PATH") {
            self.library_paths = std::env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Some(bytes) = lookup("POLYFRAME_MAX_IMPORT_BYTES") {
            self.max_import_bytes = bytes
                .trim()
                .parse()
                .with_context(|| format!("Invalid POLYFRAME_MAX_IMPORT_BYTES: {}", bytes))?;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Library resolver over the configured search path
    pub fn resolver(&self) -> FsResolver {
        FsResolver::new()
            .with_search_dirs(self.library_paths.iter().cloned())
            .with_extensions(self.import_extensions.iter().cloned())
            .with_max_bytes(self.max_import_bytes)
    }

    /// Build run options: recursion limit, special variables and a
    /// filesystem resolver over the library paths
    pub fn run_options(&self) -> Result<RunOptions> {
        let mut options = RunOptions::new()
            .with_max_recursion_depth(self.max_recursion_depth)
            .with_import_resolver(self.resolver());

        for (name, value) in &self.special_vars {
            let name = if name.starts_with('$') {
                name.clone()
            } else {
                format!("${}", name)
            };
            let value = convert_toml(value)
                .with_context(|| format!("Invalid value for special variable {}", name))?;
            options = options.with_special_var(name, value);
        }
        Ok(options)
    }
}

fn convert_toml(value: &toml::Value) -> Result<Value<'static>> {
    Ok(match value {
        toml::Value::Integer(i) => Value::Number(*i as f64),
        toml::Value::Float(f) => Value::Number(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Array(items) => {
            Value::Vector(items.iter().map(convert_toml).collect::<Result<_>>()?)
        }
        other => bail!("unsupported {} value", other.type_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("polyframe.toml");
        std::fs::write(
            &path,
            "max_recursion_depth = 64\n\n[special_vars]\nfn = 48\n\"$preview\" = true\n",
        )?;

        let config = EngineConfig::from_file(&path)?;
        assert_eq!(config.max_recursion_depth, 64);
        assert_eq!(config.import_extensions, vec!["scad".to_string()]);

        let options = config.run_options()?;
        assert_eq!(options.max_recursion_depth, 64);
        assert_eq!(options.special_vars.get("$fn"), Some(&Value::Number(48.0)));
        assert_eq!(options.special_vars.get("$preview"), Some(&Value::Bool(true)));
        assert!(options.import_resolver.is_some());
        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<()> {
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| match key {
            "POLYFRAME_MAX_RECURSION" => Some("32".to_string()),
            "POLYFRAME_MAX_IMPORT_BYTES" => Some("1024".to_string()),
            _ => None,
        })?;
        assert_eq!(config.max_recursion_depth, 32);
        assert_eq!(config.max_import_bytes, 1024);

        let result = config.apply_overrides(|key| {
            (key == "POLYFRAME_MAX_RECURSION").then(|| "deep".to_string())
        });
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_save_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("saved.toml");
        let mut config = EngineConfig::default();
        config.library_paths.push(PathBuf::from("libs"));
        config
            .special_vars
            .insert("$fa".to_string(), toml::Value::Float(6.0));
        config.save(&path)?;

        assert_eq!(EngineConfig::from_file(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_unsupported_special_value() {
        let mut config = EngineConfig::default();
        config
            .special_vars
            .insert("bad".to_string(), toml::Value::Table(Default::default()));
        assert!(config.run_options().is_err());
    }
}

// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Packer configuration files.
//!
//! A configuration file is either a JSON document or a binary metadata blob
//! (the same codec resources use for sidecars). Keys use the dot-separated
//! convention, e.g. `filter.extensions`.

use core::error::Error;
use core::fmt;
use glacier_resources::meta_load;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    KeyNotFound,
    ValueTypeMismatch,
    IndexOutOfBounds,
    Invalid,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::KeyNotFound => "config key not found",
            Self::ValueTypeMismatch => "config value has a different type",
            Self::IndexOutOfBounds => "config array index out of bounds",
            Self::Invalid => "config file is invalid",
        };
        f.write_str(message)
    }
}

impl Error for ConfigError {}

/// A loaded configuration file.
pub struct Config {
    root: serde_json::Value,
}

impl Config {
    /// Loads a JSON or binary configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|_| ConfigError::Invalid)?;

        if bytes.starts_with(&glacier_resources::META_MAGIC) {
            return Self::from_meta(&bytes);
        }

        let text = core::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid)?;
        let root: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ConfigError::Invalid)?;
        if !root.is_object() {
            return Err(ConfigError::Invalid);
        }
        Ok(Self { root })
    }

    /// Lifts a binary metadata blob into the JSON value model so both file
    /// kinds share the same accessors.
    fn from_meta(bytes: &[u8]) -> Result<Self, ConfigError> {
        let meta = meta_load(bytes).map_err(|_| ConfigError::Invalid)?;

        let mut object = serde_json::Map::new();
        // The packer only consumes `filter.extensions` from binary configs.
        let mut extensions = Vec::new();
        if meta.read_string_array("filter.extensions", &mut extensions) {
            object.insert(
                String::from("filter.extensions"),
                serde_json::Value::Array(
                    extensions
                        .into_iter()
                        .map(|s| serde_json::Value::String(s.to_owned()))
                        .collect(),
                ),
            );
        }
        Ok(Self {
            root: serde_json::Value::Object(object),
        })
    }

    /// Navigates a dot-separated key.
    fn value(&self, key: &str) -> Result<&serde_json::Value, ConfigError> {
        // Flat keys (as produced by binary configs) take precedence.
        if let Some(value) = self.root.get(key) {
            return Ok(value);
        }

        let mut current = &self.root;
        for part in key.split('.') {
            current = current.get(part).ok_or(ConfigError::KeyNotFound)?;
        }
        Ok(current)
    }

    pub fn get_string(&self, key: &str) -> Result<&str, ConfigError> {
        self.value(key)?
            .as_str()
            .ok_or(ConfigError::ValueTypeMismatch)
    }

    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        let values = self
            .value(key)?
            .as_array()
            .ok_or(ConfigError::ValueTypeMismatch)?;
        values
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or(ConfigError::ValueTypeMismatch)
            })
            .collect()
    }

    pub fn get_string_at(&self, key: &str, index: usize) -> Result<&str, ConfigError> {
        let values = self
            .value(key)?
            .as_array()
            .ok_or(ConfigError::ValueTypeMismatch)?;
        values
            .get(index)
            .ok_or(ConfigError::IndexOutOfBounds)?
            .as_str()
            .ok_or(ConfigError::ValueTypeMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn json_configs_expose_typed_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(br#"{"filter": {"extensions": ["tmx", "png"]}, "label": "packs"}"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.get_string_array("filter.extensions").unwrap(),
            vec!["tmx", "png"],
        );
        assert_eq!(config.get_string("label").unwrap(), "packs");
        assert_eq!(config.get_string_at("filter.extensions", 1).unwrap(), "png");

        assert_eq!(
            config.get_string("missing").unwrap_err(),
            ConfigError::KeyNotFound,
        );
        assert_eq!(
            config.get_string("filter.extensions").unwrap_err(),
            ConfigError::ValueTypeMismatch,
        );
        assert_eq!(
            config.get_string_at("filter.extensions", 5).unwrap_err(),
            ConfigError::IndexOutOfBounds,
        );
    }

    #[test]
    fn binary_configs_use_the_metadata_codec() {
        let alloc = glacier_mem::AllocRef::host();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack.cfg");

        let mut meta = glacier_resources::MutableMetadata::new(alloc.clone());
        meta.set_string_array("filter.extensions", &["bin"]);
        let blob = meta.save(alloc.clone());
        std::fs::File::create(&path)
            .unwrap()
            .write_all(blob.as_slice())
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.get_string_array("filter.extensions").unwrap(),
            vec!["bin"],
        );
    }
}

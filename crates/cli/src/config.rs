//! CLI configuration utilities

use anyhow::{Context, Result};
use std::path::Path;
use storefront_core::SessionConfig;

/// Load the session configuration, from `path` when given
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display())),
        None => SessionConfig::load().context("loading default configuration"),
    }
}

//! The `package.json` subset that drives linking and builds.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub scripts: BTreeMap<String, String>,
}

impl Manifest {
    pub const FILE_NAME: &'static str = "package.json";

    pub fn from_file(path: &Path) -> Result<Manifest> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Read the manifest under `dir`; a missing file is not an error.
    pub fn try_find(dir: &Path) -> Result<Option<Manifest>> {
        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::from_file(&path)?))
    }
}

/// Whether the package root carries a native build descriptor.
pub fn has_binding_gyp(dir: &Path) -> bool {
    dir.join("binding.gyp").exists()
}

//! The project context: configuration, workspaces, dependency metadata, and
//! the host-persisted custom-data bag.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::locator::{Ident, Locator};

/// Which linking strategy materialises `node_modules`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeLinker {
    Pnpm,
    NodeModules,
    Pnp,
}

impl NodeLinker {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pnpm => "pnpm",
            Self::NodeModules => "node-modules",
            Self::Pnp => "pnp",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Configuration {
    pub node_linker: NodeLinker,
    pub enable_scripts: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            node_linker: NodeLinker::Pnpm,
            enable_scripts: true,
        }
    }
}

/// Per-dependency install settings carried by the project manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyMeta {
    pub built: Option<bool>,
}

/// A project-local package linked in place rather than through the store.
#[derive(Clone, Debug)]
pub struct Workspace {
    pub cwd: PathBuf,
    pub locator: Locator,
}

#[derive(Debug, Default)]
pub struct Project {
    pub cwd: PathBuf,
    pub configuration: Configuration,
    /// Keyed by `name` or `name@version`; the versioned entry wins.
    dependencies_meta: BTreeMap<String, DependencyMeta>,
    workspaces: BTreeMap<String, Workspace>,
    /// Persisted between installs by the host, keyed by component.
    pub installers_custom_data: BTreeMap<String, serde_json::Value>,
}

impl Project {
    pub fn new(cwd: impl Into<PathBuf>, configuration: Configuration) -> Self {
        Self {
            cwd: cwd.into(),
            configuration,
            ..Self::default()
        }
    }

    pub fn set_dependency_meta(&mut self, key: impl Into<String>, meta: DependencyMeta) {
        self.dependencies_meta.insert(key.into(), meta);
    }

    pub fn add_workspace(&mut self, workspace: Workspace) {
        self.workspaces
            .insert(workspace.locator.locator_hash(), workspace);
    }

    /// Merge the bare `name` entry with the `name@version` entry.
    pub fn get_dependency_meta(&self, ident: &Ident, version: Option<&str>) -> DependencyMeta {
        let mut merged = self
            .dependencies_meta
            .get(&ident.to_string())
            .cloned()
            .unwrap_or_default();
        if let Some(version) = version {
            if let Some(specific) = self.dependencies_meta.get(&format!("{ident}@{version}")) {
                if specific.built.is_some() {
                    merged.built = specific.built;
                }
            }
        }
        merged
    }

    /// Look up the workspace behind a locator, seeing through virtual
    /// instances.
    pub fn try_workspace_by_locator(&self, locator: &Locator) -> Option<&Workspace> {
        let locator = if locator.is_virtual() {
            locator.devirtualize()
        } else {
            locator.clone()
        };
        self.workspaces.get(&locator.locator_hash())
    }
}

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::locator::{Descriptor, Locator};

/// How a package is wired into the project tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    /// Linked in place; the package content is never copied.
    Soft,
    /// Copied into the store and shared through links.
    Hard,
}

/// A resolved package together with its outgoing dependency edges.
#[derive(Clone, Debug)]
pub struct Package {
    pub locator: Locator,
    pub version: Option<String>,
    pub link_type: LinkType,
    /// Dependency descriptors keyed by ident hash.
    pub dependencies: BTreeMap<String, Descriptor>,
}

impl Package {
    pub fn new(locator: Locator, link_type: LinkType) -> Self {
        Self {
            locator,
            version: None,
            link_type,
            dependencies: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn add_dependency(&mut self, descriptor: Descriptor) {
        self.dependencies
            .insert(descriptor.ident.ident_hash(), descriptor);
    }
}

/// A readable view of fetched package content.
#[derive(Clone, Debug)]
pub struct FetchResult {
    /// Root of the tree the fetcher produced.
    pub package_fs: PathBuf,
    /// Location of the package root inside that tree.
    pub prefix_path: PathBuf,
    /// Resolvable real path, set for packages that link in place.
    pub local_path: Option<PathBuf>,
}

impl FetchResult {
    pub fn package_root(&self) -> PathBuf {
        self.package_fs.join(&self.prefix_path)
    }

    pub fn real_path(&self) -> PathBuf {
        self.local_path.clone().unwrap_or_else(|| self.package_root())
    }
}

//! Read-side queries against the persisted install state.

use std::path::{Component, Path, PathBuf};

use anyhow::Result;

use jx_domain::{parse_locator, Locator, NodeLinker, Package, Project};

use crate::{error::LinkerError, paths::NODE_MODULES, state::InstallState};

/// Strategy facade for hosts that dispatch between linkers.
pub struct PnpmLinker;

impl PnpmLinker {
    pub fn supports_package(_pkg: &Package, project: &Project) -> bool {
        matches!(project.configuration.node_linker, NodeLinker::Pnpm)
    }

    /// Where a locator was materialised by the last install.
    pub fn find_package_location(locator: &Locator, project: &Project) -> Result<PathBuf> {
        let state = InstallState::load(project)?;
        state
            .package_locations
            .get(&locator.locator_hash())
            .cloned()
            .ok_or_else(|| {
                LinkerError::PackageNotInstalled {
                    locator: locator.to_string(),
                }
                .into()
            })
    }

    /// Which installed package owns `path`, if any.
    pub fn find_package_locator(path: &Path, project: &Project) -> Result<Option<Locator>> {
        let state = InstallState::load(project)?;
        if let Some(prefix) = node_modules_package_prefix(path) {
            if let Some(raw) = state.locator_by_path.get(&prefix) {
                return parse_locator(raw).map(Some);
            }
        }
        let mut current = path.to_path_buf();
        loop {
            if let Some(raw) = state.locator_by_path.get(&current) {
                return parse_locator(raw).map(Some);
            }
            if !current.pop() {
                return Ok(None);
            }
        }
    }
}

/// Extract the trailing `…/node_modules/(@scope/)?name` prefix, if any.
fn node_modules_package_prefix(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();
    for idx in (0..components.len()).rev() {
        if components[idx].as_os_str() != NODE_MODULES {
            continue;
        }
        let Some(first) = components.get(idx + 1) else {
            continue;
        };
        let scoped = first.as_os_str().to_string_lossy().starts_with('@');
        let end = if scoped { idx + 2 } else { idx + 1 };
        if end >= components.len() {
            continue;
        }
        let mut prefix = PathBuf::new();
        for component in &components[..=end] {
            prefix.push(component.as_os_str());
        }
        return Some(prefix);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_prefix_extraction_handles_scopes_and_depth() {
        assert_eq!(
            node_modules_package_prefix(Path::new("/r/node_modules/a/lib/x.js")),
            Some(PathBuf::from("/r/node_modules/a"))
        );
        assert_eq!(
            node_modules_package_prefix(Path::new("/r/node_modules/@org/pkg/lib/x.js")),
            Some(PathBuf::from("/r/node_modules/@org/pkg"))
        );
        // The innermost package wins.
        assert_eq!(
            node_modules_package_prefix(Path::new(
                "/r/node_modules/.store/s/node_modules/b/index.js"
            )),
            Some(PathBuf::from("/r/node_modules/.store/s/node_modules/b"))
        );
        assert_eq!(node_modules_package_prefix(Path::new("/r/src/x.js")), None);
        assert_eq!(
            node_modules_package_prefix(Path::new("/r/node_modules")),
            None
        );
    }
}

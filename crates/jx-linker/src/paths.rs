//! Path algebra for the on-disk store layout.

use std::path::{Path, PathBuf};

use jx_domain::{slugify_locator, Ident, Locator, Project};

pub const NODE_MODULES: &str = "node_modules";
pub const STORE_DIR: &str = ".store";

/// Root `node_modules` directory of the project.
pub fn node_modules_root(project: &Project) -> PathBuf {
    project.cwd.join(NODE_MODULES)
}

/// Store directory holding one entry per hard-linked package.
pub fn store_root(project: &Project) -> PathBuf {
    node_modules_root(project).join(STORE_DIR)
}

/// Vendor subpath of a package inside its own store entry.
pub fn vendor_path(ident: &Ident) -> PathBuf {
    Path::new(NODE_MODULES).join(ident.to_string())
}

/// On-disk location of a hard-linked package.
///
/// With a self-reference the package sits at the exact path it would occupy as
/// someone else's dependency, so resolving its own name from inside works.
pub fn package_location(
    locator: &Locator,
    project: &Project,
    create_self_reference: bool,
) -> PathBuf {
    let entry = store_root(project).join(slugify_locator(locator));
    if create_self_reference {
        entry.join(vendor_path(&locator.ident))
    } else {
        entry
    }
}

//! pnpm-style store linker.
//!
//! Materialises a resolved dependency graph under `node_modules/.store`, one
//! entry per hard-linked package, and wires every dependency edge as a symlink
//! in the dependent's private `node_modules`. Repeated installs reconcile the
//! on-disk state diff-wise, and finalisation garbage-collects store entries
//! the current install no longer references.

mod actions;
mod fs;
mod listing;
mod state;

pub mod error;
pub mod install;
pub mod paths;
pub mod resolver;

pub use error::LinkerError;
pub use install::{InstallResult, PnpmInstaller, LINKER_NAME};
pub use resolver::PnpmLinker;
pub use state::{custom_data_key, InstallState};

//! Data model for resolved package graphs: identifiers, locators, manifests,
//! and the project context the linkers operate against.

pub mod build;
pub mod locator;
pub mod manifest;
pub mod package;
pub mod project;
pub mod report;

pub use build::{extract_build_requests, BuildRequest, BUILD_SCRIPT_NAMES};
pub use locator::{parse_locator, slugify_locator, Descriptor, Ident, Locator};
pub use manifest::{has_binding_gyp, Manifest};
pub use package::{FetchResult, LinkType, Package};
pub use project::{Configuration, DependencyMeta, NodeLinker, Project, Workspace};
pub use report::{BufferedReport, Report, ReportCode, TracingReport};

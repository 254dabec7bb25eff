//! Extraction of the build steps a package requests at install time.

use crate::{
    manifest::Manifest,
    package::Package,
    project::{Configuration, DependencyMeta},
    report::{Report, ReportCode},
};

/// Lifecycle scripts that run as part of an install, in execution order.
pub const BUILD_SCRIPT_NAMES: [&str; 3] = ["preinstall", "install", "postinstall"];

/// A single build step requested by a package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildRequest {
    /// Run a named manifest script.
    Script(String),
    /// Run a shell command directly.
    Shellcode(String),
}

/// Collect the build steps for a freshly materialised package, honouring the
/// project-level gates.
pub fn extract_build_requests(
    pkg: &Package,
    manifest: &Manifest,
    has_binding_gyp: bool,
    meta: &DependencyMeta,
    configuration: &Configuration,
    report: &dyn Report,
) -> Vec<BuildRequest> {
    let mut requests = Vec::new();
    for name in BUILD_SCRIPT_NAMES {
        if manifest.scripts.contains_key(name) {
            requests.push(BuildRequest::Script(name.to_string()));
        }
    }
    // A native build descriptor without an install script implies node-gyp.
    if has_binding_gyp && !manifest.scripts.contains_key("install") {
        requests.push(BuildRequest::Shellcode("node-gyp rebuild".to_string()));
    }

    if requests.is_empty() {
        return requests;
    }
    if !configuration.enable_scripts {
        report.report_warning(
            ReportCode::BuildDisabled,
            &format!(
                "{} lists build scripts, but all build scripts have been disabled for this project",
                pkg.locator
            ),
        );
        return Vec::new();
    }
    if meta.built == Some(false) {
        report.report_info(
            ReportCode::BuildDisabled,
            &format!(
                "{} lists build scripts, but its build has been disabled through its dependency settings",
                pkg.locator
            ),
        );
        return Vec::new();
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        locator::parse_locator,
        package::LinkType,
        report::BufferedReport,
    };

    fn package() -> Package {
        Package::new(
            parse_locator("native-dep@npm:1.0.0").expect("locator"),
            LinkType::Hard,
        )
    }

    fn manifest_with_scripts(names: &[&str]) -> Manifest {
        let mut manifest = Manifest::default();
        for name in names {
            manifest
                .scripts
                .insert((*name).to_string(), "node run.js".to_string());
        }
        manifest
    }

    #[test]
    fn collects_scripts_in_lifecycle_order() {
        let report = BufferedReport::new();
        let manifest = manifest_with_scripts(&["postinstall", "preinstall", "test"]);
        let requests = extract_build_requests(
            &package(),
            &manifest,
            false,
            &DependencyMeta::default(),
            &Configuration::default(),
            &report,
        );
        assert_eq!(
            requests,
            vec![
                BuildRequest::Script("preinstall".to_string()),
                BuildRequest::Script("postinstall".to_string()),
            ]
        );
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn binding_gyp_implies_node_gyp_without_an_install_script() {
        let report = BufferedReport::new();
        let requests = extract_build_requests(
            &package(),
            &Manifest::default(),
            true,
            &DependencyMeta::default(),
            &Configuration::default(),
            &report,
        );
        assert_eq!(
            requests,
            vec![BuildRequest::Shellcode("node-gyp rebuild".to_string())]
        );

        let with_install = manifest_with_scripts(&["install"]);
        let requests = extract_build_requests(
            &package(),
            &with_install,
            true,
            &DependencyMeta::default(),
            &Configuration::default(),
            &report,
        );
        assert_eq!(requests, vec![BuildRequest::Script("install".to_string())]);
    }

    #[test]
    fn disabled_scripts_drop_the_requests_with_a_warning() {
        let report = BufferedReport::new();
        let configuration = Configuration {
            enable_scripts: false,
            ..Configuration::default()
        };
        let requests = extract_build_requests(
            &package(),
            &manifest_with_scripts(&["install"]),
            false,
            &DependencyMeta::default(),
            &configuration,
            &report,
        );
        assert!(requests.is_empty());
        let warnings = report.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, ReportCode::BuildDisabled);
    }

    #[test]
    fn dependency_meta_can_opt_a_package_out_of_building() {
        let report = BufferedReport::new();
        let requests = extract_build_requests(
            &package(),
            &manifest_with_scripts(&["install"]),
            false,
            &DependencyMeta { built: Some(false) },
            &Configuration::default(),
            &report,
        );
        assert!(requests.is_empty());
        assert!(report.warnings().is_empty());
        assert_eq!(report.infos().len(), 1);
    }
}

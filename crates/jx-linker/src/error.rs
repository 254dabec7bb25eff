use std::path::PathBuf;

/// User-visible failures raised by the store linker.
#[derive(Debug, thiserror::Error)]
pub enum LinkerError {
    #[error(
        "couldn't find the store state for {}; running an install might help",
        .project_cwd.display()
    )]
    MissingInstallState { project_cwd: PathBuf },

    #[error("couldn't find {locator} in the currently installed packages")]
    PackageNotInstalled { locator: String },

    #[error("the store linker doesn't support attaching external dependents")]
    ExternalDependentsUnsupported,
}

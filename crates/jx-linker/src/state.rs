//! Persisted mapping between locators and their on-disk locations.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use jx_domain::Project;

use crate::error::LinkerError;

pub(crate) const STATE_VERSION: u32 = 2;

/// Key under which the linker persists its state in the project's custom-data
/// bag. Versioned so incompatible prior data is naturally ignored.
pub fn custom_data_key() -> String {
    json!({ "name": "PnpmInstaller", "version": STATE_VERSION }).to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallState {
    /// Locator hash to the absolute path the package was materialised at.
    pub package_locations: BTreeMap<String, PathBuf>,
    /// Absolute path back to the stringified locator that owns it.
    pub locator_by_path: BTreeMap<PathBuf, String>,
}

impl InstallState {
    /// Load the state persisted by the previous install.
    pub fn load(project: &Project) -> Result<InstallState> {
        let value = project
            .installers_custom_data
            .get(&custom_data_key())
            .ok_or_else(|| LinkerError::MissingInstallState {
                project_cwd: project.cwd.clone(),
            })?;
        serde_json::from_value(value.clone()).context("failed to decode the persisted store state")
    }

    /// Store into the project's custom-data bag for the next install.
    pub fn persist(&self, project: &mut Project) -> Result<()> {
        let value = serde_json::to_value(self).context("failed to encode the store state")?;
        project.installers_custom_data.insert(custom_data_key(), value);
        Ok(())
    }
}

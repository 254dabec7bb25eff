//! Flattened listing of a `node_modules` directory.

use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path, path::PathBuf};

use anyhow::{Context, Result};

pub(crate) struct NmEntry {
    pub(crate) path: PathBuf,
    pub(crate) file_type: fs::FileType,
}

/// List the real contents of `nm_path`, flattening scoped packages into
/// `scope/name` keys. Absence is not an error. Dot-entries (`.store`, `.bin`)
/// are reserved and skipped.
pub(crate) fn node_modules_listing(nm_path: &Path) -> Result<BTreeMap<String, NmEntry>> {
    let mut entries = BTreeMap::new();
    let dir = match fs::read_dir(nm_path) {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(entries),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", nm_path.display()))
        }
    };
    for entry in dir {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if name.starts_with('@') {
            let scope_path = entry.path();
            let children = match fs::read_dir(&scope_path) {
                Ok(children) => children,
                // The scope may have been deleted while we were iterating.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to read {}", scope_path.display()))
                }
            };
            let mut seen_child = false;
            for child in children {
                let child = child?;
                let child_name = child.file_name().to_string_lossy().into_owned();
                entries.insert(
                    format!("{name}/{child_name}"),
                    NmEntry {
                        path: child.path(),
                        file_type: child.file_type()?,
                    },
                );
                seen_child = true;
            }
            if !seen_child {
                // An empty scope is exposed whole so it can be cleaned up.
                entries.insert(
                    name,
                    NmEntry {
                        path: scope_path,
                        file_type: entry.file_type()?,
                    },
                );
            }
        } else {
            entries.insert(
                name,
                NmEntry {
                    path: entry.path(),
                    file_type: entry.file_type()?,
                },
            );
        }
    }
    Ok(entries)
}

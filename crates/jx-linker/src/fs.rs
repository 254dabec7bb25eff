//! Filesystem helpers shared by the installer.

use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Remove a file, directory, or link. Directory links are removed without
/// recursing into their targets; an already-absent entry is fine.
pub(crate) fn remove_entry(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to stat {}", path.display())),
    };
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        fs::remove_file(path)
            .or_else(|err| {
                if err.kind() == ErrorKind::NotFound {
                    return Ok(());
                }
                // Some platforms expose directory links as directories.
                fs::remove_dir(path).or_else(|dir_err| {
                    if dir_err.kind() == ErrorKind::NotFound {
                        Ok(())
                    } else {
                        Err(dir_err)
                    }
                })
            })
            .with_context(|| format!("failed to remove link {}", path.display()))?;
        return Ok(());
    }

    if file_type.is_dir() {
        // Prefer `remove_dir` so junctions go away without touching their
        // targets.
        if fs::remove_dir(path).is_ok() {
            return Ok(());
        }
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove dir {}", path.display()))?;
        return Ok(());
    }

    fs::remove_file(path).with_context(|| format!("failed to remove file {}", path.display()))
}

/// Recursively delete `path`; absence is fine.
pub(crate) fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Opportunistic `rmdir`: a non-empty or already-absent directory is fine.
pub(crate) fn rmdir_if_empty(path: &Path) -> Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty
            ) =>
        {
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Copy `src` into `dest` without overwriting entries that already exist.
///
/// Store entries are shared between installs; a prior run may already have
/// populated part of the tree.
pub(crate) fn copy_tree_keep_existing(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let path = entry.path();
        if path == src {
            continue;
        }
        let rel = path.strip_prefix(src).unwrap_or(path);
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if target.exists() {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, &target)
                .with_context(|| format!("failed to copy {}", path.display()))?;
        } else if entry.file_type().is_symlink() {
            if fs::symlink_metadata(&target).is_ok() {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let link_target = fs::read_link(path)?;
            #[cfg(unix)]
            {
                std::os::unix::fs::symlink(&link_target, &target).with_context(|| {
                    format!("failed to copy link {}", path.display())
                })?;
            }
            #[cfg(windows)]
            {
                // Windows wants the link flavour up front; resolve the target
                // relative to the link to pick it.
                let resolved = if link_target.is_absolute() {
                    link_target.clone()
                } else {
                    path.parent()
                        .map(|dir| dir.join(&link_target))
                        .unwrap_or_else(|| link_target.clone())
                };
                let made = if resolved.is_dir() {
                    std::os::windows::fs::symlink_dir(&link_target, &target)
                } else {
                    std::os::windows::fs::symlink_file(&link_target, &target)
                };
                made.with_context(|| format!("failed to copy link {}", path.display()))?;
            }
            #[cfg(not(any(unix, windows)))]
            {
                let _ = link_target;
                return Err(anyhow::anyhow!(
                    "cannot copy link {} on this platform",
                    path.display()
                ));
            }
        }
    }
    Ok(())
}

/// Lexical relative path from the directory `base` to `target`.
pub(crate) fn relative_path_from(base: &Path, target: &Path) -> PathBuf {
    let base_components: Vec<Component<'_>> = base.components().collect();
    let target_components: Vec<Component<'_>> = target.components().collect();
    let mut shared = 0;
    while shared < base_components.len()
        && shared < target_components.len()
        && base_components[shared] == target_components[shared]
    {
        shared += 1;
    }
    let mut relative = PathBuf::new();
    for _ in shared..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[shared..] {
        relative.push(component.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

/// Create the farm link for a dependency. Unix gets a relative symlink so the
/// farm stays portable within the store; Windows requires a junction with an
/// absolute target.
pub(crate) fn create_dep_link(src: &Path, link: &Path, relative_target: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let _ = src;
        std::os::unix::fs::symlink(relative_target, link).with_context(|| {
            format!(
                "failed to create symlink {} -> {}",
                link.display(),
                relative_target.display()
            )
        })
    }

    #[cfg(windows)]
    {
        let _ = relative_target;
        create_junction(src, link)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (src, relative_target, link);
        Err(anyhow::anyhow!(
            "dependency links are not supported on this platform"
        ))
    }
}

#[cfg(windows)]
fn create_junction(target: &Path, link: &Path) -> Result<()> {
    use anyhow::anyhow;

    let link_str = link
        .to_str()
        .ok_or_else(|| anyhow!("non-utf8 link path {}", link.display()))?;
    let target_str = target
        .to_str()
        .ok_or_else(|| anyhow!("non-utf8 target path {}", target.display()))?;
    if link_str.contains('"') || target_str.contains('"') {
        return Err(anyhow!(
            "cannot create a junction for paths containing quotes: {} -> {}",
            link.display(),
            target.display()
        ));
    }

    let cmdline = format!(r#"mklink /J "{link_str}" "{target_str}""#);
    let output = std::process::Command::new("cmd")
        .args(["/C", &cmdline])
        .output()
        .with_context(|| "failed to invoke cmd.exe for mklink")?;
    if output.status.success() {
        return Ok(());
    }
    if fs::symlink_metadata(link).is_ok() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "mklink /J failed (exit {:?}): {}",
        output.status.code(),
        stderr.trim()
    ))
}

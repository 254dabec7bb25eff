//! The installer pipeline: materialise packages into the store, wire their
//! symlink farms, and garbage-collect the store on finalisation.
//!
//! Materialisation seeds an async action keyed by the package; attachment
//! reduces on the same key, so a package's link farm is only built once its
//! store entry is complete. Packages that were dropped from the graph are
//! swept from the store when the install finalises.

use std::{
    collections::HashSet,
    ffi::OsString,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use tokio::task::{spawn_blocking, JoinSet};
use tracing::debug;

use jx_domain::{
    extract_build_requests, has_binding_gyp, BuildRequest, Descriptor, FetchResult, LinkType,
    Locator, Manifest, NodeLinker, Package, Project, Report, ReportCode,
};

use crate::{
    actions::{ActionTable, TaskResult, ACTION_BUDGET},
    error::LinkerError,
    fs::{
        copy_tree_keep_existing, create_dep_link, relative_path_from, remove_entry, remove_tree,
        rmdir_if_empty,
    },
    listing::{node_modules_listing, NmEntry},
    paths::{node_modules_root, package_location, store_root, vendor_path, NODE_MODULES},
    state::InstallState,
};

/// Configuration value under which this linker is active.
pub const LINKER_NAME: &str = "pnpm";

/// Outcome of materialising one package.
#[derive(Clone, Debug)]
pub struct InstallResult {
    pub package_location: PathBuf,
    /// `None` for packages linked in place; hard-linked packages always carry
    /// a (possibly empty) set of build steps.
    pub build_requests: Option<Vec<BuildRequest>>,
}

pub struct PnpmInstaller<'a> {
    project: &'a Project,
    report: &'a dyn Report,
    actions: ActionTable,
    state: InstallState,
}

impl<'a> PnpmInstaller<'a> {
    pub fn new(project: &'a Project, report: &'a dyn Report) -> Self {
        Self {
            project,
            report,
            actions: ActionTable::new(ACTION_BUDGET),
            state: InstallState::default(),
        }
    }

    /// Prior custom data is deliberately not rehydrated: locations are
    /// recomputed every install so the store can be pruned and
    /// self-references regenerated when the graph changes.
    pub fn attach_custom_data(&mut self, _custom_data: &serde_json::Value) {}

    /// Materialise one package, soft or hard. The returned location is final
    /// immediately; the store copy itself happens asynchronously under the
    /// package's action key.
    pub async fn install_package(
        &mut self,
        pkg: &Package,
        fetched: FetchResult,
    ) -> Result<InstallResult> {
        match pkg.link_type {
            LinkType::Soft => self.install_soft(pkg, &fetched),
            LinkType::Hard => self.install_hard(pkg, fetched).await,
        }
    }

    fn install_soft(&mut self, pkg: &Package, fetched: &FetchResult) -> Result<InstallResult> {
        let package_location = fetched.real_path();
        self.state
            .package_locations
            .insert(pkg.locator.locator_hash(), package_location.clone());
        Ok(InstallResult {
            package_location,
            build_requests: None,
        })
    }

    async fn install_hard(&mut self, pkg: &Package, fetched: FetchResult) -> Result<InstallResult> {
        // A package depending on its own ident gets the flat layout; the
        // vendor subpath would collide with the dependency link.
        let create_self_reference = !pkg
            .dependencies
            .contains_key(&pkg.locator.ident.ident_hash());
        let pkg_path = package_location(&pkg.locator, self.project, create_self_reference);

        self.state
            .locator_by_path
            .insert(pkg_path.clone(), pkg.locator.to_string());
        self.state
            .package_locations
            .insert(pkg.locator.locator_hash(), pkg_path.clone());

        let package_root = fetched.package_root();
        let manifest = Manifest::try_find(&package_root)?.unwrap_or_default();
        let native_build = has_binding_gyp(&package_root);

        let locator = pkg.locator.clone();
        let dest = pkg_path.clone();
        self.actions
            .set(&pkg.locator.locator_hash(), async move {
                debug!(locator = %locator, path = %dest.display(), "materialising store entry");
                // The fetched tree moves into the task and stays alive until
                // the copy settles.
                spawn_blocking(move || -> Result<()> {
                    fs::create_dir_all(&dest)
                        .with_context(|| format!("failed to create {}", dest.display()))?;
                    copy_tree_keep_existing(&fetched.package_root(), &dest)
                })
                .await
                .map_err(|err| anyhow!("store copy task failed: {err}"))??;
                Ok(())
            })
            .await;

        let build_locator = if pkg.locator.is_virtual() {
            pkg.locator.devirtualize()
        } else {
            pkg.locator.clone()
        };
        let meta = self
            .project
            .get_dependency_meta(&build_locator.ident, pkg.version.as_deref());
        let build_requests = extract_build_requests(
            pkg,
            &manifest,
            native_build,
            &meta,
            &self.project.configuration,
            self.report,
        );

        Ok(InstallResult {
            package_location: pkg_path,
            build_requests: Some(build_requests),
        })
    }

    /// Wire the dependency edges of one installed package as a symlink farm,
    /// pruning entries that no longer correspond to an edge.
    pub async fn attach_internal_dependencies(
        &mut self,
        locator: &Locator,
        dependencies: &[(Descriptor, Locator)],
    ) -> Result<()> {
        if !matches!(self.project.configuration.node_linker, NodeLinker::Pnpm) {
            return Ok(());
        }
        // A virtual workspace instance never gets its own layout; the
        // devirtualised workspace receives the links instead.
        if !is_store_compatible(locator, self.project) {
            return Ok(());
        }

        let key = locator.locator_hash();
        let pkg_path = self
            .state
            .package_locations
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                anyhow!("attached package {locator} has not been registered by this install")
            })?;
        let (nm_path, store_entry_to_clean) = link_farm_paths(&pkg_path, locator, self.project)?;

        // Resolve the edges up front so the scheduled task is pure filesystem
        // work.
        let mut edges = Vec::with_capacity(dependencies.len());
        for (descriptor, dependency) in dependencies {
            let target = if is_store_compatible(dependency, self.project) {
                dependency.clone()
            } else {
                self.report.report_warning(
                    ReportCode::UnsupportedFeature,
                    &format!(
                        "{dependency} is a workspace; the store layout cannot give it dedicated \
                         peer dependencies, so {locator} will use the workspace as-is"
                    ),
                );
                dependency.devirtualize()
            };
            let src = self
                .state
                .package_locations
                .get(&target.locator_hash())
                .cloned()
                .ok_or_else(|| {
                    anyhow!("dependency {target} of {locator} has not been registered by this install")
                })?;
            // The descriptor ident may differ from the dependency's own ident
            // (aliases); the farm entry is named after the descriptor.
            let name = descriptor.ident.to_string();
            let dst = nm_path.join(&name);
            edges.push(FarmEdge { name, src, dst });
        }

        let own_ident = locator.ident.to_string();
        let farm_locator = locator.clone();
        self.actions
            .reduce(&key, move |seed: TaskResult| async move {
                // The farm is only built over a completed store entry.
                seed?;
                debug!(locator = %farm_locator, "building link farm");
                build_link_farm(nm_path, store_entry_to_clean, edges, own_ident).await
            })
            .await;
        Ok(())
    }

    pub fn attach_external_dependents(
        &mut self,
        _locator: &Locator,
        _dependent_paths: &[PathBuf],
    ) -> Result<()> {
        Err(LinkerError::ExternalDependentsUnsupported.into())
    }

    /// Sweep the store, drain the pipeline, and hand the install state back
    /// to the host for persistence.
    pub async fn finalize_install(&mut self) -> Result<InstallState> {
        let store = store_root(self.project);
        if !matches!(self.project.configuration.node_linker, NodeLinker::Pnpm) {
            // The project switched strategies; drop the old store entirely.
            remove_tree(&store)?;
        } else {
            let expected: HashSet<OsString> = self
                .state
                .package_locations
                .values()
                .filter_map(|location| location.strip_prefix(&store).ok())
                .filter_map(|rel| rel.components().next())
                .map(|component| component.as_os_str().to_os_string())
                .collect();
            let children = match fs::read_dir(&store) {
                Ok(dir) => dir
                    .collect::<std::io::Result<Vec<_>>>()
                    .with_context(|| format!("failed to read {}", store.display()))?,
                Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to read {}", store.display()))
                }
            };
            for child in children {
                if !expected.contains(&child.file_name()) {
                    debug!(entry = %child.path().display(), "sweeping stale store entry");
                    remove_entry(&child.path())?;
                }
            }
            rmdir_if_empty(&store)?;
        }

        self.actions.wait().await?;
        rmdir_if_empty(&node_modules_root(self.project))?;
        Ok(std::mem::take(&mut self.state))
    }
}

/// Virtual workspace instances cannot be materialised more than once on disk.
fn is_store_compatible(locator: &Locator, project: &Project) -> bool {
    !locator.is_virtual() || project.try_workspace_by_locator(locator).is_none()
}

/// Locate a package's link-farm directory, plus the store entry to purge of
/// leftovers when the package sits behind a self-reference.
fn link_farm_paths(
    pkg_path: &Path,
    locator: &Locator,
    project: &Project,
) -> Result<(PathBuf, Option<PathBuf>)> {
    let store = store_root(project);
    let vendor = vendor_path(&locator.ident);
    if pkg_path.starts_with(&store) && pkg_path.ends_with(&vendor) {
        let mut nm_path = pkg_path.to_path_buf();
        for _ in locator.ident.to_string().split('/') {
            if !nm_path.pop() {
                bail!(
                    "store path {} is too short to contain {}",
                    pkg_path.display(),
                    vendor.display()
                );
            }
        }
        if !nm_path.ends_with(NODE_MODULES) {
            bail!("expected {} to end in {NODE_MODULES}", nm_path.display());
        }
        let store_entry = nm_path.parent().map(Path::to_path_buf);
        Ok((nm_path, store_entry))
    } else {
        Ok((pkg_path.join(NODE_MODULES), None))
    }
}

struct FarmEdge {
    name: String,
    src: PathBuf,
    dst: PathBuf,
}

struct LinkPlan {
    replace: bool,
    edge: FarmEdge,
    relative_target: PathBuf,
}

struct RemovalPlan {
    nm_path: PathBuf,
    name: String,
    path: PathBuf,
}

struct FarmPlan {
    links: Vec<LinkPlan>,
    removals: Vec<RemovalPlan>,
}

async fn build_link_farm(
    nm_path: PathBuf,
    store_entry_to_clean: Option<PathBuf>,
    edges: Vec<FarmEdge>,
    own_ident: String,
) -> Result<()> {
    // Plan sequentially, apply concurrently: the planning pass owns the
    // listing diff, every apply is independent filesystem work.
    let plan = {
        let nm_path = nm_path.clone();
        spawn_blocking(move || {
            plan_link_farm(&nm_path, store_entry_to_clean.as_deref(), edges, &own_ident)
        })
        .await
        .map_err(|err| anyhow!("link farm planning task failed: {err}"))??
    };

    let mut updates = JoinSet::new();
    for link in plan.links {
        updates.spawn_blocking(move || apply_link(link));
    }
    for removal in plan.removals {
        updates.spawn_blocking(move || apply_removal(removal));
    }
    let mut first_failure = None;
    while let Some(joined) = updates.join_next().await {
        let outcome = joined.map_err(|err| anyhow!("link farm update task failed: {err}"))?;
        if let Err(err) = outcome {
            if first_failure.is_none() {
                first_failure = Some(err);
            }
        }
    }
    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn plan_link_farm(
    nm_path: &Path,
    store_entry: Option<&Path>,
    edges: Vec<FarmEdge>,
    own_ident: &str,
) -> Result<FarmPlan> {
    if let Some(store_entry) = store_entry {
        // Leftovers from an install that used the flat layout.
        match fs::read_dir(store_entry) {
            Ok(dir) => {
                for entry in dir {
                    let entry = entry?;
                    if entry.file_name().as_os_str() != NODE_MODULES {
                        remove_entry(&entry.path())?;
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", store_entry.display()))
            }
        }
    }

    let mut extraneous = node_modules_listing(nm_path)?;
    let mut links = Vec::new();
    for edge in edges {
        let relative_target = relative_path_from(edge.dst.parent().unwrap_or(nm_path), &edge.src);
        let mut replace = false;
        if let Some(existing) = extraneous.remove(&edge.name) {
            if existing.file_type.is_symlink() && link_points_at(&edge.dst, &relative_target) {
                // Already wired to the right store entry.
                continue;
            }
            replace = true;
        }
        links.push(LinkPlan {
            replace,
            edge,
            relative_target,
        });
    }

    // The self-reference entry is part of the package, not farm garbage.
    extraneous.remove(own_ident);
    let removals = extraneous
        .into_iter()
        .map(|(name, entry): (String, NmEntry)| RemovalPlan {
            nm_path: nm_path.to_path_buf(),
            name,
            path: entry.path,
        })
        .collect();

    Ok(FarmPlan { links, removals })
}

fn link_points_at(link: &Path, relative_target: &Path) -> bool {
    fs::read_link(link)
        .map(|target| target == relative_target)
        .unwrap_or(false)
}

fn apply_link(plan: LinkPlan) -> Result<()> {
    if plan.replace {
        remove_entry(&plan.edge.dst)?;
    }
    if let Some(parent) = plan.edge.dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    create_dep_link(&plan.edge.src, &plan.edge.dst, &plan.relative_target)
}

fn apply_removal(plan: RemovalPlan) -> Result<()> {
    remove_entry(&plan.path)?;
    if let Some((scope, _)) = plan.name.split_once('/') {
        // Dropping the last package of a scope leaves an empty scope dir.
        rmdir_if_empty(&plan.nm_path.join(scope))?;
    }
    Ok(())
}

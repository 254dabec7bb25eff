//! End-to-end installs over temp projects, driven the way an install host
//! drives the linker: materialise every package, attach every dependent,
//! finalise, persist.

use std::{
    fs,
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::Result;
use jx_domain::{
    parse_locator, slugify_locator, BufferedReport, Configuration, Descriptor, FetchResult,
    LinkType, Locator, NodeLinker, Package, Project, ReportCode, Workspace,
};
use jx_linker::{paths, InstallState, PnpmInstaller, PnpmLinker};

fn block_on<F: Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(fut)
}

fn hard_package(raw: &str, version: &str) -> Package {
    Package::new(parse_locator(raw).expect("locator"), LinkType::Hard).with_version(version)
}

fn descriptor(name: &str, range: &str) -> Descriptor {
    Descriptor::new(jx_domain::Ident::parse(name).expect("ident"), range)
}

/// Seed a fetched tree for `locator` under `fetch_root` and describe it.
fn seed_fetch(fetch_root: &Path, pkg: &Package) -> FetchResult {
    let dir = fetch_root.join(slugify_locator(&pkg.locator));
    fs::create_dir_all(&dir).expect("fetch dir");
    let name = pkg.locator.ident.to_string();
    let version = pkg.version.clone().unwrap_or_else(|| "0.0.0".to_string());
    fs::write(
        dir.join("package.json"),
        format!(r#"{{ "name": "{name}", "version": "{version}" }}"#),
    )
    .expect("manifest");
    fs::write(dir.join("index.js"), "module.exports = {};\n").expect("entry point");
    FetchResult {
        package_fs: dir,
        prefix_path: PathBuf::new(),
        local_path: None,
    }
}

fn workspace_fetch(cwd: &Path) -> FetchResult {
    FetchResult {
        package_fs: cwd.to_path_buf(),
        prefix_path: PathBuf::new(),
        local_path: Some(cwd.to_path_buf()),
    }
}

struct Install<'p> {
    packages: Vec<(Package, FetchResult)>,
    edges: Vec<(Locator, Vec<(Descriptor, Locator)>)>,
    project: &'p mut Project,
}

impl<'p> Install<'p> {
    fn new(project: &'p mut Project) -> Self {
        Self {
            packages: Vec::new(),
            edges: Vec::new(),
            project,
        }
    }

    fn package(mut self, pkg: &Package, fetched: FetchResult) -> Self {
        self.packages.push((pkg.clone(), fetched));
        self
    }

    fn edges(mut self, locator: &Locator, deps: Vec<(Descriptor, Locator)>) -> Self {
        self.edges.push((locator.clone(), deps));
        self
    }

    /// Drive the full pipeline and persist the resulting state.
    fn run(self, report: &BufferedReport) -> Result<InstallState> {
        let Install {
            packages,
            edges,
            project,
        } = self;
        let state = block_on(async {
            let mut installer = PnpmInstaller::new(&*project, report);
            for (pkg, fetched) in packages {
                installer.install_package(&pkg, fetched).await?;
            }
            for (locator, deps) in edges {
                installer.attach_internal_dependencies(&locator, &deps).await?;
            }
            installer.finalize_install().await
        })?;
        state.persist(project)?;
        Ok(state)
    }
}

fn store_entry(project: &Project, locator: &Locator) -> PathBuf {
    paths::store_root(project).join(slugify_locator(locator))
}

#[cfg(unix)]
fn read_link(path: &Path) -> PathBuf {
    fs::read_link(path).expect("symlink")
}

#[test]
fn install_links_dependencies_through_the_store() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut project = Project::new(temp.path().join("proj"), Configuration::default());
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let mut a = hard_package("a@npm:1.0.0", "1.0.0");
    a.add_dependency(descriptor("b", "npm:1.0.0"));
    let b = hard_package("b@npm:1.0.0", "1.0.0");
    let fetched_a = seed_fetch(&fetch_root, &a);
    let fetched_b = seed_fetch(&fetch_root, &b);

    Install::new(&mut project)
        .package(&a, fetched_a)
        .package(&b, fetched_b)
        .edges(&a.locator, vec![(descriptor("b", "npm:1.0.0"), b.locator.clone())])
        .edges(&b.locator, vec![])
        .run(&report)?;

    // Both packages sit behind their self-reference inside the store.
    let a_entry = store_entry(&project, &a.locator);
    assert!(a_entry.join("node_modules/a/package.json").exists());
    assert!(a_entry.join("node_modules/a/index.js").exists());

    let link = a_entry.join("node_modules/b");
    let meta = fs::symlink_metadata(&link)?;
    assert!(meta.file_type().is_symlink() || meta.file_type().is_dir());
    #[cfg(unix)]
    {
        let target = read_link(&link);
        assert!(target.is_relative());
        assert_eq!(
            target,
            Path::new("..")
                .join("..")
                .join(slugify_locator(&b.locator))
                .join("node_modules/b")
        );
    }
    assert!(link.join("package.json").exists());

    // Store children are exactly the two slugs.
    let mut children: Vec<String> = fs::read_dir(paths::store_root(&project))?
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    children.sort();
    let mut expected = vec![slugify_locator(&a.locator), slugify_locator(&b.locator)];
    expected.sort();
    assert_eq!(children, expected);
    assert!(report.warnings().is_empty());
    Ok(())
}

#[test]
fn self_aliases_disable_the_self_reference() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut project = Project::new(temp.path().join("proj"), Configuration::default());
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    // a@1 depends on a@2 under its own name.
    let mut a1 = hard_package("a@npm:1.0.0", "1.0.0");
    a1.add_dependency(descriptor("a", "npm:2.0.0"));
    let a2 = hard_package("a@npm:2.0.0", "2.0.0");
    let fetched_a1 = seed_fetch(&fetch_root, &a1);
    let fetched_a2 = seed_fetch(&fetch_root, &a2);

    Install::new(&mut project)
        .package(&a1, fetched_a1)
        .package(&a2, fetched_a2)
        .edges(&a1.locator, vec![(descriptor("a", "npm:2.0.0"), a2.locator.clone())])
        .edges(&a2.locator, vec![])
        .run(&report)?;

    // Flat layout: the package files sit directly in the store entry.
    let a1_entry = store_entry(&project, &a1.locator);
    assert!(a1_entry.join("package.json").exists());

    // node_modules/a resolves to the aliased version, not to itself.
    let link = a1_entry.join("node_modules/a");
    assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
    assert_eq!(
        fs::canonicalize(&link)?,
        fs::canonicalize(store_entry(&project, &a2.locator).join("node_modules/a"))?
    );
    Ok(())
}

#[test]
fn workspaces_link_in_place_and_reach_the_store() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let repo = temp.path().join("repo");
    let w_cwd = repo.join("packages/w");
    fs::create_dir_all(&w_cwd)?;
    fs::write(w_cwd.join("package.json"), r#"{ "name": "w" }"#)?;

    let mut project = Project::new(&repo, Configuration::default());
    let w_locator = parse_locator("w@workspace:packages/w")?;
    project.add_workspace(Workspace {
        cwd: w_cwd.clone(),
        locator: w_locator.clone(),
    });
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let w = Package::new(w_locator.clone(), LinkType::Soft);
    let b = hard_package("b@npm:1.0.0", "1.0.0");
    let fetched_b = seed_fetch(&fetch_root, &b);

    let state = Install::new(&mut project)
        .package(&w, workspace_fetch(&w_cwd))
        .package(&b, fetched_b)
        .edges(&w.locator, vec![(descriptor("b", "npm:1.0.0"), b.locator.clone())])
        .edges(&b.locator, vec![])
        .run(&report)?;

    // The workspace was not copied anywhere.
    assert_eq!(
        state.package_locations.get(&w_locator.locator_hash()),
        Some(&w_cwd)
    );

    let link = w_cwd.join("node_modules/b");
    #[cfg(unix)]
    assert!(read_link(&link).is_relative());
    assert_eq!(
        fs::canonicalize(&link)?,
        fs::canonicalize(store_entry(&project, &b.locator).join("node_modules/b"))?
    );
    Ok(())
}

#[test]
fn dropped_packages_are_swept_on_the_next_install() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let repo = temp.path().join("repo");
    let w_cwd = repo.join("packages/w");
    fs::create_dir_all(&w_cwd)?;
    fs::write(w_cwd.join("package.json"), r#"{ "name": "w" }"#)?;

    let mut project = Project::new(&repo, Configuration::default());
    let w_locator = parse_locator("w@workspace:packages/w")?;
    project.add_workspace(Workspace {
        cwd: w_cwd.clone(),
        locator: w_locator.clone(),
    });
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let w = Package::new(w_locator.clone(), LinkType::Soft);
    let b = hard_package("b@npm:1.0.0", "1.0.0");
    let fetched_b = seed_fetch(&fetch_root, &b);

    Install::new(&mut project)
        .package(&w, workspace_fetch(&w_cwd))
        .package(&b, fetched_b)
        .edges(&w.locator, vec![(descriptor("b", "npm:1.0.0"), b.locator.clone())])
        .edges(&b.locator, vec![])
        .run(&report)?;
    assert!(store_entry(&project, &b.locator).exists());
    assert!(fs::symlink_metadata(w_cwd.join("node_modules/b")).is_ok());

    // Second install: b is gone from the graph.
    Install::new(&mut project)
        .package(&w, workspace_fetch(&w_cwd))
        .edges(&w.locator, vec![])
        .run(&report)?;

    assert!(!store_entry(&project, &b.locator).exists());
    assert!(fs::symlink_metadata(w_cwd.join("node_modules/b")).is_err());
    Ok(())
}

#[test]
fn switching_linkers_garbage_collects_the_store() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut project = Project::new(temp.path().join("proj"), Configuration::default());
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let b = hard_package("b@npm:1.0.0", "1.0.0");
    let fetched_b = seed_fetch(&fetch_root, &b);
    Install::new(&mut project)
        .package(&b, fetched_b)
        .edges(&b.locator, vec![])
        .run(&report)?;
    assert!(paths::store_root(&project).exists());

    project.configuration.node_linker = NodeLinker::NodeModules;
    Install::new(&mut project).run(&report)?;
    assert!(!paths::store_root(&project).exists());
    Ok(())
}

#[test]
fn scoped_dependencies_clean_up_their_scope_directory() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut project = Project::new(temp.path().join("proj"), Configuration::default());
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let mut c = hard_package("c@npm:1.0.0", "1.0.0");
    c.add_dependency(descriptor("@org/pkg", "npm:1.0.0"));
    let dep = hard_package("@org/pkg@npm:1.0.0", "1.0.0");
    let fetched_c = seed_fetch(&fetch_root, &c);
    let fetched_dep = seed_fetch(&fetch_root, &dep);

    Install::new(&mut project)
        .package(&c, fetched_c.clone())
        .package(&dep, fetched_dep)
        .edges(
            &c.locator,
            vec![(descriptor("@org/pkg", "npm:1.0.0"), dep.locator.clone())],
        )
        .edges(&dep.locator, vec![])
        .run(&report)?;

    let c_nm = store_entry(&project, &c.locator).join("node_modules");
    assert!(fs::symlink_metadata(c_nm.join("@org/pkg")).is_ok());

    // Second install drops the scoped dependency; the scope dir goes with it.
    Install::new(&mut project)
        .package(&c, fetched_c)
        .edges(&c.locator, vec![])
        .run(&report)?;
    assert!(fs::symlink_metadata(c_nm.join("@org/pkg")).is_err());
    assert!(!c_nm.join("@org").exists());
    assert!(c_nm.join("c").exists(), "self-reference must survive");
    Ok(())
}

#[cfg(unix)]
#[test]
fn repeated_installs_do_not_recreate_links() -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let temp = tempfile::tempdir()?;
    let mut project = Project::new(temp.path().join("proj"), Configuration::default());
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let mut a = hard_package("a@npm:1.0.0", "1.0.0");
    a.add_dependency(descriptor("b", "npm:1.0.0"));
    let b = hard_package("b@npm:1.0.0", "1.0.0");

    for _ in 0..2 {
        let fetched_a = seed_fetch(&fetch_root, &a);
        let fetched_b = seed_fetch(&fetch_root, &b);
        Install::new(&mut project)
            .package(&a, fetched_a)
            .package(&b, fetched_b)
            .edges(&a.locator, vec![(descriptor("b", "npm:1.0.0"), b.locator.clone())])
            .edges(&b.locator, vec![])
            .run(&report)?;
    }

    let link = store_entry(&project, &a.locator).join("node_modules/b");
    let first_inode = fs::symlink_metadata(&link)?.ino();

    let fetched_a = seed_fetch(&fetch_root, &a);
    let fetched_b = seed_fetch(&fetch_root, &b);
    Install::new(&mut project)
        .package(&a, fetched_a)
        .package(&b, fetched_b)
        .edges(&a.locator, vec![(descriptor("b", "npm:1.0.0"), b.locator.clone())])
        .edges(&b.locator, vec![])
        .run(&report)?;

    assert_eq!(
        fs::symlink_metadata(&link)?.ino(),
        first_inode,
        "matching links must be left untouched"
    );
    Ok(())
}

#[test]
fn virtual_workspace_dependencies_are_downgraded_with_a_warning() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let repo = temp.path().join("repo");
    let w_cwd = repo.join("packages/w");
    fs::create_dir_all(&w_cwd)?;
    fs::write(w_cwd.join("package.json"), r#"{ "name": "w" }"#)?;

    let mut project = Project::new(&repo, Configuration::default());
    let w_locator = parse_locator("w@workspace:packages/w")?;
    project.add_workspace(Workspace {
        cwd: w_cwd.clone(),
        locator: w_locator.clone(),
    });
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let w = Package::new(w_locator.clone(), LinkType::Soft);
    let mut root = hard_package("root@npm:1.0.0", "1.0.0");
    root.add_dependency(descriptor("w", "workspace:packages/w"));
    let fetched_root = seed_fetch(&fetch_root, &root);
    let virtual_w = parse_locator("w@virtual:beef#workspace:packages/w")?;

    Install::new(&mut project)
        .package(&w, workspace_fetch(&w_cwd))
        .package(&root, fetched_root)
        .edges(
            &root.locator,
            vec![(descriptor("w", "workspace:packages/w"), virtual_w.clone())],
        )
        // The virtual instance itself is skipped by the compatibility guard.
        .edges(&virtual_w, vec![])
        .edges(&w.locator, vec![])
        .run(&report)?;

    let warnings = report.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].0, ReportCode::UnsupportedFeature);
    assert!(warnings[0].1.contains("w@virtual:beef#workspace:packages/w"));

    // The edge landed on the devirtualised workspace.
    let link = store_entry(&project, &root.locator).join("node_modules/w");
    assert_eq!(fs::canonicalize(&link)?, fs::canonicalize(&w_cwd)?);
    Ok(())
}

#[test]
fn resolver_round_trips_installed_packages() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut project = Project::new(temp.path().join("proj"), Configuration::default());
    let report = BufferedReport::new();
    let fetch_root = temp.path().join("fetch");

    let a = hard_package("a@npm:1.0.0", "1.0.0");
    let fetched_a = seed_fetch(&fetch_root, &a);
    Install::new(&mut project)
        .package(&a, fetched_a)
        .edges(&a.locator, vec![])
        .run(&report)?;

    let location = PnpmLinker::find_package_location(&a.locator, &project)?;
    assert!(location.join("package.json").exists());
    assert_eq!(
        PnpmLinker::find_package_locator(&location, &project)?,
        Some(a.locator.clone())
    );
    // Any path below the package root resolves to the owning locator.
    assert_eq!(
        PnpmLinker::find_package_locator(&location.join("lib/deep/util.js"), &project)?,
        Some(a.locator.clone())
    );
    // Paths outside any installed package resolve to nothing.
    assert_eq!(
        PnpmLinker::find_package_locator(&project.cwd.join("src/main.js"), &project)?,
        None
    );

    let missing = parse_locator("ghost@npm:9.9.9")?;
    let err = PnpmLinker::find_package_location(&missing, &project).expect_err("not installed");
    assert!(err.to_string().contains("ghost@npm:9.9.9"));
    Ok(())
}

#[test]
fn resolver_queries_need_a_prior_install() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let project = Project::new(temp.path().join("proj"), Configuration::default());
    let locator = parse_locator("a@npm:1.0.0")?;
    let err = PnpmLinker::find_package_location(&locator, &project).expect_err("no state");
    assert!(err.to_string().contains("install"));
    Ok(())
}

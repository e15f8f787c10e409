//! Filesystem sandboxes for isolated trials.
//!
//! Every trial works on a private copy of the baseline directory. Where that
//! copy lives is decided by a [`SandboxAllocator`], so tests can point
//! sandboxes at a fixture root instead of the process-wide temp directory.
//! The allocated directory is removed when the [`Sandbox`] is torn down or
//! dropped, whichever comes first.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use super::command::run_argv;
use super::config::RunConfig;
use crate::error::SandboxError;

/// Directories skipped when diffing a sandbox against its baseline.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".venv",
    "venv",
    ".pytest_cache",
    ".mypy_cache",
    "node_modules",
    "target",
];

/// Hands out fresh, private directories for sandboxes.
pub trait SandboxAllocator: Send + Sync {
    /// Allocates an empty directory. `label` is a hint for naming only.
    fn allocate(&self, label: &str) -> Result<SandboxDir, SandboxError>;
}

/// An allocated directory that is removed on [`close`](SandboxDir::close) or
/// drop.
#[derive(Debug)]
pub struct SandboxDir {
    path: PathBuf,
    temp: Option<TempDir>,
    remove_on_drop: bool,
}

impl SandboxDir {
    /// Wraps a `TempDir`.
    pub fn temp(dir: TempDir) -> Self {
        Self {
            path: dir.path().to_path_buf(),
            temp: Some(dir),
            remove_on_drop: false,
        }
    }

    /// Takes ownership of an existing directory; it is deleted on close.
    pub fn owned(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
            remove_on_drop: true,
        }
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory, reporting failures.
    pub fn close(mut self) -> Result<(), SandboxError> {
        if let Some(temp) = self.temp.take() {
            temp.close()
                .map_err(|e| SandboxError::Cleanup(format!("{}: {}", self.path.display(), e)))?;
        } else if self.remove_on_drop {
            self.remove_on_drop = false;
            match fs::remove_dir_all(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SandboxError::Cleanup(format!(
                        "{}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Drop for SandboxDir {
    fn drop(&mut self) {
        if self.remove_on_drop && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!("Failed to remove sandbox dir {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Allocates sandboxes as uniquely named temp directories.
#[derive(Debug, Clone)]
pub struct TempDirAllocator {
    parent: Option<PathBuf>,
    prefix: String,
}

impl TempDirAllocator {
    /// Allocates under the system temp directory.
    pub fn new() -> Self {
        Self {
            parent: None,
            prefix: "eval_trial_".to_string(),
        }
    }

    /// Allocates under `parent` instead of the system temp directory.
    pub fn in_dir(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::new()
        }
    }
}

impl Default for TempDirAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxAllocator for TempDirAllocator {
    fn allocate(&self, label: &str) -> Result<SandboxDir, SandboxError> {
        let prefix = format!("{}{}_", self.prefix, sanitize_label(label));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| SandboxError::Allocate(e.to_string()))?;
        Ok(SandboxDir::temp(dir))
    }
}

/// Allocates sandboxes as `<root>/<label>-<uuid>` directories.
#[derive(Debug, Clone)]
pub struct FixedRootAllocator {
    root: PathBuf,
}

impl FixedRootAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SandboxAllocator for FixedRootAllocator {
    fn allocate(&self, label: &str) -> Result<SandboxDir, SandboxError> {
        let path = self
            .root
            .join(format!("{}-{}", sanitize_label(label), Uuid::new_v4()));
        fs::create_dir_all(&path).map_err(|e| {
            SandboxError::Allocate(format!("{}: {}", path.display(), e))
        })?;
        Ok(SandboxDir::owned(path))
    }
}

/// A provisioned sandbox: a private copy of the baseline, ready for the agent.
#[derive(Debug)]
pub struct Sandbox {
    /// Unique identifier for this sandbox.
    pub id: String,
    dir: SandboxDir,
    root: PathBuf,
    baseline: PathBuf,
}

impl Sandbox {
    /// Copies the baseline into a fresh directory and runs the configured
    /// dependency install inside the copy.
    ///
    /// A failing install is logged and otherwise ignored; it shows up later
    /// as a failing test run.
    pub async fn provision(
        allocator: &dyn SandboxAllocator,
        label: &str,
        baseline: &Path,
        config: &RunConfig,
    ) -> Result<Self, SandboxError> {
        let baseline = baseline.to_path_buf();
        if !baseline.is_dir() {
            return Err(SandboxError::MissingBaseline(baseline));
        }

        let dir = allocator.allocate(label)?;
        let root = dir.path().join("app");
        let id = format!("eval-sandbox-{}", Uuid::new_v4());

        info!("Setting up sandbox {} at {}", id, root.display());

        let (src, dst) = (baseline.clone(), root.clone());
        let copied = tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst))
            .await
            .map_err(|e| SandboxError::Copy(format!("copy task failed: {}", e)))??;
        debug!("Copied {} files into sandbox {}", copied, id);

        let sandbox = Self {
            id,
            dir,
            root,
            baseline,
        };

        if !config.install_command.is_empty() {
            let out = run_argv(&config.install_command, &sandbox.root, config.install_timeout).await;
            if out.success() {
                debug!("Dependencies installed in sandbox {}", sandbox.id);
            } else {
                warn!(
                    sandbox = %sandbox.id,
                    exit_code = out.exit_code,
                    "Dependency install failed (continuing): {}",
                    super::result::truncate(out.stderr.trim(), 500)
                );
            }
        }

        Ok(sandbox)
    }

    /// Root of the private copy, handed to the agent.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Baseline the copy was made from.
    pub fn baseline(&self) -> &Path {
        &self.baseline
    }

    /// Removes the sandbox directory.
    pub async fn teardown(self) -> Result<(), SandboxError> {
        info!("Cleaning up sandbox {}", self.id);
        let dir = self.dir;
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| SandboxError::Cleanup(format!("cleanup task failed: {}", e)))?
    }
}

/// Relative paths of files in `root` that are new or differ from `baseline`,
/// sorted.
pub fn changed_files(root: &Path, baseline: &Path) -> Vec<String> {
    let before = hash_tree(baseline);
    let mut changed: Vec<String> = hash_tree(root)
        .into_iter()
        .filter(|(rel, digest)| before.get(rel) != Some(digest))
        .map(|(rel, _)| rel)
        .collect();
    changed.sort();
    changed
}

fn hash_tree(dir: &Path) -> HashMap<String, String> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?;
            let bytes = fs::read(e.path()).ok()?;
            Some((
                rel.to_string_lossy().replace('\\', "/"),
                hex::encode(Sha256::digest(&bytes)),
            ))
        })
        .collect()
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Recursively copies a directory, returning the number of files copied.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64, SandboxError> {
    fs::create_dir_all(dst)?;
    let mut files = 0u64;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| SandboxError::Copy(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SandboxError::Copy(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }

    Ok(files)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn baseline() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("tests/test_main.py"), "def test(): pass\n").unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("__pycache__/main.pyc"), "bytecode").unwrap();
        dir
    }

    fn config(baseline: &Path) -> RunConfig {
        RunConfig::new(baseline).with_install_command(Vec::new())
    }

    #[tokio::test]
    async fn test_provision_copies_baseline_and_teardown_removes_it() {
        let base = baseline();
        let root = TempDir::new().unwrap();
        let allocator = FixedRootAllocator::new(root.path());

        let sandbox = Sandbox::provision(&allocator, "task/1", base.path(), &config(base.path()))
            .await
            .unwrap();
        assert!(sandbox.root().join("main.py").is_file());
        assert!(sandbox.root().join("tests/test_main.py").is_file());
        assert!(sandbox.root().starts_with(root.path()));

        let dir = sandbox.root().parent().unwrap().to_path_buf();
        sandbox.teardown().await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_dropped_sandbox_is_removed() {
        let base = baseline();
        let root = TempDir::new().unwrap();
        let allocator = FixedRootAllocator::new(root.path());

        let sandbox = Sandbox::provision(&allocator, "t", base.path(), &config(base.path()))
            .await
            .unwrap();
        let dir = sandbox.root().parent().unwrap().to_path_buf();
        drop(sandbox);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_sandboxes_are_isolated_from_each_other_and_baseline() {
        let base = baseline();
        let allocator = TempDirAllocator::new();
        let cfg = config(base.path());

        let a = Sandbox::provision(&allocator, "t", base.path(), &cfg).await.unwrap();
        let b = Sandbox::provision(&allocator, "t", base.path(), &cfg).await.unwrap();
        assert_ne!(a.root(), b.root());

        fs::write(a.root().join("main.py"), "print('changed')\n").unwrap();
        fs::write(a.root().join("new.txt"), "x").unwrap();

        assert_eq!(
            fs::read_to_string(b.root().join("main.py")).unwrap(),
            "print('hi')\n"
        );
        assert!(!b.root().join("new.txt").exists());
        assert!(!base.path().join("new.txt").exists());

        a.teardown().await.unwrap();
        b.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_baseline_fails() {
        let allocator = TempDirAllocator::new();
        let missing = Path::new("/definitely/not/here");
        let err = Sandbox::provision(&allocator, "t", missing, &config(missing))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::MissingBaseline(_)));
    }

    #[tokio::test]
    async fn test_failed_install_is_not_fatal() {
        let base = baseline();
        let cfg = RunConfig::new(base.path())
            .with_install_command(vec!["sh".into(), "-c".into(), "exit 7".into()])
            .with_install_timeout(Duration::from_secs(5));

        let sandbox = Sandbox::provision(&TempDirAllocator::new(), "t", base.path(), &cfg)
            .await
            .unwrap();
        assert!(sandbox.root().join("main.py").exists());
        sandbox.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_install_runs_inside_the_copy() {
        let base = baseline();
        let cfg = RunConfig::new(base.path())
            .with_install_command(vec!["sh".into(), "-c".into(), "touch installed.marker".into()]);

        let sandbox = Sandbox::provision(&TempDirAllocator::new(), "t", base.path(), &cfg)
            .await
            .unwrap();
        assert!(sandbox.root().join("installed.marker").exists());
        assert!(!base.path().join("installed.marker").exists());
        sandbox.teardown().await.unwrap();
    }

    #[test]
    fn test_changed_files_ignores_caches() {
        let base = baseline();
        let copy = TempDir::new().unwrap();
        copy_dir_recursive(base.path(), copy.path()).unwrap();

        assert!(changed_files(copy.path(), base.path()).is_empty());

        fs::write(copy.path().join("main.py"), "print('fixed')\n").unwrap();
        fs::write(copy.path().join("tests/test_new.py"), "def test(): pass\n").unwrap();
        fs::write(copy.path().join("__pycache__/other.pyc"), "bytecode").unwrap();

        assert_eq!(
            changed_files(copy.path(), base.path()),
            vec!["main.py".to_string(), "tests/test_new.py".to_string()]
        );
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("owner/task 1"), "owner-task-1");
    }
}

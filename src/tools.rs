//! Tools an agent uses inside its sandbox.
//!
//! Every path is resolved against the sandbox root. Paths that resolve outside
//! it, lexically or through a symlink, are rejected with
//! [`ToolError::PathEscape`] instead of being clamped.

use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::debug;

use crate::error::ToolError;
use crate::runner::run_shell;

/// Ceiling for a single `run_command` call.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Command, read and write tools scoped to one sandbox root.
#[derive(Debug, Clone)]
pub struct SandboxTools {
    root: PathBuf,
    command_timeout: Duration,
}

impl SandboxTools {
    /// Scopes tools to `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self {
            root,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        })
    }

    /// Sets the per-command ceiling.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` (relative to the root) to a location inside the root.
    ///
    /// Existing components are checked one at a time without following
    /// symlinks blindly: a link is accepted only when its target resolves
    /// inside the root. Dangling links cannot be checked and are rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let escape = || ToolError::PathEscape(path.to_string());

        let mut parts: Vec<&OsStr> = Vec::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(escape());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        let mut resolved = self.root.clone();
        for (i, part) in parts.iter().enumerate() {
            let candidate = resolved.join(part);
            match std::fs::symlink_metadata(&candidate) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let target = std::fs::canonicalize(&candidate).map_err(|_| escape())?;
                    if !target.starts_with(&self.root) {
                        return Err(escape());
                    }
                    resolved = target;
                }
                Ok(_) => resolved = candidate,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // Nothing below a missing component can be a link yet.
                    resolved = parts[i..].iter().fold(resolved, |acc, p| acc.join(p));
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(resolved)
    }

    /// Runs a shell command in the root or in `cwd` below it. The result is
    /// `exit_code=<n>` followed by non-empty `stdout:` / `stderr:` sections.
    pub async fn run_command(&self, cmd: &str, cwd: Option<&str>) -> Result<String, ToolError> {
        let dir = match cwd {
            Some(cwd) => self.resolve(cwd)?,
            None => self.root.clone(),
        };
        if !dir.is_dir() {
            return Err(ToolError::BadWorkingDir(dir.display().to_string()));
        }

        debug!("run_command in {}: {}", dir.display(), cmd);
        let out = run_shell(cmd, &dir, self.command_timeout).await;
        if out.timed_out {
            return Err(ToolError::Timeout(self.command_timeout));
        }

        let mut parts = vec![format!("exit_code={}", out.exit_code)];
        if !out.stdout.is_empty() {
            parts.push(format!("stdout:\n{}", out.stdout));
        }
        if !out.stderr.is_empty() {
            parts.push(format!("stderr:\n{}", out.stderr));
        }
        Ok(parts.join("\n"))
    }

    /// Reads a text file; invalid UTF-8 is replaced.
    pub async fn read_file(&self, path: &str) -> Result<String, ToolError> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(ToolError::IsDirectory(path.to_string()));
        }
        match fs::read(&full).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ToolError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a text file, creating parent directories as needed.
    pub async fn write_file(&self, path: &str, contents: &str) -> Result<String, ToolError> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(ToolError::IsDirectory(path.to_string()));
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, contents).await?;
        Ok(format!("Wrote {}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tools() -> (TempDir, SandboxTools) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        let tools = SandboxTools::new(dir.path()).unwrap();
        (dir, tools)
    }

    #[tokio::test]
    async fn test_read_and_write() {
        let (_dir, tools) = tools();
        assert_eq!(tools.read_file("main.py").await.unwrap(), "print('hi')\n");

        let msg = tools.write_file("pkg/deep/new.py", "x = 1\n").await.unwrap();
        assert_eq!(msg, "Wrote pkg/deep/new.py");
        assert_eq!(tools.read_file("./pkg/deep/new.py").await.unwrap(), "x = 1\n");
    }

    #[tokio::test]
    async fn test_read_errors() {
        let (_dir, tools) = tools();
        assert!(matches!(tools.read_file("nope.py").await, Err(ToolError::NotFound(_))));
        assert!(matches!(tools.read_file("pkg").await, Err(ToolError::IsDirectory(_))));
    }

    #[tokio::test]
    async fn test_escapes_are_rejected() {
        let (_dir, tools) = tools();
        for path in ["../outside.txt", "pkg/../../outside.txt", "/etc/passwd"] {
            assert!(
                matches!(tools.read_file(path).await, Err(ToolError::PathEscape(_))),
                "{} was not rejected",
                path
            );
            assert!(matches!(
                tools.write_file(path, "x").await,
                Err(ToolError::PathEscape(_))
            ));
        }
        assert!(matches!(
            tools.run_command("true", Some("..")).await,
            Err(ToolError::PathEscape(_))
        ));
        // Staying inside after a detour is fine.
        assert!(tools.resolve("pkg/../main.py").is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let (dir, tools) = tools();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(matches!(
            tools.read_file("link/secret.txt").await,
            Err(ToolError::PathEscape(_))
        ));
        assert!(matches!(
            tools.write_file("link/new.txt", "x").await,
            Err(ToolError::PathEscape(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_escape_is_rejected() {
        let (dir, tools) = tools();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("pwned.txt");
        std::os::unix::fs::symlink(&target, dir.path().join("link.txt")).unwrap();

        assert!(matches!(
            tools.write_file("link.txt", "escaped").await,
            Err(ToolError::PathEscape(_))
        ));
        assert!(matches!(
            tools.read_file("link.txt").await,
            Err(ToolError::PathEscape(_))
        ));
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_is_followed() {
        let (dir, tools) = tools();
        std::os::unix::fs::symlink(dir.path().join("pkg"), dir.path().join("alias")).unwrap();

        tools.write_file("alias/mod.py", "y = 2\n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("pkg/mod.py")).unwrap(),
            "y = 2\n"
        );
        assert_eq!(tools.read_file("alias/mod.py").await.unwrap(), "y = 2\n");
    }

    #[tokio::test]
    async fn test_run_command_output_format() {
        let (_dir, tools) = tools();
        let out = tools
            .run_command("ls; echo oops >&2; exit 4", None)
            .await
            .unwrap();
        assert!(out.starts_with("exit_code=4\n"));
        assert!(out.contains("stdout:\n"));
        assert!(out.contains("main.py"));
        assert!(out.contains("stderr:\noops"));

        let quiet = tools.run_command("true", Some("pkg")).await.unwrap();
        assert_eq!(quiet, "exit_code=0");
    }

    #[tokio::test]
    async fn test_run_command_bad_cwd_and_timeout() {
        let (_dir, tools) = tools();
        assert!(matches!(
            tools.run_command("true", Some("main.py")).await,
            Err(ToolError::BadWorkingDir(_))
        ));

        let tools = tools.with_command_timeout(Duration::from_millis(100));
        assert!(matches!(
            tools.run_command("sleep 5", None).await,
            Err(ToolError::Timeout(_))
        ));
    }
}

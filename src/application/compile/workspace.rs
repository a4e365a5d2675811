use std::{
    fs,
    future::Future,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::infra::error::InfraError;

const WORKSPACE_PREFIX: &str = "texpress-";

/// Handle to a request's private directory. Only valid inside [`with_workspace`].
#[derive(Debug, Clone)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }
}

/// Owns the directory; removing it on drop covers return, error, panic and cancellation alike.
struct WorkspaceGuard {
    dir: Option<TempDir>,
}

impl WorkspaceGuard {
    fn create(root: &Path) -> Result<Self, InfraError> {
        fs::create_dir_all(root).map_err(|err| {
            InfraError::workspace(format!(
                "failed to prepare workspace root {}: {err}",
                root.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)
            .map_err(|err| {
                InfraError::workspace(format!(
                    "failed to create workspace under {}: {err}",
                    root.display()
                ))
            })?;
        debug!(
            target = "application::compile::workspace",
            op = "workspace::create",
            path = %dir.path().display(),
            "Workspace created"
        );
        Ok(Self { dir: Some(dir) })
    }

    fn handle(&self) -> Workspace {
        Workspace {
            path: self
                .dir
                .as_ref()
                .map(|dir| dir.path().to_path_buf())
                .unwrap_or_default(),
        }
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(
                target = "application::compile::workspace",
                op = "workspace::release",
                path = %path.display(),
                "Workspace removed"
            ),
            Err(err) => warn!(
                target = "application::compile::workspace",
                op = "workspace::release",
                result = "cleanup_error",
                path = %path.display(),
                error = %err,
                "Failed to remove workspace"
            ),
        }
    }
}

/// Run `op` inside a fresh directory under `root`, removing the directory afterwards.
///
/// Cleanup failures are logged and never replace the operation's own result.
pub async fn with_workspace<F, Fut, T, E>(root: &Path, op: F) -> Result<T, E>
where
    F: FnOnce(Workspace) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<InfraError>,
{
    let guard = WorkspaceGuard::create(root)?;
    let result = op(guard.handle()).await;
    drop(guard);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn explode() -> Result<(), InfraError> {
        panic!("operation failed unexpectedly");
    }

    fn remember(slot: &Arc<Mutex<Option<PathBuf>>>, workspace: &Workspace) {
        *slot.lock().expect("slot lock") = Some(workspace.path().to_path_buf());
    }

    fn recorded(slot: &Arc<Mutex<Option<PathBuf>>>) -> PathBuf {
        slot.lock()
            .expect("slot lock")
            .clone()
            .expect("workspace path recorded")
    }

    #[tokio::test]
    async fn removes_directory_after_success() {
        let root = TempDir::new().expect("root");
        let slot = Arc::new(Mutex::new(None));

        let value: Result<u32, InfraError> = with_workspace(root.path(), |workspace| {
            let slot = slot.clone();
            async move {
                remember(&slot, &workspace);
                fs::write(workspace.join("input.tex"), "x").expect("write source");
                Ok::<_, InfraError>(7)
            }
        })
        .await;

        assert_eq!(value.expect("ok"), 7);
        assert!(!recorded(&slot).exists());
    }

    #[tokio::test]
    async fn removes_directory_after_error() {
        let root = TempDir::new().expect("root");
        let slot = Arc::new(Mutex::new(None));

        let result: Result<(), InfraError> = with_workspace(root.path(), |workspace| {
            let slot = slot.clone();
            async move {
                remember(&slot, &workspace);
                Err::<(), _>(InfraError::workspace("boom"))
            }
        })
        .await;

        assert!(result.is_err());
        assert!(!recorded(&slot).exists());
    }

    #[tokio::test]
    async fn removes_directory_when_cancelled() {
        let root = TempDir::new().expect("root");
        let slot = Arc::new(Mutex::new(None));

        let pending = with_workspace(root.path(), |workspace| {
            let slot = slot.clone();
            async move {
                remember(&slot, &workspace);
                std::future::pending::<Result<(), InfraError>>().await
            }
        });
        let outcome = tokio::time::timeout(Duration::from_millis(50), pending).await;

        assert!(outcome.is_err(), "operation should have been cancelled");
        assert!(!recorded(&slot).exists());
    }

    #[tokio::test]
    async fn removes_directory_when_operation_panics() {
        let root = TempDir::new().expect("root");
        let root_path = root.path().to_path_buf();
        let slot = Arc::new(Mutex::new(None));
        let task_slot = slot.clone();

        let joined = tokio::spawn(async move {
            let _: Result<(), InfraError> = with_workspace(&root_path, |workspace| async move {
                remember(&task_slot, &workspace);
                explode()
            })
            .await;
        })
        .await;

        assert!(joined.is_err());
        assert!(!recorded(&slot).exists());
    }

    #[tokio::test]
    async fn workspaces_are_distinct() {
        let root = TempDir::new().expect("root");
        let first: Result<PathBuf, InfraError> =
            with_workspace(root.path(), |ws| async move { Ok(ws.path().to_path_buf()) }).await;
        let second: Result<PathBuf, InfraError> =
            with_workspace(root.path(), |ws| async move { Ok(ws.path().to_path_buf()) }).await;
        let (first, second) = (first.expect("first"), second.expect("second"));
        assert_ne!(first, second);
        assert!(first.starts_with(root.path()));
        assert!(
            first
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(WORKSPACE_PREFIX))
        );
    }
}

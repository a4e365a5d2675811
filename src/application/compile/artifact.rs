use bytes::Bytes;
use tracing::debug;

use crate::domain::diagnostic::Diagnostic;

use super::types::Artifact;
use super::workspace::Workspace;

/// Locate and read `{workspace}/{basename}.pdf`.
///
/// A missing or zero-length file is an `ArtifactMissing` diagnostic regardless
/// of what the engine reported.
pub async fn resolve(workspace: &Workspace, basename: &str) -> Result<Artifact, Diagnostic> {
    let path = workspace.join(&format!("{basename}.pdf"));

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(Diagnostic::artifact_missing(format!(
                "engine finished without producing {basename}.pdf ({err})"
            )));
        }
    };

    if bytes.is_empty() {
        return Err(Diagnostic::artifact_missing(format!(
            "engine produced an empty {basename}.pdf"
        )));
    }

    let size = bytes.len() as u64;
    debug!(
        target = "application::compile::artifact",
        op = "artifact::resolve",
        path = %path.display(),
        size,
        "Artifact located"
    );

    Ok(Artifact {
        bytes: Bytes::from(bytes),
        size,
        path,
    })
}

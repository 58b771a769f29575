use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Deletes run-scoped temporary files. Failures are logged, never raised.
pub async fn remove_files(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        if remove_file(path).await {
            removed += 1;
        }
    }
    debug!(removed, requested = paths.len(), "temporary files cleaned up");
    removed
}

pub async fn remove_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to remove temporary file");
            false
        }
    }
}

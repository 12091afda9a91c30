//! Best-effort local persistence for fetched artifacts.
//!
//! Every successfully generated image can be written to a configured
//! directory under a timestamped filename so operators have a local
//! record of what the engine produced. Persistence is never on the
//! request's critical path: all failures are logged and swallowed.

use std::path::{Path, PathBuf};

/// Maximum number of label characters carried into a filename.
const LABEL_PREFIX_LEN: usize = 30;

/// Writes artifacts into a single directory with unique, timestamped
/// filenames.
#[derive(Debug, Clone)]
pub struct CreationsStore {
    dir: PathBuf,
}

impl CreationsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `bytes` under a fresh `<timestamp>_<label>.png` filename.
    ///
    /// Creates the directory on first use. Returns the path written, so
    /// callers can log it.
    pub async fn save(&self, label: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(unique_filename(label));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Like [`save`](Self::save), but logs a warning instead of
    /// returning the error. Used on the request path where persistence
    /// must never fail the request.
    pub async fn save_best_effort(&self, label: &str, bytes: &[u8]) {
        match self.save(label, bytes).await {
            Ok(path) => tracing::info!(path = %path.display(), "Saved artifact locally"),
            Err(e) => tracing::warn!(
                dir = %self.dir.display(),
                error = %e,
                "Could not save artifact locally",
            ),
        }
    }
}

/// Build a `<yyyymmdd_hhmmss_micros>_<sanitized label>.png` filename.
///
/// The microsecond component keeps concurrent requests from colliding.
fn unique_filename(label: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%6f");
    format!("{timestamp}_{}.png", sanitize_label(label))
}

/// Keep alphanumerics from the first [`LABEL_PREFIX_LEN`] characters of
/// the label; everything else becomes `_`.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .take(LABEL_PREFIX_LEN)
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

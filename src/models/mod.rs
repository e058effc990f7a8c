#[macro_use]
mod macros;

mod health;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use health::*;

#[derive(Clone)]
pub struct GlobalState {
    pub public_dir: Arc<PathBuf>,
    pub started_at: DateTime<Utc>,
}

impl GlobalState {
    pub fn new<P: AsRef<Path>>(public_dir: P) -> Self {
        Self {
            public_dir: Arc::new(public_dir.as_ref().to_path_buf()),
            started_at: Utc::now(),
        }
    }

    /// The service is healthy as long as it has a public directory to serve from.
    pub async fn health(&self) -> Health {
        let ok = tokio::fs::metadata(self.public_dir.as_path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        Health {
            ok,
            started_at: self.started_at,
        }
    }
}

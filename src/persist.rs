//! Lease persistence across restarts.
//!
//! Bound leases and declined addresses are written as pretty-printed JSON.
//! The file is read once at startup and written at shutdown (and on demand
//! from the CLI). Writes go to a sibling temporary file that is then renamed
//! over the target, so a crash mid-write leaves the previous file intact.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::lease::Lease;

/// On-disk contents of the lease file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSnapshot {
    pub leases: Vec<Lease>,
    #[serde(default)]
    pub declined: Vec<Ipv4Addr>,
}

#[derive(Debug)]
pub struct LeaseFile {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl LeaseFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file. A missing file yields an empty snapshot.
    pub async fn load(&self) -> Result<LeaseSnapshot> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(LeaseSnapshot::default());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let snapshot: LeaseSnapshot = serde_json::from_str(&content)?;
        Ok(snapshot)
    }

    pub async fn save(&self, snapshot: &LeaseSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)?;

        let _lock = self.save_lock.lock().await;
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

//! File system implementation for ledger snapshot export

use crate::error::AutopilotResult;
use crate::traits::FileSystem;
use async_trait::async_trait;
use std::path::PathBuf;

/// Writes snapshots under a base directory, creating it on first use
pub struct RealFileSystem {
    base_dir: PathBuf,
}

impl RealFileSystem {
    pub fn new() -> Self {
        Self::with_base_dir(PathBuf::from("./output"))
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for RealFileSystem {
    async fn write_file(&self, name: &str, contents: &[u8]) -> AutopilotResult<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.base_dir.join(name);
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

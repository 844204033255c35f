use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

const CELL_PREFIX: &str = "cache_cell_";
const TEMP_PREFIX: &str = "tmp_";

/// On-disk cells, one file per slot, plus scratch files used while a payload is written.
#[derive(Debug, Clone)]
pub(super) struct CellStore {
    dir: PathBuf,
}

impl CellStore {
    pub(super) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(super) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(super) fn cell_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("{CELL_PREFIX}{slot}"))
    }

    pub(super) fn temp_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{TEMP_PREFIX}{id}"))
    }

    /// Creates the directory, drops scratch files left by an earlier run and truncates every
    /// cell to empty.
    pub(super) fn prepare(&self, capacity: usize) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache directory {}", self.dir.display()))?;
        self.remove_temp_files()?;
        for slot in 1..=capacity {
            let path = self.cell_path(slot);
            create_options()
                .open(&path)
                .with_context(|| format!("failed to create cache cell {}", path.display()))?;
        }
        Ok(())
    }

    fn remove_temp_files(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| name.starts_with(TEMP_PREFIX))
            {
                fs::remove_file(&path).ok();
            }
        }
        Ok(())
    }

    pub(super) async fn write_temp(&self, id: u64, payload: &[u8]) -> Result<PathBuf> {
        let path = self.temp_path(id);
        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options
            .open(&path)
            .await
            .with_context(|| format!("failed to open cache scratch file {}", path.display()))?;
        let written = async {
            file.write_all(payload).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = written {
            let _ = async_fs::remove_file(&path).await;
            return Err(err)
                .with_context(|| format!("failed to write cache scratch file {}", path.display()));
        }
        Ok(path)
    }

    /// Atomically replaces the contents of `slot` with a finished scratch file.
    pub(super) fn install(&self, temp: &Path, slot: usize) -> Result<()> {
        let cell = self.cell_path(slot);
        fs::rename(temp, &cell)
            .with_context(|| format!("failed to install cache cell {}", cell.display()))
    }

    pub(super) fn open_cell(&self, slot: usize) -> Result<fs::File> {
        let cell = self.cell_path(slot);
        fs::File::open(&cell).with_context(|| format!("failed to open cache cell {}", cell.display()))
    }
}

fn create_options() -> fs::OpenOptions {
    let mut options = fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

use std::path::PathBuf;

use anyhow::Result;
use tempfile::TempDir;

pub struct TestDirs {
    _temp: TempDir,
    pub cache_dir: PathBuf,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let cache_dir = temp.path().join("cache_data");
        Ok(Self {
            _temp: temp,
            cache_dir,
        })
    }

    pub fn cell_path(&self, slot: usize) -> PathBuf {
        self.cache_dir.join(format!("cache_cell_{slot}"))
    }
}

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Where request bodies are spooled while a relay may still need to replay them.
///
/// `None` uses the platform temporary directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpoolConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl SpoolConfig {
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        if let Some(dir) = self.dir.as_mut()
            && dir.is_relative()
        {
            *dir = base_dir.join(&*dir);
        }
    }
}

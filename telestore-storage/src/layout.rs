// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk layout of a storage directory
//!
//! ```text
//! <storage_dir>/
//! ├── <file_key>.tsd     append-only record data, one per index leaf
//! └── <storage_id>.tsi   index snapshot written at finalization
//! ```

use std::path::{Path, PathBuf};
use telestore_core::{Result, StorageDescriptor};
use uuid::Uuid;

pub const DATA_FILE_EXTENSION: &str = "tsd";
pub const INDEX_FILE_EXTENSION: &str = "tsi";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn data_path(&self, file_key: u32) -> PathBuf {
        self.root
            .join(format!("{}.{}", file_key, DATA_FILE_EXTENSION))
    }

    /// Physical location of a descriptor's bytes
    pub fn channel_path(&self, descriptor: &StorageDescriptor) -> PathBuf {
        self.data_path(descriptor.file_key)
    }

    pub fn index_path(&self, storage_id: &Uuid) -> PathBuf {
        self.root
            .join(format!("{}.{}", storage_id, INDEX_FILE_EXTENSION))
    }

    /// Index snapshots in the directory, newest first
    pub fn index_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(INDEX_FILE_EXTENSION) {
                let modified = entry.metadata()?.modified()?;
                files.push((modified, path));
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = StorageLayout::new("/var/telestore/s1");
        let descriptor = StorageDescriptor::new(42, 0, 10);
        assert_eq!(
            layout.channel_path(&descriptor),
            PathBuf::from("/var/telestore/s1/42.tsd")
        );
        let id = Uuid::nil();
        assert!(layout
            .index_path(&id)
            .to_string_lossy()
            .ends_with("00000000-0000-0000-0000-000000000000.tsi"));
    }

    #[test]
    fn test_index_files_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::write(layout.data_path(1), b"x").unwrap();
        std::fs::write(layout.index_path(&Uuid::new_v4()), b"y").unwrap();

        let files = layout.index_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extension().unwrap(), "tsi");
    }
}

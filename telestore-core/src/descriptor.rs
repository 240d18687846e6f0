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

//! Storage descriptor - the durable pointer to persisted record bytes

use serde::{Deserialize, Serialize};

/// Location of a record's bytes: `(file_key, offset, length)`
///
/// A descriptor always denotes bytes in exactly one file. Descriptors are
/// immutable once committed to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageDescriptor {
    pub file_key: u32,
    pub offset: u64,
    pub length: u32,
}

impl StorageDescriptor {
    pub fn new(file_key: u32, offset: u64, length: u32) -> Self {
        Self {
            file_key,
            offset,
            length,
        }
    }

    /// First byte past this descriptor
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    pub fn overlaps(&self, other: &StorageDescriptor) -> bool {
        self.file_key == other.file_key && self.offset < other.end() && other.offset < self.end()
    }

    /// Split into `(offset, length)` regions of at most `max_len` bytes
    pub fn regions(&self, max_len: usize) -> Vec<(u64, usize)> {
        let max_len = max_len.max(1) as u64;
        let mut regions = Vec::new();
        let mut offset = self.offset;
        while offset < self.end() {
            let len = (self.end() - offset).min(max_len);
            regions.push((offset, len as usize));
            offset += len;
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap() {
        let a = StorageDescriptor::new(1, 0, 10);
        let b = StorageDescriptor::new(1, 10, 5);
        let c = StorageDescriptor::new(1, 9, 5);
        let d = StorageDescriptor::new(2, 0, 10);

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(!a.overlaps(&d));
    }

    #[test]
    fn test_regions_split() {
        let d = StorageDescriptor::new(3, 100, 25);
        assert_eq!(d.regions(10), vec![(100, 10), (110, 10), (120, 5)]);
        assert_eq!(d.regions(64), vec![(100, 25)]);
        assert!(StorageDescriptor::new(3, 0, 0).regions(8).is_empty());
    }
}

/*!
In-process remote store.
*/

use super::RemoteStore;
use crate::{Result, SatStoreError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Remote store that keeps uploaded objects in memory
///
/// Stands in for object storage in tests and dry runs. Clones share the same
/// object map.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of an uploaded object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().ok()?;
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    /// Sorted keys uploaded to `bucket`
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let Ok(objects) = self.objects.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn upload(&self, local_file: &Path, bucket: &str, key: &str) -> Result<()> {
        let data = std::fs::read(local_file).map_err(|e| {
            SatStoreError::upload(
                key,
                format!("failed to read {}: {}", local_file.display(), e),
                false,
            )
        })?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| SatStoreError::upload(key, "object map lock poisoned", false))?;
        objects.insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    fn scheme(&self) -> &'static str {
        "memory"
    }
}

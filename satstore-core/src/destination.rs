/*!
Destination handling: local placement, scratch targets and remote upload.

[`DestinationWriter`] owns the lifecycle of the file a format writer
produces. When the artifact is not kept locally the target is a scratch
file that is removed before `write` returns, whatever the outcome.
*/

use crate::config::SaveConfiguration;
use crate::storage::{ensure_parent_dir, RemoteStore, ScratchFile};
use crate::{Result, SatStoreError};
use satstore_retry::{retry_blocking, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

#[cfg(feature = "metrics")]
use crate::observability::SatStoreMetrics;

/// Where one artifact should end up
#[derive(Debug, Clone)]
pub struct DestinationRequest<'a> {
    /// Resolved local path (under the output root)
    pub local_path: &'a Path,
    pub save_to_local: bool,
    pub save_to_remote: bool,
    pub remote_bucket: Option<&'a str>,
    pub remote_base_path: &'a str,
    /// Root the remote key is made relative to
    pub output_root: Option<&'a Path>,
}

impl<'a> DestinationRequest<'a> {
    /// Request for `local_path` using the destinations of `config`
    pub fn from_config(config: &'a SaveConfiguration, local_path: &'a Path) -> Self {
        Self {
            local_path,
            save_to_local: config.save_to_local,
            save_to_remote: config.save_to_remote,
            remote_bucket: config.bucket(),
            remote_base_path: &config.remote_base_path,
            output_root: Some(&config.output_path),
        }
    }
}

/// Outcome of a destination write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub local_path: PathBuf,
    /// Object key, when the artifact was uploaded
    pub remote_key: Option<String>,
    /// A scratch file stood in for `local_path`
    pub temporary: bool,
}

/// Object key for `local_path` under `base_path`
///
/// The key is `local_path` relative to `output_root` when it lies under it,
/// and the bare file name otherwise. Separators are always `/`.
///
/// ```rust
/// use satstore_core::destination::remote_object_key;
/// use std::path::Path;
///
/// let key = remote_object_key(
///     "/archive/",
///     Path::new("/data/S2MPC/2024/tiff/a.tif"),
///     Some(Path::new("/data")),
/// );
/// assert_eq!(key, "archive/S2MPC/2024/tiff/a.tif");
/// ```
pub fn remote_object_key(base_path: &str, local_path: &Path, output_root: Option<&Path>) -> String {
    let relative = output_root
        .and_then(|root| local_path.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/")
        })
        .filter(|rel| !rel.is_empty())
        .or_else(|| {
            local_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    let base = base_path.trim_matches('/');
    if base.is_empty() {
        relative
    } else {
        format!("{base}/{relative}")
    }
}

/// Places serialized artifacts locally and/or in remote object storage
#[derive(Clone)]
pub struct DestinationWriter {
    remote: Option<Arc<dyn RemoteStore>>,
    retry: RetryPolicy,
    scratch_dir: Option<PathBuf>,
}

impl fmt::Debug for DestinationWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationWriter")
            .field("remote", &self.remote.as_ref().map(|r| r.scheme()))
            .field("retry", &self.retry)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl Default for DestinationWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationWriter {
    /// Writer without a remote store
    pub fn new() -> Self {
        Self {
            remote: None,
            retry: RetryPolicy::default(),
            scratch_dir: None,
        }
    }

    pub fn with_remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(store);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.scratch_dir = dir.map(Into::into);
        self
    }

    /// Run `write_fn` against the right target and deliver the result
    ///
    /// `write_fn` receives the path it must write to: `local_path` when the
    /// artifact is kept locally, a scratch file with the same extension
    /// otherwise. The scratch file is removed before this returns.
    ///
    /// # Errors
    /// * `SatStoreError::Configuration` - remote save requested without a store or bucket
    /// * whatever `write_fn` returns
    /// * `SatStoreError::Upload` - upload failed permanently or retries ran out
    pub fn write<T, F>(&self, request: &DestinationRequest<'_>, write_fn: F) -> Result<(DestinationRecord, T)>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let remote = if request.save_to_remote {
            Some(self.remote_target(request)?)
        } else {
            None
        };

        if request.save_to_local {
            ensure_parent_dir(request.local_path)?;
            let output = write_fn(request.local_path)?;
            let remote_key = match remote {
                Some((store, bucket)) => Some(self.upload(store, bucket, request, request.local_path)?),
                None => None,
            };
            let record = DestinationRecord {
                local_path: request.local_path.to_path_buf(),
                remote_key,
                temporary: false,
            };
            return Ok((record, output));
        }

        let extension = request.local_path.extension().and_then(|e| e.to_str());
        let scratch = ScratchFile::allocate(self.scratch_dir.as_deref(), extension)?;

        let outcome = write_fn(scratch.path()).and_then(|output| {
            let remote_key = match remote {
                Some((store, bucket)) => Some(self.upload(store, bucket, request, scratch.path())?),
                None => None,
            };
            Ok((remote_key, output))
        });

        scratch.close();

        let (remote_key, output) = outcome?;
        let record = DestinationRecord {
            local_path: request.local_path.to_path_buf(),
            remote_key,
            temporary: true,
        };
        Ok((record, output))
    }

    fn remote_target<'r>(&'r self, request: &DestinationRequest<'r>) -> Result<(&'r dyn RemoteStore, &'r str)> {
        let store = self.remote.as_deref().ok_or_else(|| {
            SatStoreError::configuration("save_to_remote is enabled but no remote store is configured")
        })?;
        let bucket = request
            .remote_bucket
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                SatStoreError::configuration("save_to_remote is enabled but no remote bucket is set")
            })?;
        Ok((store, bucket))
    }

    fn upload(
        &self,
        store: &dyn RemoteStore,
        bucket: &str,
        request: &DestinationRequest<'_>,
        source: &Path,
    ) -> Result<String> {
        let key = remote_object_key(request.remote_base_path, request.local_path, request.output_root);
        debug!(bucket = %bucket, key = %key, source = %source.display(), "Uploading artifact");

        let uploaded = retry_blocking("remote_upload", &self.retry, |_attempt| {
            #[cfg(feature = "metrics")]
            SatStoreMetrics::global().record_upload(_attempt);
            store.upload(source, bucket, &key)
        });

        match uploaded {
            Ok(()) => {
                info!(uri = %format!("{}://{}/{}", store.scheme(), bucket, key), "Uploaded artifact");
                Ok(key)
            }
            Err(e) => {
                #[cfg(feature = "metrics")]
                SatStoreMetrics::global().record_upload_error();
                error!(bucket = %bucket, key = %key, attempts = ?e.attempts(), error = %e, "Upload failed");
                Err(e.into_inner())
            }
        }
    }
}

/*!
Remote object storage capability and local filesystem helpers.

The pipeline never talks to a cloud SDK directly. Remote uploads go through
the [`RemoteStore`] port, which callers inject; without one, a remote save
fails with a configuration error instead of an ambient import failure.
*/

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use crate::Result;
use async_trait::async_trait;
use std::path::Path;

#[cfg(feature = "async-rt")]
use once_cell::sync::Lazy;
#[cfg(feature = "async-rt")]
use std::sync::Arc;
#[cfg(feature = "async-rt")]
use tokio::runtime::Runtime;

#[cfg(feature = "async-rt")]
static GLOBAL_RT: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(4))
        .enable_all()
        .build()
        .expect("Failed to create global async runtime")
});

/// Upload capability for remote object storage
///
/// Implementations must be safe to share between threads; the pipeline may
/// upload independent artifacts concurrently.
pub trait RemoteStore: Send + Sync {
    /// Upload the file at `local_file` to `bucket` under `key`
    ///
    /// An existing object under the same key is overwritten.
    ///
    /// # Errors
    /// `SatStoreError::Upload` with `transient` set when a retry may succeed
    fn upload(&self, local_file: &Path, bucket: &str, key: &str) -> Result<()>;

    /// Short backend name used in logs and URIs (e.g. "s3")
    fn scheme(&self) -> &'static str;
}

/// Async upload capability, adapted to [`RemoteStore`] by [`BlockingRemoteStore`]
#[async_trait]
pub trait AsyncRemoteStore: Send + Sync {
    async fn upload(&self, local_file: &Path, bucket: &str, key: &str) -> Result<()>;

    fn scheme(&self) -> &'static str;
}

/// Blocking wrapper for async remote stores
///
/// Runs uploads on a shared multi-threaded runtime so the synchronous
/// pipeline can drive an async SDK client.
#[cfg(feature = "async-rt")]
pub struct BlockingRemoteStore<A: AsyncRemoteStore> {
    inner: Arc<A>,
}

#[cfg(feature = "async-rt")]
impl<A: AsyncRemoteStore> BlockingRemoteStore<A> {
    pub fn new(store: A) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }
}

#[cfg(feature = "async-rt")]
impl<A: AsyncRemoteStore> RemoteStore for BlockingRemoteStore<A> {
    fn upload(&self, local_file: &Path, bucket: &str, key: &str) -> Result<()> {
        GLOBAL_RT.block_on(self.inner.upload(local_file, bucket, key))
    }

    fn scheme(&self) -> &'static str {
        self.inner.scheme()
    }
}

pub use local::{ensure_parent_dir, persist_atomically, ScratchFile};
pub use memory::MemoryRemoteStore;
#[cfg(feature = "s3")]
pub use s3::S3RemoteStore;

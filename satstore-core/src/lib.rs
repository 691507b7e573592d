/*!
# Satstore Core

Persistence pipeline for satellite raster acquisitions.

Given an in-memory multi-band raster for one acquisition moment, the
pipeline decides how bands are grouped, derives a deterministic file path,
serializes the result as a GeoTIFF and/or `.npy` array and delivers it to the
local filesystem and/or remote object storage:

- Band aliases resolved against per-provider band tables
- Default path layout or validated custom naming templates
- Raster and array writers with matching band order
- Local writes, remote uploads with bounded retry, scratch-file cleanup
- Per-write failure reporting instead of abort-on-first-error

## Architecture

Remote storage is a capability injected through the [`RemoteStore`] port;
the encoders and the filesystem helpers do not know about it. Encoding runs
entirely in memory and the target is replaced atomically, so a failed write
never leaves a partial file behind.

## Usage

```rust
use satstore_core::{Band, ImageArtifact, PersistencePipeline, ProviderCatalog, SaveConfiguration};
use ndarray::Array2;

let dir = tempfile::tempdir()?;
let config = SaveConfiguration::builder()
    .output_path(dir.path())
    .save_as_array(true)
    .merge_bands(false)
    .build()?;
let pipeline = PersistencePipeline::new(config, ProviderCatalog::builtin())?;

let artifact = ImageArtifact::new(
    vec![Band::new("red", Array2::zeros((8, 8))), Band::new("nir", Array2::ones((8, 8)))],
    "2024-06-02T10:15:00Z",
    "S2MPC",
    "planetary_computer",
)?
.with_identifier("copenhagen");

let report = pipeline.save(&artifact);
assert_eq!(report.success_count(), 4);
assert!(dir.path().join("S2MPC/2024/tiff/S2MPC_2024-06-02_B04_copenhagen.tif").exists());
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod artifact;
pub mod bands;
pub mod config;
pub mod destination;
pub mod error;
pub mod format;
pub mod naming;
pub mod observability;
pub mod pipeline;
pub mod storage;

#[cfg(test)]
mod error_tests;

pub use artifact::{Band, BandSelection, GeoTransform, ImageArtifact};
pub use bands::{BandResolver, ProviderCatalog, MERGED_BAND_LABEL};
pub use config::{RetrySettings, SaveConfiguration, SaveConfigurationBuilder};
pub use destination::{DestinationRecord, DestinationRequest, DestinationWriter};
pub use error::{ErrorKind, Result, SatStoreError};
pub use format::{ArrayWriter, FormatWriter, OutputFormat, RasterCompression, RasterWriter};
pub use naming::{NamingContext, NamingResolver, NamingTemplate, Resolution};
pub use observability::{init_default_observability, init_observability, LogFormat};
#[cfg(feature = "metrics")]
pub use observability::{MetricsTimer, SatStoreMetrics};
pub use pipeline::{BatchReport, CancellationToken, PersistencePipeline, SavedArtifact, WriteFailure};
pub use storage::{MemoryRemoteStore, RemoteStore};

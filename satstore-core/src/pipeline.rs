/*!
Persistence pipeline that turns acquisitions into stored artifacts.

For every requested format and every band grouping the pipeline resolves a
band label and a path, encodes the selection and hands the result to the
destination writer. Writes are independent: a failed one is recorded in the
[`BatchReport`] and the remaining writes still run.
*/

use crate::artifact::{BandSelection, ImageArtifact};
use crate::bands::{BandResolver, ProviderCatalog};
use crate::config::SaveConfiguration;
use crate::destination::{DestinationRecord, DestinationRequest, DestinationWriter};
use crate::error::ErrorKind;
use crate::format::{writers_for, FormatWriter, OutputFormat, RasterCompression, RasterMetadata};
use crate::naming::{NamingRequest, NamingResolver, Resolution};
use crate::storage::RemoteStore;
use crate::{Result, SatStoreError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

#[cfg(feature = "metrics")]
use crate::observability::{MetricsTimer, SatStoreMetrics};

/// Shared flag that stops a running batch between writes
///
/// Clones observe the same flag. A write already in progress completes,
/// including removal of its scratch file.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One artifact that reached every requested destination
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    /// `{satellite}/{datetime}/{bandLabel}.{ext}`
    pub key: String,
    pub format: OutputFormat,
    pub band_label: String,
    /// Path relative to the output root
    pub relative_path: PathBuf,
    pub record: DestinationRecord,
    pub bytes: u64,
    pub sha256: String,
}

/// An artifact that was not written because its datetime was unusable
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SkippedArtifact {
    pub key: String,
    pub reason: String,
}

/// One failed write
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub artifact_key: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of a pipeline run
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub written: Vec<SavedArtifact>,
    pub skipped: Vec<SkippedArtifact>,
    pub failures: Vec<WriteFailure>,
    /// The run stopped early because its cancellation token was tripped
    pub cancelled: bool,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.written.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// No write failed and the run was not cancelled
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Append `other`, keeping its entries after the existing ones
    pub fn merge(&mut self, other: BatchReport) {
        self.written.extend(other.written);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }

    fn record_failure(&mut self, artifact_key: String, err: &SatStoreError) {
        error!(artifact = %artifact_key, kind = %err.kind(), error = %err, "Failed to save artifact");
        self.failures.push(WriteFailure {
            artifact_key,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Orchestrates band resolution, naming, encoding and delivery
///
/// # Example
/// ```rust
/// use satstore_core::{Band, ImageArtifact, PersistencePipeline, ProviderCatalog, SaveConfiguration};
/// use ndarray::Array2;
///
/// let dir = tempfile::tempdir()?;
/// let config = SaveConfiguration::builder()
///     .output_path(dir.path())
///     .build()?;
/// let pipeline = PersistencePipeline::new(config, ProviderCatalog::builtin())?;
///
/// let artifact = ImageArtifact::new(
///     vec![Band::new("red", Array2::zeros((4, 4))), Band::new("nir", Array2::ones((4, 4)))],
///     "2024-06-02T10:15:00Z",
///     "S2MPC",
///     "planetary_computer",
/// )?;
/// let report = pipeline.save(&artifact);
/// assert_eq!(report.success_count(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct PersistencePipeline {
    config: SaveConfiguration,
    catalog: ProviderCatalog,
    naming: NamingResolver,
    writers: Vec<Box<dyn FormatWriter>>,
    destination: DestinationWriter,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for PersistencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistencePipeline")
            .field("config", &self.config)
            .field("formats", &self.formats())
            .field("destination", &self.destination)
            .finish()
    }
}

impl PersistencePipeline {
    /// Build a pipeline, validating the configuration and band tables
    ///
    /// # Errors
    /// * `SatStoreError::Configuration` - invalid configuration or reserved band label in the catalog
    /// * `SatStoreError::NamingTemplate` - malformed custom template
    pub fn new(config: SaveConfiguration, catalog: ProviderCatalog) -> Result<Self> {
        config.validate()?;
        catalog.validate()?;

        let naming = match config.naming_template()? {
            Some(template) => NamingResolver::with_template(template),
            None => NamingResolver::new(),
        };
        let writers = writers_for(
            config.save_as_raster,
            config.save_as_array,
            RasterCompression::from_flag(config.enable_compression),
        );
        let destination = DestinationWriter::new()
            .with_retry_policy(config.upload_retry.policy())
            .with_scratch_dir(config.scratch_dir.clone());

        Ok(Self {
            config,
            catalog,
            naming,
            writers,
            destination,
            cancellation: CancellationToken::new(),
        })
    }

    /// Inject the remote storage capability used when `save_to_remote` is set
    pub fn with_remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.destination = self.destination.with_remote_store(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &SaveConfiguration {
        &self.config
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Formats written for every artifact, in write order
    pub fn formats(&self) -> Vec<OutputFormat> {
        self.writers.iter().map(|w| w.format()).collect()
    }

    /// Persist one acquisition in every requested format
    pub fn save(&self, artifact: &ImageArtifact) -> BatchReport {
        let mut report = BatchReport::default();
        let resolver = BandResolver::new(&self.catalog);
        let satellite = artifact.satellite();

        let native_labels: Vec<String> = artifact
            .bands()
            .iter()
            .map(|band| resolver.resolve(&band.label, satellite, false))
            .collect();

        let groups: Vec<(String, BandSelection<'_>, Vec<String>)> = if self.config.merge_bands {
            vec![(
                resolver.resolve("", satellite, true),
                BandSelection::Merged(artifact.bands()),
                native_labels,
            )]
        } else {
            artifact
                .bands()
                .iter()
                .zip(native_labels)
                .map(|(band, label)| (label.clone(), BandSelection::Single(band), vec![label]))
                .collect()
        };

        for writer in &self.writers {
            for (band_label, selection, band_labels) in &groups {
                if self.cancellation.is_cancelled() {
                    info!(satellite = %satellite, datetime = %artifact.datetime(), "Save cancelled");
                    report.cancelled = true;
                    return report;
                }
                self.save_one(
                    artifact,
                    writer.as_ref(),
                    band_label,
                    *selection,
                    band_labels,
                    &mut report,
                );
            }
        }
        report
    }

    /// Persist a batch of acquisitions in parallel
    ///
    /// Distinct acquisitions resolve to distinct paths, so they are written
    /// concurrently. The merged report lists entries in input order.
    pub fn save_all(&self, artifacts: &[ImageArtifact]) -> BatchReport {
        let reports: Vec<BatchReport> = artifacts
            .par_iter()
            .map(|artifact| self.save(artifact))
            .collect();

        let mut combined = BatchReport::default();
        for report in reports {
            combined.merge(report);
        }
        info!(
            artifacts = artifacts.len(),
            written = combined.success_count(),
            skipped = combined.skipped.len(),
            failed = combined.failure_count(),
            cancelled = combined.cancelled,
            "Batch finished"
        );
        combined
    }

    fn save_one(
        &self,
        artifact: &ImageArtifact,
        writer: &dyn FormatWriter,
        band_label: &str,
        selection: BandSelection<'_>,
        band_labels: &[String],
        report: &mut BatchReport,
    ) {
        let format = writer.format();
        let key = artifact_key(artifact, band_label, format);

        let request = NamingRequest {
            datetime: artifact.datetime(),
            band_label,
            identifier: artifact.identifier(),
            satellite: artifact.satellite(),
            provider: artifact.provider(),
            format,
            identifier_type: &self.config.identifier_type,
            extra: &self.config.extra_naming_fields,
        };

        let relative_path = match self.naming.resolve(&request) {
            Ok(Resolution::Resolved(path)) => path,
            Ok(Resolution::Skip { reason }) => {
                info!(artifact = %key, reason = %reason, "Skipping artifact");
                #[cfg(feature = "metrics")]
                SatStoreMetrics::global().record_skipped();
                report.skipped.push(SkippedArtifact { key, reason });
                return;
            }
            Err(e) => {
                report.record_failure(key, &e);
                return;
            }
        };

        let metadata = RasterMetadata {
            nodata: self
                .catalog
                .nodata(artifact.satellite())
                .or_else(|| artifact.nodata()),
            transform: artifact.transform().copied(),
            epsg: artifact.epsg(),
            band_labels: band_labels.to_vec(),
        };

        let local_path = self.config.output_path.join(&relative_path);
        let destination = DestinationRequest::from_config(&self.config, &local_path);

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start();

        match self
            .destination
            .write(&destination, |target| writer.write(selection, &metadata, target))
        {
            Ok((record, written)) => {
                #[cfg(feature = "metrics")]
                timer.finish(written.bytes);
                debug!(
                    artifact = %key,
                    path = %relative_path.display(),
                    bytes = written.bytes,
                    "Saved artifact"
                );
                report.written.push(SavedArtifact {
                    key,
                    format,
                    band_label: band_label.to_string(),
                    relative_path,
                    record,
                    bytes: written.bytes,
                    sha256: written.sha256,
                });
            }
            Err(e) => {
                #[cfg(feature = "metrics")]
                timer.finish_with_error();
                report.record_failure(key, &e);
            }
        }
    }
}

/// Reporting key for one artifact write
fn artifact_key(artifact: &ImageArtifact, band_label: &str, format: OutputFormat) -> String {
    format!(
        "{}/{}/{}.{}",
        artifact.satellite(),
        artifact.datetime(),
        band_label,
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Band;
    use crate::bands::MERGED_BAND_LABEL;
    use crate::storage::MemoryRemoteStore;
    use ndarray::Array2;
    use std::path::Path;
    use tempfile::TempDir;

    fn artifact(datetime: &str) -> ImageArtifact {
        ImageArtifact::new(
            vec![
                Band::new("red", Array2::from_elem((3, 4), 1.0)),
                Band::new("green", Array2::from_elem((3, 4), 2.0)),
                Band::new("blue", Array2::from_elem((3, 4), 3.0)),
            ],
            datetime,
            "S2MPC",
            "planetary_computer",
        )
        .unwrap()
    }

    fn config(root: &Path) -> crate::config::SaveConfigurationBuilder {
        SaveConfiguration::builder().output_path(root)
    }

    #[test]
    fn test_merged_save_writes_one_artifact_per_format() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = PersistencePipeline::new(
            config(temp_dir.path()).save_as_array(true).build().unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap();

        let report = pipeline.save(&artifact("2024-06-02T10:15:00Z"));

        assert!(report.is_complete());
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.written[0].format, OutputFormat::Raster);
        assert_eq!(report.written[1].format, OutputFormat::Array);
        for saved in &report.written {
            assert_eq!(saved.band_label, MERGED_BAND_LABEL);
            assert!(temp_dir.path().join(&saved.relative_path).exists());
        }
        assert_eq!(report.written[0].key, "S2MPC/2024-06-02T10:15:00Z/merged.tif");
        assert_eq!(
            report.written[0].relative_path,
            PathBuf::from("S2MPC/2024/tiff/S2MPC_2024-06-02_merged.tif")
        );
    }

    #[test]
    fn test_separate_bands_use_native_labels() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = PersistencePipeline::new(
            config(temp_dir.path()).merge_bands(false).build().unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap();

        let report = pipeline.save(&artifact("2024-06-02T10:15:00Z"));

        let labels: Vec<&str> = report.written.iter().map(|s| s.band_label.as_str()).collect();
        assert_eq!(labels, vec!["B04", "B03", "B02"]);
    }

    #[test]
    fn test_nan_datetime_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = PersistencePipeline::new(
            config(temp_dir.path()).merge_bands(false).build().unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap();

        let report = pipeline.save(&artifact("NaN"));

        assert!(report.written.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(std::fs::read_dir(temp_dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_missing_remote_store_is_reported_per_write() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = PersistencePipeline::new(
            config(temp_dir.path())
                .save_to_remote(true)
                .remote_bucket("imagery")
                .save_as_array(true)
                .build()
                .unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap();

        let report = pipeline.save(&artifact("2024-06-02"));

        assert_eq!(report.failure_count(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.kind == ErrorKind::Configuration));
    }

    #[test]
    fn test_remote_keys_follow_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryRemoteStore::new();
        let pipeline = PersistencePipeline::new(
            config(temp_dir.path())
                .save_to_remote(true)
                .remote_bucket("imagery")
                .remote_base_path("/exports/")
                .build()
                .unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap()
        .with_remote_store(Arc::new(store.clone()));

        let report = pipeline.save(&artifact("2024-06-02T10:15:00Z").with_identifier("field_7"));

        assert!(report.is_complete());
        assert_eq!(
            store.keys("imagery"),
            vec!["exports/S2MPC/2024/tiff/S2MPC_2024-06-02_merged_field_7.tif"]
        );
    }

    #[test]
    fn test_identifier_cannot_escape_output_root() {
        let root = TempDir::new().unwrap();
        let output = root.path().join("out");
        let pipeline = PersistencePipeline::new(
            config(&output).save_as_array(true).build().unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap();

        let report = pipeline.save(&artifact("2024-06-02").with_identifier("x/../../../escaped"));

        assert!(report.written.is_empty());
        assert_eq!(report.failure_count(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.kind == ErrorKind::NamingTemplate));
        assert!(std::fs::read_dir(root.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_non_ascii_band_label_writes_both_formats() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = PersistencePipeline::new(
            config(temp_dir.path())
                .merge_bands(false)
                .save_as_array(true)
                .build()
                .unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap();
        let artifact = ImageArtifact::new(
            vec![Band::new("röd", Array2::from_elem((3, 4), 1.0))],
            "2024-06-02",
            "S2MPC",
            "planetary_computer",
        )
        .unwrap();

        let report = pipeline.save(&artifact);

        assert!(report.is_complete(), "{:?}", report.failures);
        assert_eq!(report.success_count(), 2);
        assert!(temp_dir.path().join("S2MPC/2024/tiff/S2MPC_2024-06-02_röd.tif").exists());
    }

    #[test]
    fn test_cancelled_token_stops_before_first_write() {
        let temp_dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = PersistencePipeline::new(
            config(temp_dir.path()).build().unwrap(),
            ProviderCatalog::builtin(),
        )
        .unwrap()
        .with_cancellation(token);

        let report = pipeline.save(&artifact("2024-06-02"));

        assert!(report.cancelled);
        assert!(report.written.is_empty());
        assert!(!report.is_complete());
    }

    #[test]
    fn test_report_merge_keeps_order() {
        let mut first = BatchReport::default();
        first.skipped.push(SkippedArtifact {
            key: "a".into(),
            reason: "nan".into(),
        });
        let mut second = BatchReport::default();
        second.skipped.push(SkippedArtifact {
            key: "b".into(),
            reason: "nan".into(),
        });
        second.cancelled = true;

        first.merge(second);
        let keys: Vec<&str> = first.skipped.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(first.cancelled);
    }
}

/*!
Serialization of band selections into output artifacts.

Two writers exist: [`RasterWriter`] produces a GeoTIFF, [`ArrayWriter`]
produces a raw `.npy` array dump. Both emit bands in the same order so the
two outputs of one acquisition line up band for band.
*/

use crate::artifact::{BandSelection, GeoTransform};
use crate::storage::local::persist_atomically;
use crate::{Result, SatStoreError};
use ndarray_npy::WriteNpyExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Seek, Write};
use std::path::Path;
use tiff::encoder::compression::{Compression, Deflate, Uncompressed};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tracing::debug;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

/// Output formats a pipeline can request
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// GeoTIFF raster
    Raster,
    /// Raw `.npy` array dump
    Array,
}

impl OutputFormat {
    /// Directory name used by the default naming layout
    pub fn directory(&self) -> &'static str {
        match self {
            OutputFormat::Raster => "tiff",
            OutputFormat::Array => "npy",
        }
    }

    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Raster => "tif",
            OutputFormat::Array => "npy",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.directory())
    }
}

/// Compression applied to raster output
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterCompression {
    None,
    /// Lossless DEFLATE
    Deflate,
}

impl RasterCompression {
    pub fn from_flag(enable_compression: bool) -> Self {
        if enable_compression {
            RasterCompression::Deflate
        } else {
            RasterCompression::None
        }
    }
}

/// Metadata stamped onto an artifact besides its pixels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterMetadata {
    pub nodata: Option<f64>,
    pub transform: Option<GeoTransform>,
    pub epsg: Option<u16>,
    /// Native label of each selected band, in output order
    pub band_labels: Vec<String>,
}

/// Result of a completed write
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    /// Size of the serialized payload in bytes
    pub bytes: u64,
    /// Hex SHA-256 of the serialized payload
    pub sha256: String,
}

/// Serialization strategy for one output format
///
/// Implementations only encode; [`FormatWriter::write`] handles hashing and
/// puts the bytes at the target in one atomic step, so a failed write never
/// leaves a partial file behind.
pub trait FormatWriter: Send + Sync {
    /// The format this writer produces
    fn format(&self) -> OutputFormat;

    /// Encode the selected bands into an in-memory payload
    fn encode(&self, selection: BandSelection<'_>, metadata: &RasterMetadata) -> Result<Vec<u8>>;

    /// Encode and persist to `target`
    fn write(
        &self,
        selection: BandSelection<'_>,
        metadata: &RasterMetadata,
        target: &Path,
    ) -> Result<WrittenArtifact> {
        let payload = self.encode(selection, metadata)?;
        let sha256 = format!("{:x}", Sha256::digest(&payload));

        persist_atomically(target, &payload)?;

        debug!(
            format = %self.format(),
            target = %target.display(),
            bytes = payload.len(),
            "Wrote artifact"
        );
        Ok(WrittenArtifact {
            bytes: payload.len() as u64,
            sha256,
        })
    }
}

/// GeoTIFF writer
///
/// Each band becomes one image directory holding 32-bit float samples,
/// in selection order, carrying the georeferencing tags, the GDAL no-data
/// tag and the native band label as its image description.
#[derive(Debug, Clone)]
pub struct RasterWriter {
    compression: RasterCompression,
}

impl RasterWriter {
    pub fn new(compression: RasterCompression) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> RasterCompression {
        self.compression
    }

    fn encode_pages<W, D>(
        encoder: &mut TiffEncoder<W>,
        selection: BandSelection<'_>,
        metadata: &RasterMetadata,
    ) -> tiff::TiffResult<()>
    where
        W: Write + Seek,
        D: Compression + Default,
    {
        for (index, band) in selection.views().into_iter().enumerate() {
            let (height, width) = band.dim();
            let samples: Vec<f32> = band.iter().copied().collect();

            let mut image = encoder.new_image_with_compression::<colortype::Gray32Float, D>(
                width as u32,
                height as u32,
                D::default(),
            )?;

            let directory = image.encoder();
            if let Some(label) = metadata.band_labels.get(index) {
                let description = ascii_description(label);
                directory.write_tag(Tag::ImageDescription, description.as_str())?;
            }
            if let Some(transform) = &metadata.transform {
                let scale = [transform.pixel_width, transform.pixel_height, 0.0];
                let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
                directory.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
                directory.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), &tiepoint[..])?;
            }
            if let Some(epsg) = metadata.epsg {
                let keys = geo_key_directory(epsg);
                directory.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &keys[..])?;
            }
            if let Some(nodata) = metadata.nodata {
                let text = format_nodata(nodata);
                directory.write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_str())?;
            }

            image.write_data(&samples)?;
        }
        Ok(())
    }
}

impl FormatWriter for RasterWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Raster
    }

    fn encode(&self, selection: BandSelection<'_>, metadata: &RasterMetadata) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut buffer)
            .map_err(|e| SatStoreError::write(format!("failed to start TIFF encoder: {e}")))?;

        let encoded = match self.compression {
            RasterCompression::Deflate => {
                Self::encode_pages::<_, Deflate>(&mut encoder, selection, metadata)
            }
            RasterCompression::None => {
                Self::encode_pages::<_, Uncompressed>(&mut encoder, selection, metadata)
            }
        };
        encoded.map_err(|e| SatStoreError::write(format!("failed to encode GeoTIFF: {e}")))?;
        drop(encoder);

        Ok(buffer.into_inner())
    }
}

/// GeoKeyDirectory entries for an EPSG code
fn geo_key_directory(epsg: u16) -> Vec<u16> {
    let geographic = (4000..5000).contains(&epsg);
    let (model_type, cs_key) = if geographic {
        (2, KEY_GEOGRAPHIC_TYPE)
    } else {
        (1, KEY_PROJECTED_CS_TYPE)
    };

    // header: version 1, revision 1.0, three keys; each key: id, location, count, value
    vec![
        1, 1, 0, 3,
        KEY_MODEL_TYPE, 0, 1, model_type,
        KEY_RASTER_TYPE, 0, 1, 1,
        cs_key, 0, 1, epsg,
    ]
}

/// TIFF ASCII fields only hold 7-bit text without NUL; other characters
/// are written as `\u{..}` escapes
fn ascii_description(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii() && c != '\0' {
                c.to_string()
            } else {
                c.escape_unicode().to_string()
            }
        })
        .collect()
}

fn format_nodata(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else {
        nodata.to_string()
    }
}

/// Raw array writer
///
/// Writes `(bands, height, width)` for a merged selection and
/// `(height, width)` for a single band. No spatial metadata is stored.
#[derive(Debug, Clone, Default)]
pub struct ArrayWriter;

impl ArrayWriter {
    pub fn new() -> Self {
        Self
    }
}

impl FormatWriter for ArrayWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Array
    }

    fn encode(&self, selection: BandSelection<'_>, _metadata: &RasterMetadata) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let written = match selection {
            BandSelection::Merged(_) => selection.stacked()?.write_npy(&mut buffer),
            BandSelection::Single(band) => band.data.write_npy(&mut buffer),
        };
        written.map_err(|e| SatStoreError::write(format!("failed to encode array: {e}")))?;
        Ok(buffer)
    }
}

/// Writers for the formats enabled in a configuration, raster first
pub fn writers_for(
    save_as_raster: bool,
    save_as_array: bool,
    compression: RasterCompression,
) -> Vec<Box<dyn FormatWriter>> {
    let mut writers: Vec<Box<dyn FormatWriter>> = Vec::new();
    if save_as_raster {
        writers.push(Box::new(RasterWriter::new(compression)));
    }
    if save_as_array {
        writers.push(Box::new(ArrayWriter::new()));
    }
    writers
}

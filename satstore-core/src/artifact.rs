/*!
In-memory raster acquisitions handed to the persistence pipeline.
*/

use crate::{Result, SatStoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// One spectral channel of an acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    /// Caller-facing band alias (e.g. "red", "nir")
    pub label: String,

    /// Pixel grid in row-major (height, width) order
    pub data: Array2<f32>,
}

impl Band {
    pub fn new<S: Into<String>>(label: S, data: Array2<f32>) -> Self {
        Self {
            label: label.into(),
            data,
        }
    }

    /// (height, width)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Affine placement of the pixel grid in its coordinate reference system
///
/// `pixel_height` is the (positive) ground size of one row; rows run
/// north to south from `origin_y`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

/// A multi-band raster for a single acquisition moment
///
/// Bands are kept in the order they were requested; every band shares one
/// `(height, width)` shape.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    bands: Vec<Band>,
    datetime: String,
    satellite: String,
    provider: String,
    identifier: Option<String>,
    nodata: Option<f64>,
    transform: Option<GeoTransform>,
    epsg: Option<u16>,
}

impl ImageArtifact {
    /// Create an artifact from its bands and acquisition datetime
    ///
    /// `datetime` is taken as delivered by the catalog and may be the
    /// sentinel `"nan"`; such artifacts are skipped at save time.
    ///
    /// # Errors
    /// * `SatStoreError::Validation` - no bands, or bands of different shapes
    ///
    /// # Example
    /// ```rust
    /// use ndarray::Array2;
    /// use satstore_core::{Band, ImageArtifact};
    ///
    /// let artifact = ImageArtifact::new(
    ///     vec![Band::new("red", Array2::zeros((4, 4)))],
    ///     "2024-06-02T10:30:31Z",
    ///     "S2MPC",
    ///     "MPC",
    /// )?;
    /// assert_eq!(artifact.band_count(), 1);
    /// # Ok::<(), satstore_core::SatStoreError>(())
    /// ```
    pub fn new<D, S, P>(bands: Vec<Band>, datetime: D, satellite: S, provider: P) -> Result<Self>
    where
        D: Into<String>,
        S: Into<String>,
        P: Into<String>,
    {
        let first = bands
            .first()
            .ok_or_else(|| SatStoreError::validation("artifact must contain at least one band"))?
            .shape();

        if let Some(odd) = bands.iter().find(|b| b.shape() != first) {
            return Err(SatStoreError::validation(format!(
                "band '{}' has shape {:?}, expected {:?}",
                odd.label,
                odd.shape(),
                first
            )));
        }

        let satellite = satellite.into();
        if satellite.trim().is_empty() {
            return Err(SatStoreError::validation("satellite identifier is empty"));
        }

        Ok(Self {
            bands,
            datetime: datetime.into(),
            satellite,
            provider: provider.into(),
            identifier: None,
            nodata: None,
            transform: None,
            epsg: None,
        })
    }

    /// Create an artifact stamped with a parsed acquisition time
    pub fn acquired_at<S, P>(
        bands: Vec<Band>,
        acquired: DateTime<Utc>,
        satellite: S,
        provider: P,
    ) -> Result<Self>
    where
        S: Into<String>,
        P: Into<String>,
    {
        let datetime = acquired.to_rfc3339_opts(SecondsFormat::Secs, true);
        Self::new(bands, datetime, satellite, provider)
    }

    /// Set the area name, field id or tile id used to disambiguate file names
    pub fn with_identifier<S: Into<String>>(mut self, identifier: S) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_georeference(mut self, transform: GeoTransform, epsg: Option<u16>) -> Self {
        self.transform = Some(transform);
        self.epsg = epsg;
        self
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn datetime(&self) -> &str {
        &self.datetime
    }

    pub fn satellite(&self) -> &str {
        &self.satellite
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn transform(&self) -> Option<&GeoTransform> {
        self.transform.as_ref()
    }

    pub fn epsg(&self) -> Option<u16> {
        self.epsg
    }

    /// (height, width) shared by every band
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].shape()
    }
}

/// The bands one output artifact is built from
#[derive(Debug, Clone, Copy)]
pub enum BandSelection<'a> {
    /// Whole band stack, original order
    Merged(&'a [Band]),
    /// Exactly one band
    Single(&'a Band),
}

impl<'a> BandSelection<'a> {
    pub fn band_count(&self) -> usize {
        match self {
            BandSelection::Merged(bands) => bands.len(),
            BandSelection::Single(_) => 1,
        }
    }

    /// Selected bands in output order
    pub fn views(&self) -> Vec<ArrayView2<'a, f32>> {
        match self {
            BandSelection::Merged(bands) => bands.iter().map(|b| b.data.view()).collect(),
            BandSelection::Single(band) => vec![band.data.view()],
        }
    }

    /// Stack the selection along a leading band axis
    pub fn stacked(&self) -> Result<Array3<f32>> {
        ndarray::stack(Axis(0), &self.views())
            .map_err(|e| SatStoreError::write(format!("failed to stack bands: {e}")))
    }
}

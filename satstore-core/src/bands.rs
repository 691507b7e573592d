/*!
Provider band tables and band label resolution.
*/

use crate::{Result, SatStoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label used for an artifact holding the whole band stack
pub const MERGED_BAND_LABEL: &str = "merged";

/// Per-satellite provider knowledge: band alias tables and no-data values
///
/// No table may mention [`MERGED_BAND_LABEL`], so a merged artifact can
/// never collide with a single-band one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProviderCatalog {
    /// satellite -> (alias -> native band name)
    #[serde(default)]
    band_names: HashMap<String, HashMap<String, String>>,

    /// satellite -> no-data value stamped onto raster output
    #[serde(default)]
    nodata: HashMap<String, f64>,
}

impl ProviderCatalog {
    /// Catalog with no entries; every band alias passes through unchanged
    pub fn empty() -> Self {
        Self {
            band_names: HashMap::new(),
            nodata: HashMap::new(),
        }
    }

    /// Catalog with the built-in tables for the supported collections
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();

        let sentinel2_mpc = [
            ("coastal", "B01"),
            ("blue", "B02"),
            ("green", "B03"),
            ("red", "B04"),
            ("rededge1", "B05"),
            ("rededge2", "B06"),
            ("rededge3", "B07"),
            ("nir", "B08"),
            ("nir08", "B8A"),
            ("watervapor", "B09"),
            ("swir16", "B11"),
            ("swir22", "B12"),
            ("scl", "SCL"),
        ];
        // Earth Search publishes assets under common names
        let sentinel2_e84 = [
            ("coastal", "coastal"),
            ("blue", "blue"),
            ("green", "green"),
            ("red", "red"),
            ("rededge1", "rededge1"),
            ("rededge2", "rededge2"),
            ("rededge3", "rededge3"),
            ("nir", "nir"),
            ("nir08", "nir08"),
            ("swir16", "swir16"),
            ("swir22", "swir22"),
            ("scl", "scl"),
        ];
        let landsat_mpc = [
            ("coastal", "coastal"),
            ("blue", "blue"),
            ("green", "green"),
            ("red", "red"),
            ("nir", "nir08"),
            ("swir16", "swir16"),
            ("swir22", "swir22"),
            ("thermal", "lwir11"),
            ("qa", "qa_pixel"),
        ];
        let sentinel1_mpc = [("vv", "vv"), ("vh", "vh")];

        catalog.insert_table("S2MPC", &sentinel2_mpc);
        catalog.insert_table("S2E84", &sentinel2_e84);
        catalog.insert_table("LANDSATMPC", &landsat_mpc);
        catalog.insert_table("S1MPC", &sentinel1_mpc);

        catalog.nodata.insert("S2MPC".to_string(), 0.0);
        catalog.nodata.insert("S2E84".to_string(), 0.0);
        catalog.nodata.insert("LANDSATMPC".to_string(), 0.0);

        catalog
    }

    /// Parse a catalog from JSON and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: ProviderCatalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Add or replace one alias mapping
    ///
    /// # Errors
    /// * `SatStoreError::Configuration` - alias or native name is the reserved merged label
    pub fn with_band<S, A, N>(mut self, satellite: S, alias: A, native: N) -> Result<Self>
    where
        S: Into<String>,
        A: Into<String>,
        N: Into<String>,
    {
        let (alias, native) = (alias.into(), native.into());
        check_not_reserved(&alias)?;
        check_not_reserved(&native)?;
        self.band_names
            .entry(satellite.into())
            .or_default()
            .insert(alias, native);
        Ok(self)
    }

    pub fn with_nodata<S: Into<String>>(mut self, satellite: S, nodata: f64) -> Self {
        self.nodata.insert(satellite.into(), nodata);
        self
    }

    /// Native name for `alias` on `satellite`, if the table has one
    pub fn native_band(&self, satellite: &str, alias: &str) -> Option<&str> {
        self.band_names
            .get(satellite)
            .and_then(|table| table.get(alias))
            .map(String::as_str)
    }

    /// No-data value configured for `satellite`
    pub fn nodata(&self, satellite: &str) -> Option<f64> {
        self.nodata.get(satellite).copied()
    }

    /// Reject tables that use the reserved merged label
    pub fn validate(&self) -> Result<()> {
        for table in self.band_names.values() {
            for (alias, native) in table {
                check_not_reserved(alias)?;
                check_not_reserved(native)?;
            }
        }
        Ok(())
    }

    fn insert_table(&mut self, satellite: &str, entries: &[(&str, &str)]) {
        let table = entries
            .iter()
            .map(|(alias, native)| (alias.to_string(), native.to_string()))
            .collect();
        self.band_names.insert(satellite.to_string(), table);
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn check_not_reserved(name: &str) -> Result<()> {
    if name == MERGED_BAND_LABEL {
        return Err(SatStoreError::configuration(format!(
            "band tables must not use the reserved label '{MERGED_BAND_LABEL}'"
        )));
    }
    Ok(())
}

/// Maps caller-facing band aliases onto provider-native labels
#[derive(Debug, Clone, Copy)]
pub struct BandResolver<'a> {
    catalog: &'a ProviderCatalog,
}

impl<'a> BandResolver<'a> {
    pub fn new(catalog: &'a ProviderCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve the label written into file names
    ///
    /// Returns [`MERGED_BAND_LABEL`] whenever `merge_bands` is set. Unknown
    /// aliases are assumed to already be native and pass through unchanged.
    pub fn resolve(&self, band_alias: &str, satellite: &str, merge_bands: bool) -> String {
        if merge_bands {
            return MERGED_BAND_LABEL.to_string();
        }
        self.catalog
            .native_band(satellite, band_alias)
            .unwrap_or(band_alias)
            .to_string()
    }
}

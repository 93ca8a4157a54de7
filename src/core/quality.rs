//! Quality-flag masking and per-product unit corrections applied to a swath
//! before it is rasterized.

use crate::types::{RasterizeReason, SpratError, SpratResult, SwathDataset, MISSING};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Test applied to one flag value; `true` means the sample is bad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "test", content = "value", rename_all = "snake_case")]
pub enum FlagTest {
    Equals(i64),
    /// Any of the mask bits set
    AnyBits(i64),
}

impl FlagTest {
    pub fn is_bad(&self, value: i64) -> bool {
        match *self {
            FlagTest::Equals(v) => value == v,
            FlagTest::AnyBits(mask) => value & mask != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityRule {
    /// Name of the quality layer the test reads
    pub layer: String,
    pub test: FlagTest,
}

/// Rules OR-ed together; a sample failing any rule is missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMask {
    pub rules: Vec<QualityRule>,
}

impl QualityMask {
    /// SLSTR LST: Bayesian cloud flag `bayes_in == 2` or the summary-cloud bit
    /// (16384) of `confidence_in`
    pub fn slstr_lst() -> Self {
        Self {
            rules: vec![
                QualityRule { layer: "bayes_in".to_string(), test: FlagTest::Equals(2) },
                QualityRule { layer: "confidence_in".to_string(), test: FlagTest::AnyBits(16384) },
            ],
        }
    }

    /// Per-sample bad flags in row-major sample order
    pub fn bad_samples(&self, dataset: &SwathDataset) -> SpratResult<Vec<bool>> {
        let mut bad = vec![false; dataset.sample_count()];

        for rule in &self.rules {
            let layer = dataset
                .quality
                .iter()
                .find(|l| l.name == rule.layer)
                .ok_or_else(|| {
                    SpratError::rasterize(
                        RasterizeReason::MissingInput,
                        format!("quality layer '{}' not present", rule.layer),
                    )
                })?;

            if layer.values.len() != bad.len() {
                return Err(SpratError::rasterize(
                    RasterizeReason::ShapeMismatch,
                    format!("quality layer '{}' has {} elements, expected {}", layer.name, layer.values.len(), bad.len()),
                ));
            }

            for (flag, &value) in bad.iter_mut().zip(&layer.values) {
                *flag |= rule.test.is_bad(value);
            }
        }

        Ok(bad)
    }

    /// Measurement with bad samples replaced by the missing marker
    pub fn apply(&self, dataset: &SwathDataset) -> SpratResult<Array2<f64>> {
        let bad = self.bad_samples(dataset)?;
        let masked_count = bad.iter().filter(|b| **b).count();

        let (rows, cols) = dataset.measurement.dim();
        let values: Vec<f64> = dataset
            .measurement
            .iter()
            .zip(&bad)
            .map(|(&v, &is_bad)| if is_bad { MISSING } else { v })
            .collect();

        log::info!(
            "Quality mask removed {} of {} samples ({:.2}%)",
            masked_count,
            bad.len(),
            if bad.is_empty() { 0.0 } else { masked_count as f64 / bad.len() as f64 * 100.0 }
        );

        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| SpratError::rasterize(RasterizeReason::ShapeMismatch, e.to_string()))
    }
}

/// Named unit transform for a product family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitCorrection {
    Identity,
    /// Land surface temperature is delivered in Kelvin; output is Celsius
    KelvinToCelsius,
}

impl UnitCorrection {
    pub const KELVIN_OFFSET: f64 = -273.15;

    /// Correction declared for a catalog product type
    pub fn for_product_type(product_type: &str) -> Self {
        if product_type.to_ascii_uppercase().contains("LST") {
            UnitCorrection::KelvinToCelsius
        } else {
            UnitCorrection::Identity
        }
    }

    /// Whether the correction applies given the unit the provider reported.
    /// An unreported unit is taken to be the product family's native one.
    pub fn applies_to(&self, units: Option<&str>) -> bool {
        match self {
            UnitCorrection::Identity => false,
            UnitCorrection::KelvinToCelsius => match units.map(|u| u.trim().to_ascii_lowercase()) {
                None => true,
                Some(u) => u == "k" || u == "kelvin",
            },
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        match self {
            UnitCorrection::Identity => value,
            UnitCorrection::KelvinToCelsius => value + Self::KELVIN_OFFSET,
        }
    }

    /// Convert in place; missing samples stay missing
    pub fn apply_array(&self, values: &mut Array2<f64>, units: Option<&str>) {
        if !self.applies_to(units) {
            return;
        }
        log::debug!("Applying unit correction {:?}", self);
        values.mapv_inplace(|v| if v.is_finite() { self.apply(v) } else { v });
    }
}

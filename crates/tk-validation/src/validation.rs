use serde::{Deserialize, Serialize};
use tk_dtype::DataType;
use tk_ndarray::{PaddingSize, TensorShape, ValidRegion};

use crate::reference::SimpleTensor;

/// Mismatching elements kept in a [`ValidationMismatch::Values`] report.
pub const MAX_REPORTED_MISMATCHES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Tolerance {
    /// `|actual - expected| <= bound`.
    Absolute(f64),
    /// `|actual - expected| <= bound * max(|actual|, |expected|)`.
    Relative(f64),
}

impl Tolerance {
    #[must_use]
    pub const fn exact() -> Self {
        Self::Absolute(0.0)
    }

    /// NaN only matches NaN; equal infinities always match.
    #[must_use]
    pub fn accepts(self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        if actual == expected {
            return true;
        }
        let diff = (actual - expected).abs();
        match self {
            Self::Absolute(bound) => diff <= bound,
            Self::Relative(bound) => diff <= bound * actual.abs().max(expected.abs()),
        }
    }
}

/// Per-datatype comparison bounds. Integer and fixed-point outputs are
/// always compared exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub f16: Tolerance,
    pub f32: Tolerance,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            f16: Tolerance::exact(),
            f32: Tolerance::exact(),
        }
    }
}

impl ToleranceConfig {
    #[must_use]
    pub fn for_data_type(&self, data_type: DataType) -> Tolerance {
        if data_type.is_integer() || data_type.is_fixed_point() {
            return Tolerance::exact();
        }
        match data_type {
            #[cfg(feature = "fp16")]
            DataType::F16 => self.f16,
            _ => self.f32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMismatch {
    pub coord: Vec<usize>,
    pub actual: f64,
    pub expected: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationMismatch {
    #[error("shape mismatch expected={expected} actual={actual}")]
    Shape {
        expected: TensorShape,
        actual: TensorShape,
    },
    #[error("datatype mismatch expected={expected} actual={actual}")]
    DataType { expected: DataType, actual: DataType },
    #[error("{count} of {total} elements mismatch, first {:?}", .elements.first())]
    Values {
        total: usize,
        count: usize,
        elements: Vec<ElementMismatch>,
    },
    #[error("valid region mismatch expected={expected:?} actual={actual:?}")]
    ValidRegion {
        expected: ValidRegion,
        actual: ValidRegion,
    },
    #[error("padding mismatch expected={expected:?} actual={actual:?}")]
    Padding {
        expected: PaddingSize,
        actual: PaddingSize,
    },
}

impl ValidationMismatch {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Shape { .. } => "validation_shape_mismatch",
            Self::DataType { .. } => "validation_data_type_mismatch",
            Self::Values { .. } => "validation_value_mismatch",
            Self::ValidRegion { .. } => "validation_valid_region_mismatch",
            Self::Padding { .. } => "validation_padding_mismatch",
        }
    }
}

/// Compares every element of `actual` against `expected`.
///
/// All mismatches are counted; the first [`MAX_REPORTED_MISMATCHES`] are
/// kept with their coordinates.
pub fn validate_values(
    actual: &SimpleTensor,
    expected: &SimpleTensor,
    tolerance: Tolerance,
) -> Result<(), ValidationMismatch> {
    if actual.shape() != expected.shape() {
        return Err(ValidationMismatch::Shape {
            expected: expected.shape().clone(),
            actual: actual.shape().clone(),
        });
    }
    if actual.data_type() != expected.data_type() {
        return Err(ValidationMismatch::DataType {
            expected: expected.data_type(),
            actual: actual.data_type(),
        });
    }

    let mut count = 0usize;
    let mut elements = Vec::new();
    for (idx, (&got, &want)) in actual.values().iter().zip(expected.values()).enumerate() {
        if tolerance.accepts(got, want) {
            continue;
        }
        count += 1;
        if elements.len() < MAX_REPORTED_MISMATCHES {
            elements.push(ElementMismatch {
                coord: expected.coordinate(idx),
                actual: got,
                expected: want,
            });
        }
    }

    if count == 0 {
        Ok(())
    } else {
        Err(ValidationMismatch::Values {
            total: expected.len(),
            count,
            elements,
        })
    }
}

pub fn validate_valid_region(
    actual: &ValidRegion,
    expected: &ValidRegion,
) -> Result<(), ValidationMismatch> {
    if actual == expected {
        Ok(())
    } else {
        Err(ValidationMismatch::ValidRegion {
            expected: expected.clone(),
            actual: actual.clone(),
        })
    }
}

pub fn validate_padding(
    actual: PaddingSize,
    expected: PaddingSize,
) -> Result<(), ValidationMismatch> {
    if actual == expected {
        Ok(())
    } else {
        Err(ValidationMismatch::Padding { expected, actual })
    }
}

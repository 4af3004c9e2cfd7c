//! Scalar reference model for `output = input1 - input2`.
//!
//! Works on dense [`SimpleTensor`]s in `i64`/`f64` and never touches the
//! kernel's tiling, padding or element traits.

use tk_dtype::{ConvertPolicy, DataType};
use tk_ndarray::TensorShape;

/// Dense, unpadded tensor with values in `x`-fastest order.
///
/// Integer and fixed-point values are raw container codes.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleTensor {
    shape: TensorShape,
    data_type: DataType,
    fractional_bits: u8,
    values: Vec<f64>,
}

impl SimpleTensor {
    pub fn new(
        shape: TensorShape,
        data_type: DataType,
        fractional_bits: u8,
        values: Vec<f64>,
    ) -> Result<Self, String> {
        if values.len() != shape.total_size() {
            return Err(format!(
                "value count {} does not match shape {shape} ({} elements)",
                values.len(),
                shape.total_size()
            ));
        }
        Ok(Self {
            shape,
            data_type,
            fractional_bits,
            values,
        })
    }

    #[must_use]
    pub fn zeros(shape: TensorShape, data_type: DataType, fractional_bits: u8) -> Self {
        let values = vec![0.0; shape.total_size()];
        Self {
            shape,
            data_type,
            fractional_bits,
            values,
        }
    }

    #[must_use]
    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[must_use]
    pub fn fractional_bits(&self) -> u8 {
        self.fractional_bits
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Coordinate of the element at dense `index`.
    #[must_use]
    pub fn coordinate(&self, index: usize) -> Vec<usize> {
        let mut rem = index;
        self.shape
            .dims()
            .iter()
            .map(|&dim| {
                let c = rem % dim;
                rem /= dim;
                c
            })
            .collect()
    }
}

/// `lo + (value - lo) mod (hi - lo + 1)`: two's-complement truncation for
/// any contiguous integer range.
#[must_use]
pub fn wrap_to_range(value: i64, lo: i64, hi: i64) -> i64 {
    let modulus = hi - lo + 1;
    lo + (value - lo).rem_euclid(modulus)
}

/// Rounds `value` to the nearest value representable in `data_type`.
///
/// Only meaningful for float types; rounding an exact `f64` difference of
/// two `f32`/`f16` values once gives the same result as native arithmetic.
#[must_use]
pub fn round_to_data_type(data_type: DataType, value: f64) -> f64 {
    match data_type {
        #[cfg(feature = "fp16")]
        DataType::F16 => f64::from(half::f16::from_f64(value)),
        _ => f64::from(value as f32),
    }
}

fn subtract_scalar(lhs: f64, rhs: f64, output: DataType, policy: ConvertPolicy) -> f64 {
    match output.int_range() {
        Some((lo, hi)) => {
            let diff = lhs as i64 - rhs as i64;
            let narrowed = match policy {
                ConvertPolicy::Saturate => diff.clamp(lo, hi),
                ConvertPolicy::Wrap => wrap_to_range(diff, lo, hi),
            };
            narrowed as f64
        }
        None => round_to_data_type(output, lhs - rhs),
    }
}

/// Expected output of subtracting `src2` from `src1` into `output`.
pub fn arithmetic_subtraction(
    src1: &SimpleTensor,
    src2: &SimpleTensor,
    output: DataType,
    policy: ConvertPolicy,
) -> Result<SimpleTensor, String> {
    if src1.shape() != src2.shape() {
        return Err(format!(
            "reference shape mismatch src1={} src2={}",
            src1.shape(),
            src2.shape()
        ));
    }
    let values = src1
        .values()
        .iter()
        .zip(src2.values())
        .map(|(&lhs, &rhs)| subtract_scalar(lhs, rhs, output, policy))
        .collect();
    let fractional_bits = if output.is_fixed_point() {
        src1.fractional_bits()
    } else {
        0
    };
    SimpleTensor::new(src1.shape().clone(), output, fractional_bits, values)
}

#[cfg(test)]
mod tests {
    use super::{SimpleTensor, arithmetic_subtraction, round_to_data_type, wrap_to_range};
    use proptest::prelude::*;
    use tk_dtype::{ConvertPolicy, DataType};
    use tk_ndarray::TensorShape;

    fn simple(dims: &[usize], data_type: DataType, values: &[f64]) -> SimpleTensor {
        let shape = TensorShape::new(dims.to_vec()).expect("shape");
        SimpleTensor::new(shape, data_type, 0, values.to_vec()).expect("tensor")
    }

    #[test]
    fn wrap_to_range_matches_twos_complement() {
        assert_eq!(wrap_to_range(-5, 0, 255), 251);
        assert_eq!(wrap_to_range(256, 0, 255), 0);
        assert_eq!(wrap_to_range(128, -128, 127), -128);
        assert_eq!(wrap_to_range(-129, -128, 127), 127);
        assert_eq!(wrap_to_range(-33_023, -32_768, 32_767), 32_513);
    }

    #[test]
    fn u8_scenario_under_both_policies() {
        let lhs = simple(&[7], DataType::U8, &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0]);
        let rhs = simple(&[7], DataType::U8, &[5.0, 25.0, 35.0, 45.0, 55.0, 65.0, 75.0]);

        let sat = arithmetic_subtraction(&lhs, &rhs, DataType::U8, ConvertPolicy::Saturate)
            .expect("saturate");
        assert_eq!(sat.values(), &[5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let wrap =
            arithmetic_subtraction(&lhs, &rhs, DataType::U8, ConvertPolicy::Wrap).expect("wrap");
        assert_eq!(
            wrap.values(),
            &[5.0, 251.0, 251.0, 251.0, 251.0, 251.0, 251.0]
        );
    }

    #[test]
    fn fixed_point_output_keeps_fractional_bits() {
        let shape = TensorShape::new(vec![1]).expect("shape");
        let lhs = SimpleTensor::new(shape.clone(), DataType::QS8, 4, vec![16.0]).expect("lhs");
        let rhs = SimpleTensor::new(shape, DataType::QS8, 4, vec![8.0]).expect("rhs");
        let out = arithmetic_subtraction(&lhs, &rhs, DataType::QS8, ConvertPolicy::Saturate)
            .expect("qs8");
        assert_eq!(out.values(), &[8.0]);
        assert_eq!(out.fractional_bits(), 4);
    }

    #[test]
    fn float_results_are_rounded_to_the_output_type() {
        let lhs = simple(&[2], DataType::F32, &[1.0, f64::INFINITY]);
        let rhs = simple(&[2], DataType::F32, &[1e-10, 1.0]);
        let out = arithmetic_subtraction(&lhs, &rhs, DataType::F32, ConvertPolicy::Wrap)
            .expect("f32");
        assert_eq!(out.values()[0], 1.0);
        assert_eq!(out.values()[1], f64::INFINITY);
        assert_eq!(round_to_data_type(DataType::F32, 0.1), f64::from(0.1f32));
    }

    #[test]
    fn rejects_mismatched_shapes_and_counts() {
        let lhs = simple(&[2], DataType::U8, &[1.0, 2.0]);
        let rhs = simple(&[2, 1], DataType::U8, &[1.0, 2.0]);
        assert!(arithmetic_subtraction(&lhs, &rhs, DataType::U8, ConvertPolicy::Wrap).is_err());

        let shape = TensorShape::new(vec![3]).expect("shape");
        let err = SimpleTensor::new(shape, DataType::U8, 0, vec![1.0]).expect_err("count");
        assert!(err.contains("value count 1"));
    }

    #[test]
    fn coordinates_are_x_fastest() {
        let t = SimpleTensor::zeros(
            TensorShape::new(vec![3, 2, 2]).expect("shape"),
            DataType::S16,
            0,
        );
        assert_eq!(t.coordinate(0), vec![0, 0, 0]);
        assert_eq!(t.coordinate(4), vec![1, 1, 0]);
        assert_eq!(t.coordinate(11), vec![2, 1, 1]);
    }

    proptest! {
        #[test]
        fn wrap_is_idempotent_and_in_range(value in -100_000i64..100_000) {
            let once = wrap_to_range(value, -128, 127);
            prop_assert!((-128..=127).contains(&once));
            prop_assert_eq!(wrap_to_range(once, -128, 127), once);
            prop_assert_eq!(once, i64::from(value as i8));
        }
    }
}

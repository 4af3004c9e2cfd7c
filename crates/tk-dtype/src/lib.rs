#![forbid(unsafe_code)]

use std::fmt;

/// Element datatypes understood by tilekern kernels.
///
/// `QS8`/`QS16` are signed fixed-point containers whose scale is carried
/// separately as a number of fractional bits (see [`FixedPointFormat`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    U8,
    S16,
    QS8,
    QS16,
    #[cfg(feature = "fp16")]
    F16,
    F32,
}

impl DataType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::U8 => "U8",
            Self::S16 => "S16",
            Self::QS8 => "QS8",
            Self::QS16 => "QS16",
            #[cfg(feature = "fp16")]
            Self::F16 => "F16",
            Self::F32 => "F32",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "u8" | "uint8" => Some(Self::U8),
            "s16" | "i16" | "int16" => Some(Self::S16),
            "qs8" => Some(Self::QS8),
            "qs16" => Some(Self::QS16),
            #[cfg(feature = "fp16")]
            "f16" | "float16" | "half" => Some(Self::F16),
            "f32" | "float32" | "float" => Some(Self::F32),
            _ => None,
        }
    }

    /// Size of one stored element in bytes.
    #[must_use]
    pub const fn element_size(self) -> usize {
        match self {
            Self::U8 | Self::QS8 => 1,
            Self::S16 | Self::QS16 => 2,
            #[cfg(feature = "fp16")]
            Self::F16 => 2,
            Self::F32 => 4,
        }
    }

    #[must_use]
    pub const fn bit_width(self) -> u32 {
        (self.element_size() * 8) as u32
    }

    #[must_use]
    pub const fn is_signed(self) -> bool {
        !matches!(self, Self::U8)
    }

    /// Plain integer types (no implied scale).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::U8 | Self::S16)
    }

    #[must_use]
    pub const fn is_fixed_point(self) -> bool {
        matches!(self, Self::QS8 | Self::QS16)
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        match self {
            #[cfg(feature = "fp16")]
            Self::F16 => true,
            Self::F32 => true,
            _ => false,
        }
    }

    /// Raw `(min, max)` of the stored integer for integer and fixed-point
    /// types. Floats have no integer range.
    #[must_use]
    pub const fn int_range(self) -> Option<(i64, i64)> {
        match self {
            Self::U8 => Some((u8::MIN as i64, u8::MAX as i64)),
            Self::S16 | Self::QS16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::QS8 => Some((i8::MIN as i64, i8::MAX as i64)),
            _ => None,
        }
    }

    /// Largest accepted number of fractional bits for fixed-point types.
    #[must_use]
    pub const fn max_fractional_bits(self) -> Option<u8> {
        match self {
            Self::QS8 => Some(7),
            Self::QS16 => Some(15),
            _ => None,
        }
    }

    /// Every datatype compiled into this build.
    #[must_use]
    pub fn supported() -> Vec<Self> {
        let mut out = vec![Self::U8, Self::S16, Self::QS8, Self::QS16];
        #[cfg(feature = "fp16")]
        out.push(Self::F16);
        out.push(Self::F32);
        out
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Overflow handling applied when narrowing an intermediate result to the
/// destination datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvertPolicy {
    Saturate,
    Wrap,
}

impl ConvertPolicy {
    pub const ALL: [Self; 2] = [Self::Saturate, Self::Wrap];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Saturate => "SATURATE",
            Self::Wrap => "WRAP",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "saturate" => Some(Self::Saturate),
            "wrap" => Some(Self::Wrap),
            _ => None,
        }
    }
}

impl fmt::Display for ConvertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output datatype chosen for `in1 - in2` when the caller leaves it open.
///
/// Mirrors the auto-initialisation rule of the subtraction function: a
/// single `S16` operand promotes the result to `S16`, everything else keeps
/// the common input type.
#[must_use]
pub const fn subtraction_output_type(in1: DataType, in2: DataType) -> Option<DataType> {
    use DataType::*;

    match (in1, in2) {
        (U8, U8) => Some(U8),
        (U8, S16) | (S16, U8) | (S16, S16) => Some(S16),
        (QS8, QS8) => Some(QS8),
        (QS16, QS16) => Some(QS16),
        #[cfg(feature = "fp16")]
        (F16, F16) => Some(F16),
        (F32, F32) => Some(F32),
        _ => None,
    }
}

/// Type-compatibility table for `out = in1 - in2`.
///
/// An `U8` output is only reachable from two `U8` inputs; fixed-point and
/// float paths never mix types.
#[must_use]
pub const fn subtraction_supported(in1: DataType, in2: DataType, out: DataType) -> bool {
    use DataType::*;

    match (in1, in2, out) {
        (U8, U8, U8 | S16) => true,
        (U8 | S16, U8 | S16, S16) => true,
        (QS8, QS8, QS8) | (QS16, QS16, QS16) | (F32, F32, F32) => true,
        #[cfg(feature = "fp16")]
        (F16, F16, F16) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedPointError {
    #[error("{0} is not a fixed-point datatype")]
    NotFixedPoint(DataType),
    #[error("fractional bits {fractional_bits} out of range 1..={max} for {data_type}")]
    FractionalBitsOutOfRange {
        data_type: DataType,
        fractional_bits: u8,
        max: u8,
    },
}

impl FixedPointError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFixedPoint(_) => "fixed_point_not_fixed_point_type",
            Self::FractionalBitsOutOfRange { .. } => "fixed_point_fractional_bits_out_of_range",
        }
    }
}

/// Q-format description: a signed container interpreted as
/// `raw / 2^fractional_bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedPointFormat {
    data_type: DataType,
    fractional_bits: u8,
}

impl FixedPointFormat {
    pub fn new(data_type: DataType, fractional_bits: u8) -> Result<Self, FixedPointError> {
        let max = data_type
            .max_fractional_bits()
            .ok_or(FixedPointError::NotFixedPoint(data_type))?;
        if fractional_bits == 0 || fractional_bits > max {
            return Err(FixedPointError::FractionalBitsOutOfRange {
                data_type,
                fractional_bits,
                max,
            });
        }
        Ok(Self {
            data_type,
            fractional_bits,
        })
    }

    #[must_use]
    pub const fn data_type(self) -> DataType {
        self.data_type
    }

    #[must_use]
    pub const fn fractional_bits(self) -> u8 {
        self.fractional_bits
    }

    /// Raw value representing 1.0.
    #[must_use]
    pub const fn one(self) -> i64 {
        1_i64 << self.fractional_bits
    }

    #[must_use]
    pub fn to_f64(self, raw: i64) -> f64 {
        raw as f64 / self.one() as f64
    }

    /// Quantise `value` to the nearest raw code (ties away from zero) and
    /// narrow it with `policy`.
    #[must_use]
    pub fn quantize(self, value: f64, policy: ConvertPolicy) -> i64 {
        let scaled = (value * self.one() as f64).round();
        // The float-to-int cast saturates at i32 bounds, which is wide enough
        // for both containers.
        let wide = scaled as i32;
        match self.data_type {
            DataType::QS8 => i64::from(i8::narrow(wide, policy)),
            _ => i64::from(i16::narrow(wide, policy)),
        }
    }
}

/// Integer storage types processed through a 32-bit signed intermediate.
///
/// `i8` backs `QS8`, `i16` backs both `S16` and `QS16`: fixed-point
/// subtraction on a shared scale is plain integer subtraction on the raw
/// codes.
pub trait IntegerElement:
    Copy + Default + Send + Sync + fmt::Debug + PartialEq + 'static
{
    const MIN_WIDE: i32;
    const MAX_WIDE: i32;

    fn widen(self) -> i32;

    fn saturate_from(wide: i32) -> Self;

    /// Two's-complement truncation to the low-order bits of `Self`.
    fn wrap_from(wide: i32) -> Self;

    fn to_f64(self) -> f64;

    #[inline]
    fn narrow(wide: i32, policy: ConvertPolicy) -> Self {
        match policy {
            ConvertPolicy::Saturate => Self::saturate_from(wide),
            ConvertPolicy::Wrap => Self::wrap_from(wide),
        }
    }
}

macro_rules! impl_integer_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntegerElement for $ty {
                const MIN_WIDE: i32 = <$ty>::MIN as i32;
                const MAX_WIDE: i32 = <$ty>::MAX as i32;

                #[inline]
                fn widen(self) -> i32 {
                    i32::from(self)
                }

                #[inline]
                fn saturate_from(wide: i32) -> Self {
                    wide.clamp(Self::MIN_WIDE, Self::MAX_WIDE) as $ty
                }

                #[inline]
                fn wrap_from(wide: i32) -> Self {
                    wide as $ty
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    f64::from(self)
                }
            }
        )*
    };
}

impl_integer_element!(u8, i8, i16);

/// Floating point storage types. Convert policies have no effect here.
pub trait FloatElement:
    Copy + Default + Send + Sync + fmt::Debug + PartialEq + 'static
{
    fn sub(self, rhs: Self) -> Self;

    fn to_f64(self) -> f64;

    /// Rounds to nearest representable value.
    fn from_f64(value: f64) -> Self;
}

impl FloatElement for f32 {
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

#[cfg(feature = "fp16")]
impl FloatElement for half::f16 {
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        Self::from_f64_const(value)
    }
}

#![forbid(unsafe_code)]

//! Tensor metadata and padded storage.
//!
//! Dimension 0 is the horizontal `x` extent and is contiguous in memory;
//! dimension 1 is `y`. Padding only ever surrounds the `x`/`y` plane.

use tk_dtype::DataType;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("tensor shape must have at least one dimension")]
    Empty,
    #[error("dimension {axis} has size 0")]
    ZeroDimension { axis: usize },
    #[error("size arithmetic overflow")]
    Overflow,
}

pub fn element_count(dims: &[usize]) -> Result<usize, ShapeError> {
    dims.iter().try_fold(1usize, |acc, &dim| {
        acc.checked_mul(dim).ok_or(ShapeError::Overflow)
    })
}

/// Ordered, strictly positive dimension sizes, `x` first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    pub fn new(dims: Vec<usize>) -> Result<Self, ShapeError> {
        if dims.is_empty() {
            return Err(ShapeError::Empty);
        }
        if let Some(axis) = dims.iter().position(|&d| d == 0) {
            return Err(ShapeError::ZeroDimension { axis });
        }
        element_count(&dims)?;
        Ok(Self { dims })
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[must_use]
    pub fn num_dimensions(&self) -> usize {
        self.dims.len()
    }

    /// Size of `axis`; dimensions past the rank have size 1.
    #[must_use]
    pub fn dim(&self, axis: usize) -> usize {
        self.dims.get(axis).copied().unwrap_or(1)
    }

    #[must_use]
    pub fn x(&self) -> usize {
        self.dims[0]
    }

    #[must_use]
    pub fn y(&self) -> usize {
        self.dim(1)
    }

    /// Number of elements. Checked at construction, so it cannot overflow.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Number of `x` rows, i.e. the product of every dimension above 0.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.dims[1..].iter().product()
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .dims
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join("x");
        f.write_str(&joined)
    }
}

/// Border widths around the valid region, in elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PaddingSize {
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
    pub left: usize,
}

impl PaddingSize {
    #[must_use]
    pub const fn new(top: usize, right: usize, bottom: usize, left: usize) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    #[must_use]
    pub const fn uniform(border: usize) -> Self {
        Self::new(border, border, border, border)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self::uniform(0)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.top == 0 && self.right == 0 && self.bottom == 0 && self.left == 0
    }

    /// Side-wise maximum of `self` and `other`.
    #[must_use]
    pub fn extend(self, other: Self) -> Self {
        Self {
            top: self.top.max(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
            left: self.left.max(other.left),
        }
    }
}

/// Computes the padding a vectorised kernel needs around one row.
///
/// With the defaults (no border, every processed element accessed once, no
/// look-behind) the result is trailing `x` padding rounding `size` up to the
/// next multiple of `processed_elements`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingCalculator {
    size: usize,
    processed_elements: usize,
    accessed_elements: usize,
    border_size: usize,
    access_offset: usize,
}

impl PaddingCalculator {
    #[must_use]
    pub fn new(size: usize, processed_elements: usize) -> Self {
        let processed_elements = processed_elements.max(1);
        Self {
            size,
            processed_elements,
            accessed_elements: processed_elements,
            border_size: 0,
            access_offset: 0,
        }
    }

    /// Undefined border the kernel reads around the valid region.
    #[must_use]
    pub fn set_border_size(mut self, border_size: usize) -> Self {
        self.border_size = border_size;
        self
    }

    /// Elements read per step when it differs from the elements written.
    #[must_use]
    pub fn set_accessed_elements(mut self, accessed_elements: usize) -> Self {
        self.accessed_elements = accessed_elements;
        self
    }

    /// Elements read before the first processed element.
    #[must_use]
    pub fn set_access_offset(mut self, access_offset: usize) -> Self {
        self.access_offset = access_offset;
        self
    }

    #[must_use]
    pub fn required_padding(&self) -> PaddingSize {
        let steps = self.size.div_ceil(self.processed_elements);
        let last_step_start = steps.saturating_sub(1) * self.processed_elements;
        let read_end = last_step_start
            + self.accessed_elements.max(self.processed_elements)
            + self.border_size;
        let read_end = read_end.saturating_sub(self.access_offset);

        PaddingSize {
            top: self.border_size,
            right: read_end.saturating_sub(self.size),
            bottom: self.border_size,
            left: self.border_size + self.access_offset,
        }
    }
}

/// Region of a tensor holding defined values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidRegion {
    anchor: Vec<usize>,
    shape: TensorShape,
}

impl ValidRegion {
    #[must_use]
    pub fn from_shape(shape: &TensorShape) -> Self {
        Self {
            anchor: vec![0; shape.num_dimensions()],
            shape: shape.clone(),
        }
    }

    /// Explicit anchor; missing trailing anchor entries are 0.
    #[must_use]
    pub fn new(mut anchor: Vec<usize>, shape: TensorShape) -> Self {
        anchor.resize(shape.num_dimensions(), 0);
        Self { anchor, shape }
    }

    #[must_use]
    pub fn anchor(&self) -> &[usize] {
        &self.anchor
    }

    #[must_use]
    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    #[must_use]
    pub fn start(&self, axis: usize) -> usize {
        self.anchor.get(axis).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn end(&self, axis: usize) -> usize {
        self.start(axis) + self.shape.dim(axis)
    }
}

#[must_use]
pub fn shape_to_valid_region(shape: &TensorShape) -> ValidRegion {
    ValidRegion::from_shape(shape)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),
    #[error("padding cannot change once the tensor is allocated")]
    PaddingLocked,
    #[error("tensor is already allocated")]
    AlreadyAllocated,
    #[error("tensor is not allocated")]
    NotAllocated,
    #[error("coordinate {coord:?} outside shape {shape}")]
    CoordinateOutOfBounds { coord: Vec<usize>, shape: TensorShape },
    #[error("value count mismatch expected={expected} actual={actual}")]
    ValueCountMismatch { expected: usize, actual: usize },
    #[error("buffer offset {offset} outside buffer of {len} elements")]
    OffsetOutOfBounds { offset: usize, len: usize },
}

impl TensorError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Shape(_) => "tensor_shape_invalid",
            Self::PaddingLocked => "tensor_padding_locked",
            Self::AlreadyAllocated => "tensor_already_allocated",
            Self::NotAllocated => "tensor_not_allocated",
            Self::CoordinateOutOfBounds { .. } => "tensor_coordinate_out_of_bounds",
            Self::ValueCountMismatch { .. } => "tensor_value_count_mismatch",
            Self::OffsetOutOfBounds { .. } => "tensor_offset_out_of_bounds",
        }
    }
}

/// Metadata describing a padded tensor.
///
/// Strides are in elements. The padded plane is `left + x + right` wide and
/// `top + y + bottom` tall; higher dimensions are stacked unpadded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    shape: TensorShape,
    data_type: DataType,
    fractional_bits: u8,
    padding: PaddingSize,
    valid_region: ValidRegion,
    strides: Vec<usize>,
    offset_first_element: usize,
    total_elements: usize,
    resizable: bool,
}

impl TensorInfo {
    #[must_use]
    pub fn new(shape: TensorShape, data_type: DataType) -> Self {
        let valid_region = ValidRegion::from_shape(&shape);
        let mut info = Self {
            shape,
            data_type,
            fractional_bits: 0,
            padding: PaddingSize::empty(),
            valid_region,
            strides: Vec::new(),
            offset_first_element: 0,
            total_elements: 0,
            resizable: true,
        };
        info.recompute_layout();
        info
    }

    /// Fixed-point tensor. The fractional-bit count is checked when a kernel
    /// is configured, not here.
    #[must_use]
    pub fn new_fixed_point(shape: TensorShape, data_type: DataType, fractional_bits: u8) -> Self {
        let mut info = Self::new(shape, data_type);
        info.fractional_bits = fractional_bits;
        info
    }

    #[must_use]
    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// 0 for non fixed-point tensors.
    #[must_use]
    pub const fn fractional_bits(&self) -> u8 {
        self.fractional_bits
    }

    #[must_use]
    pub const fn padding(&self) -> PaddingSize {
        self.padding
    }

    #[must_use]
    pub fn valid_region(&self) -> &ValidRegion {
        &self.valid_region
    }

    pub fn set_valid_region(&mut self, region: ValidRegion) {
        self.valid_region = region;
    }

    #[must_use]
    pub const fn is_resizable(&self) -> bool {
        self.resizable
    }

    /// Grows the padding side-wise to at least `padding`.
    ///
    /// Returns whether anything changed.
    pub fn extend_padding(&mut self, padding: PaddingSize) -> Result<bool, TensorError> {
        let extended = self.padding.extend(padding);
        if extended == self.padding {
            return Ok(false);
        }
        if !self.resizable {
            return Err(TensorError::PaddingLocked);
        }
        self.padding = extended;
        self.recompute_layout();
        Ok(true)
    }

    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[must_use]
    pub fn strides_in_bytes(&self) -> Vec<usize> {
        let es = self.data_type.element_size();
        self.strides.iter().map(|s| s * es).collect()
    }

    /// Padded row length in elements.
    #[must_use]
    pub fn row_stride(&self) -> usize {
        self.strides[1]
    }

    #[must_use]
    pub fn padded_shape(&self) -> Vec<usize> {
        let mut dims = self.shape.dims().to_vec();
        if dims.len() < 2 {
            dims.resize(2, 1);
        }
        dims[0] += self.padding.left + self.padding.right;
        dims[1] += self.padding.top + self.padding.bottom;
        dims
    }

    #[must_use]
    pub const fn offset_first_element(&self) -> usize {
        self.offset_first_element
    }

    #[must_use]
    pub fn offset_first_element_in_bytes(&self) -> usize {
        self.offset_first_element * self.data_type.element_size()
    }

    #[must_use]
    pub const fn total_elements(&self) -> usize {
        self.total_elements
    }

    #[must_use]
    pub fn total_size_bytes(&self) -> usize {
        self.total_elements * self.data_type.element_size()
    }

    /// Buffer index of the first valid element of row `row`, rows counted
    /// over every dimension above `x` in order.
    #[must_use]
    pub fn row_offset(&self, row: usize) -> usize {
        let mut rem = row;
        let mut offset = self.offset_first_element;
        for axis in 1..self.shape.num_dimensions() {
            let dim = self.shape.dim(axis);
            offset += (rem % dim) * self.strides[axis];
            rem /= dim;
        }
        offset
    }

    pub fn offset_of(&self, coord: &[usize]) -> Result<usize, TensorError> {
        let in_bounds = coord.len() == self.shape.num_dimensions()
            && coord
                .iter()
                .enumerate()
                .all(|(axis, &c)| c < self.shape.dim(axis));
        if !in_bounds {
            return Err(TensorError::CoordinateOutOfBounds {
                coord: coord.to_vec(),
                shape: self.shape.clone(),
            });
        }
        Ok(coord
            .iter()
            .zip(&self.strides)
            .fold(self.offset_first_element, |acc, (&c, &s)| acc + c * s))
    }

    fn recompute_layout(&mut self) {
        let padded = self.padded_shape();
        let mut strides = Vec::with_capacity(padded.len());
        let mut stride = 1usize;
        for &dim in &padded {
            strides.push(stride);
            stride *= dim;
        }
        self.offset_first_element = self.padding.top * strides[1] + self.padding.left;
        self.total_elements = stride;
        self.strides = strides;
    }

    fn lock(&mut self) {
        self.resizable = false;
    }
}

/// Typed backing storage of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorBuffer {
    U8(Vec<u8>),
    S16(Vec<i16>),
    QS8(Vec<i8>),
    QS16(Vec<i16>),
    #[cfg(feature = "fp16")]
    F16(Vec<half::f16>),
    F32(Vec<f32>),
}

impl TensorBuffer {
    #[must_use]
    pub fn zeros(data_type: DataType, n: usize) -> Self {
        match data_type {
            DataType::U8 => Self::U8(vec![0; n]),
            DataType::S16 => Self::S16(vec![0; n]),
            DataType::QS8 => Self::QS8(vec![0; n]),
            DataType::QS16 => Self::QS16(vec![0; n]),
            #[cfg(feature = "fp16")]
            DataType::F16 => Self::F16(vec![half::f16::ZERO; n]),
            DataType::F32 => Self::F32(vec![0.0; n]),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::S16(v) | Self::QS16(v) => v.len(),
            Self::QS8(v) => v.len(),
            #[cfg(feature = "fp16")]
            Self::F16(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::U8(_) => DataType::U8,
            Self::S16(_) => DataType::S16,
            Self::QS8(_) => DataType::QS8,
            Self::QS16(_) => DataType::QS16,
            #[cfg(feature = "fp16")]
            Self::F16(_) => DataType::F16,
            Self::F32(_) => DataType::F32,
        }
    }

    /// Element at buffer `index` as f64. Integer and fixed-point types
    /// return the raw stored integer.
    #[must_use]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        Some(match self {
            Self::U8(v) => f64::from(*v.get(index)?),
            Self::S16(v) | Self::QS16(v) => f64::from(*v.get(index)?),
            Self::QS8(v) => f64::from(*v.get(index)?),
            #[cfg(feature = "fp16")]
            Self::F16(v) => f64::from(*v.get(index)?),
            Self::F32(v) => f64::from(*v.get(index)?),
        })
    }

    /// Stores `value` at `index` with a saturating float-to-storage cast.
    /// Returns `false` when `index` is out of range.
    pub fn set_f64(&mut self, index: usize, value: f64) -> bool {
        if index >= self.len() {
            return false;
        }
        match self {
            Self::U8(v) => v[index] = value as u8,
            Self::S16(v) | Self::QS16(v) => v[index] = value as i16,
            Self::QS8(v) => v[index] = value as i8,
            #[cfg(feature = "fp16")]
            Self::F16(v) => v[index] = half::f16::from_f64(value),
            Self::F32(v) => v[index] = value as f32,
        }
        true
    }
}

/// A tensor: metadata plus a buffer that exists only after [`Tensor::allocate`].
///
/// Kernels extend the padding during configuration, so allocation is a
/// separate step that freezes the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    info: TensorInfo,
    buffer: Option<TensorBuffer>,
}

impl Tensor {
    #[must_use]
    pub fn new(info: TensorInfo) -> Self {
        Self { info, buffer: None }
    }

    #[must_use]
    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut TensorInfo {
        &mut self.info
    }

    pub fn allocate(&mut self) -> Result<(), TensorError> {
        if self.buffer.is_some() {
            return Err(TensorError::AlreadyAllocated);
        }
        self.buffer = Some(TensorBuffer::zeros(
            self.info.data_type(),
            self.info.total_elements(),
        ));
        self.info.lock();
        Ok(())
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    #[must_use]
    pub fn buffer(&self) -> Option<&TensorBuffer> {
        self.buffer.as_ref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut TensorBuffer> {
        self.buffer.as_mut()
    }

    pub fn element_f64(&self, coord: &[usize]) -> Result<f64, TensorError> {
        let offset = self.info.offset_of(coord)?;
        let buffer = self.buffer.as_ref().ok_or(TensorError::NotAllocated)?;
        buffer
            .get_f64(offset)
            .ok_or(TensorError::OffsetOutOfBounds {
                offset,
                len: buffer.len(),
            })
    }

    /// Writes `values` (dense, `x` fastest) into the logical shape.
    pub fn import_values(&mut self, values: &[f64]) -> Result<(), TensorError> {
        let shape = self.info.shape().clone();
        let expected = shape.total_size();
        if values.len() != expected {
            return Err(TensorError::ValueCountMismatch {
                expected,
                actual: values.len(),
            });
        }
        let offsets = (0..shape.num_rows())
            .map(|row| self.info.row_offset(row))
            .collect::<Vec<_>>();
        let buffer = self.buffer.as_mut().ok_or(TensorError::NotAllocated)?;
        for (row_values, base) in values.chunks(shape.x()).zip(offsets) {
            for (i, &value) in row_values.iter().enumerate() {
                if !buffer.set_f64(base + i, value) {
                    return Err(TensorError::OffsetOutOfBounds {
                        offset: base + i,
                        len: buffer.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Reads the logical shape back as dense values, `x` fastest.
    pub fn export_values(&self) -> Result<Vec<f64>, TensorError> {
        let buffer = self.buffer.as_ref().ok_or(TensorError::NotAllocated)?;
        let shape = self.info.shape();
        let mut out = Vec::with_capacity(shape.total_size());
        for row in 0..shape.num_rows() {
            let base = self.info.row_offset(row);
            for i in 0..shape.x() {
                let value = buffer
                    .get_f64(base + i)
                    .ok_or(TensorError::OffsetOutOfBounds {
                        offset: base + i,
                        len: buffer.len(),
                    })?;
                out.push(value);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PaddingCalculator, PaddingSize, ShapeError, Tensor, TensorBuffer, TensorError, TensorInfo,
        TensorShape, ValidRegion, shape_to_valid_region,
    };
    use proptest::prelude::*;
    use tk_dtype::DataType;

    fn shape(dims: &[usize]) -> TensorShape {
        TensorShape::new(dims.to_vec()).expect("valid shape")
    }

    #[test]
    fn shape_rejects_empty_and_zero_dimensions() {
        assert_eq!(TensorShape::new(vec![]), Err(ShapeError::Empty));
        assert_eq!(
            TensorShape::new(vec![4, 0, 2]),
            Err(ShapeError::ZeroDimension { axis: 1 })
        );
        assert_eq!(
            TensorShape::new(vec![usize::MAX, 2]),
            Err(ShapeError::Overflow)
        );
    }

    #[test]
    fn shape_accessors() {
        let s = shape(&[27, 13, 2]);
        assert_eq!(s.x(), 27);
        assert_eq!(s.y(), 13);
        assert_eq!(s.dim(5), 1);
        assert_eq!(s.total_size(), 702);
        assert_eq!(s.num_rows(), 26);
        assert_eq!(s.to_string(), "27x13x2");
    }

    #[test]
    fn padding_rounds_x_up_to_vector_width() {
        assert_eq!(
            PaddingCalculator::new(7, 16).required_padding(),
            PaddingSize::new(0, 9, 0, 0)
        );
        assert_eq!(
            PaddingCalculator::new(27, 16).required_padding(),
            PaddingSize::new(0, 5, 0, 0)
        );
    }

    #[test]
    fn padding_is_zero_for_multiples_of_vector_width() {
        for x in [16, 32, 128, 1920] {
            assert!(PaddingCalculator::new(x, 16).required_padding().is_empty(), "{x}");
        }
    }

    #[test]
    fn padding_calculator_border_and_access_knobs() {
        let padding = PaddingCalculator::new(20, 8)
            .set_border_size(1)
            .required_padding();
        assert_eq!(padding, PaddingSize::new(1, 5, 1, 1));

        let padding = PaddingCalculator::new(16, 16)
            .set_accessed_elements(18)
            .required_padding();
        assert_eq!(padding.right, 2);

        let padding = PaddingCalculator::new(16, 16)
            .set_access_offset(2)
            .required_padding();
        assert_eq!(padding.left, 2);
        assert_eq!(padding.right, 0);
    }

    #[test]
    fn valid_region_covers_full_shape_at_origin() {
        let s = shape(&[7, 7]);
        let region = shape_to_valid_region(&s);
        assert_eq!(region.anchor(), &[0, 0]);
        assert_eq!(region.shape(), &s);
        assert_eq!(region.end(0), 7);
        assert_eq!(region, ValidRegion::new(vec![], s));
    }

    #[test]
    fn info_layout_follows_padding() {
        let mut info = TensorInfo::new(shape(&[7, 3, 2]), DataType::S16);
        assert_eq!(info.strides(), &[1, 7, 21]);
        assert_eq!(info.total_elements(), 42);

        let changed = info
            .extend_padding(PaddingCalculator::new(7, 16).required_padding())
            .expect("resizable");
        assert!(changed);
        assert_eq!(info.padded_shape(), vec![16, 3, 2]);
        assert_eq!(info.strides(), &[1, 16, 48]);
        assert_eq!(info.strides_in_bytes(), vec![2, 32, 96]);
        assert_eq!(info.total_size_bytes(), 192);
        assert_eq!(info.row_offset(4), 16 + 48);
        assert_eq!(info.offset_of(&[6, 1, 1]).expect("in bounds"), 6 + 16 + 48);
    }

    #[test]
    fn top_left_padding_moves_first_element() {
        let mut info = TensorInfo::new(shape(&[4]), DataType::F32);
        info.extend_padding(PaddingSize::uniform(1)).expect("resizable");
        assert_eq!(info.padded_shape(), vec![6, 3]);
        assert_eq!(info.offset_first_element(), 7);
        assert_eq!(info.offset_first_element_in_bytes(), 28);
    }

    #[test]
    fn padding_is_locked_after_allocation() {
        let mut tensor = Tensor::new(TensorInfo::new(shape(&[5]), DataType::U8));
        tensor.allocate().expect("allocate");
        assert!(!tensor.info().is_resizable());
        let err = tensor
            .info_mut()
            .extend_padding(PaddingSize::new(0, 11, 0, 0))
            .expect_err("locked");
        assert_eq!(err, TensorError::PaddingLocked);
        assert_eq!(tensor.allocate(), Err(TensorError::AlreadyAllocated));
    }

    #[test]
    fn import_export_skips_padding() {
        let mut info = TensorInfo::new(shape(&[3, 2]), DataType::U8);
        info.extend_padding(PaddingCalculator::new(3, 16).required_padding())
            .expect("resizable");
        let mut tensor = Tensor::new(info);
        assert_eq!(tensor.export_values(), Err(TensorError::NotAllocated));
        tensor.allocate().expect("allocate");
        tensor
            .import_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .expect("import");
        assert_eq!(
            tensor.export_values().expect("export"),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(tensor.element_f64(&[0, 1]).expect("element"), 4.0);
        assert_eq!(tensor.buffer().expect("buffer").len(), 32);
        assert_eq!(tensor.buffer().expect("buffer").get_f64(16), Some(4.0));

        let err = tensor.import_values(&[1.0]).expect_err("wrong count");
        assert_eq!(err.reason_code(), "tensor_value_count_mismatch");
    }

    #[test]
    fn buffer_smaller_than_layout_is_an_error() {
        let mut tensor = Tensor::new(TensorInfo::new(shape(&[4, 2]), DataType::S16));
        tensor.allocate().expect("allocate");
        if let Some(buffer) = tensor.buffer_mut() {
            *buffer = TensorBuffer::zeros(DataType::S16, 5);
        }

        let err = tensor.export_values().expect_err("short buffer");
        assert_eq!(err, TensorError::OffsetOutOfBounds { offset: 5, len: 5 });
        assert_eq!(err.reason_code(), "tensor_offset_out_of_bounds");

        let err = tensor.import_values(&[1.0; 8]).expect_err("short buffer");
        assert_eq!(err.reason_code(), "tensor_offset_out_of_bounds");

        let err = tensor.element_f64(&[1, 1]).expect_err("short buffer");
        assert_eq!(err, TensorError::OffsetOutOfBounds { offset: 5, len: 5 });
        assert_eq!(tensor.element_f64(&[0, 1]).expect("in range"), 1.0);
        let err = tensor.element_f64(&[4, 0]).expect_err("outside shape");
        assert_eq!(err.reason_code(), "tensor_coordinate_out_of_bounds");
    }

    #[test]
    fn buffer_casts_saturate() {
        let mut buffer = TensorBuffer::zeros(DataType::U8, 2);
        assert!(buffer.set_f64(0, 300.0));
        assert!(buffer.set_f64(1, -4.0));
        assert!(!buffer.set_f64(2, 1.0));
        assert_eq!(buffer, TensorBuffer::U8(vec![255, 0]));
        assert_eq!(TensorBuffer::zeros(DataType::QS16, 3).data_type(), DataType::QS16);
    }

    proptest! {
        #[test]
        fn required_padding_matches_closed_form(x in 1usize..5000) {
            let padding = PaddingCalculator::new(x, 16).required_padding();
            prop_assert_eq!(padding.right, x.div_ceil(16) * 16 - x);
            prop_assert_eq!(padding.left, 0);
            prop_assert_eq!(padding.top, 0);
            prop_assert_eq!(padding.bottom, 0);
            prop_assert_eq!((x + padding.right) % 16, 0);
        }
    }
}

#![forbid(unsafe_code)]

//! Elementwise `output = input1 - input2` over padded tensors.
//!
//! The kernel follows a configure/allocate/run lifecycle: [`ArithmeticSubtraction::configure`]
//! checks the tensors, grows their padding so every row can be processed in
//! whole [`VECTOR_WIDTH`]-lane tiles and records the execution window;
//! the caller then allocates the tensors and calls [`ArithmeticSubtraction::run`].

use log::debug;
use tk_dtype::{
    ConvertPolicy, DataType, FixedPointError, FixedPointFormat, FloatElement, IntegerElement,
    subtraction_supported,
};
use tk_iter::{Window, WindowError};
use tk_ndarray::{
    PaddingCalculator, PaddingSize, Tensor, TensorBuffer, TensorInfo, TensorShape,
    shape_to_valid_region,
};
use tk_runtime::{ExecutionEvent, Scheduler, SchedulerError};

/// Lanes processed per tile.
pub const VECTOR_WIDTH: usize = 16;

pub const SUBTRACTION_REASON_CODES: [&str; 10] = [
    "subtraction_shape_mismatch",
    "subtraction_unsupported_data_types",
    "subtraction_fractional_bits_mismatch",
    "subtraction_invalid_fractional_bits",
    "subtraction_padding_locked",
    "subtraction_window_invalid",
    "subtraction_not_configured",
    "subtraction_tensor_not_allocated",
    "subtraction_tensor_mismatch",
    "subtraction_scheduler_failed",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("shape mismatch input1={input1} input2={input2} output={output}")]
    ShapeMismatch {
        input1: TensorShape,
        input2: TensorShape,
        output: TensorShape,
    },
    #[error("unsupported datatypes {input1} - {input2} -> {output}")]
    UnsupportedDataTypes {
        input1: DataType,
        input2: DataType,
        output: DataType,
    },
    #[error("fractional bits differ input1={input1} input2={input2} output={output}")]
    FractionalBitsMismatch { input1: u8, input2: u8, output: u8 },
    #[error("invalid fixed-point format: {0}")]
    InvalidFractionalBits(#[from] FixedPointError),
    #[error("{tensor} is allocated and its padding {have:?} does not cover {need:?}")]
    PaddingLocked {
        tensor: &'static str,
        have: PaddingSize,
        need: PaddingSize,
    },
    #[error("window error: {0}")]
    Window(#[from] WindowError),
}

impl ConfigurationError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ShapeMismatch { .. } => "subtraction_shape_mismatch",
            Self::UnsupportedDataTypes { .. } => "subtraction_unsupported_data_types",
            Self::FractionalBitsMismatch { .. } => "subtraction_fractional_bits_mismatch",
            Self::InvalidFractionalBits(_) => "subtraction_invalid_fractional_bits",
            Self::PaddingLocked { .. } => "subtraction_padding_locked",
            Self::Window(_) => "subtraction_window_invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("run() called before a successful configure()")]
    NotConfigured,
    #[error("{tensor} is not allocated")]
    NotAllocated { tensor: &'static str },
    #[error("{tensor} differs from the configured metadata: {detail}")]
    TensorMismatch { tensor: &'static str, detail: String },
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl ExecutionError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "subtraction_not_configured",
            Self::NotAllocated { .. } => "subtraction_tensor_not_allocated",
            Self::TensorMismatch { .. } => "subtraction_tensor_mismatch",
            Self::Scheduler(_) => "subtraction_scheduler_failed",
        }
    }
}

/// Code path selected by `configure` for a datatype triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubtractionPath {
    U8U8ToU8,
    U8U8ToS16,
    U8S16ToS16,
    S16U8ToS16,
    S16S16ToS16,
    QS8,
    QS16,
    #[cfg(feature = "fp16")]
    F16,
    F32,
}

impl SubtractionPath {
    #[must_use]
    pub fn select(input1: DataType, input2: DataType, output: DataType) -> Option<Self> {
        if !subtraction_supported(input1, input2, output) {
            return None;
        }
        Some(match (input1, input2, output) {
            (DataType::U8, DataType::U8, DataType::U8) => Self::U8U8ToU8,
            (DataType::U8, DataType::U8, _) => Self::U8U8ToS16,
            (DataType::U8, DataType::S16, _) => Self::U8S16ToS16,
            (DataType::S16, DataType::U8, _) => Self::S16U8ToS16,
            (DataType::S16, DataType::S16, _) => Self::S16S16ToS16,
            (DataType::QS8, ..) => Self::QS8,
            (DataType::QS16, ..) => Self::QS16,
            #[cfg(feature = "fp16")]
            (DataType::F16, ..) => Self::F16,
            _ => Self::F32,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::U8U8ToU8 => "u8_u8_u8",
            Self::U8U8ToS16 => "u8_u8_s16",
            Self::U8S16ToS16 => "u8_s16_s16",
            Self::S16U8ToS16 => "s16_u8_s16",
            Self::S16S16ToS16 => "s16_s16_s16",
            Self::QS8 => "qs8_qs8_qs8",
            Self::QS16 => "qs16_qs16_qs16",
            #[cfg(feature = "fp16")]
            Self::F16 => "f16_f16_f16",
            Self::F32 => "f32_f32_f32",
        }
    }

    #[must_use]
    pub const fn is_fixed_point(self) -> bool {
        matches!(self, Self::QS8 | Self::QS16)
    }
}

/// Padding a tensor of `shape` needs for this kernel.
#[must_use]
pub fn required_padding(shape: &TensorShape) -> PaddingSize {
    PaddingCalculator::new(shape.x(), VECTOR_WIDTH).required_padding()
}

fn covers(have: PaddingSize, need: PaddingSize) -> bool {
    have.top >= need.top
        && have.right >= need.right
        && have.bottom >= need.bottom
        && have.left >= need.left
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Configured {
    shape: TensorShape,
    data_types: [DataType; 3],
    fractional_bits: u8,
    padding: PaddingSize,
    window: Window,
    path: SubtractionPath,
    policy: ConvertPolicy,
}

impl Configured {
    fn check(
        &self,
        slot: usize,
        tensor: &'static str,
        info: &TensorInfo,
    ) -> Result<(), ExecutionError> {
        let mismatch = |detail: String| ExecutionError::TensorMismatch { tensor, detail };
        if info.shape() != &self.shape {
            return Err(mismatch(format!(
                "shape {} != configured {}",
                info.shape(),
                self.shape
            )));
        }
        if info.data_type() != self.data_types[slot] {
            return Err(mismatch(format!(
                "datatype {} != configured {}",
                info.data_type(),
                self.data_types[slot]
            )));
        }
        if self.path.is_fixed_point() && info.fractional_bits() != self.fractional_bits {
            return Err(mismatch(format!(
                "fractional bits {} != configured {}",
                info.fractional_bits(),
                self.fractional_bits
            )));
        }
        if !covers(info.padding(), self.padding) {
            return Err(mismatch(format!(
                "padding {:?} does not cover {:?}",
                info.padding(),
                self.padding
            )));
        }
        Ok(())
    }
}

/// `output = input1 - input2` with a convert policy applied on narrowing.
#[derive(Debug, Clone, Default)]
pub struct ArithmeticSubtraction {
    configured: Option<Configured>,
}

impl ArithmeticSubtraction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a configuration without touching the tensors.
    ///
    /// Every policy is accepted for every path; float paths ignore it.
    pub fn validate(
        input1: &TensorInfo,
        input2: &TensorInfo,
        output: &TensorInfo,
        policy: ConvertPolicy,
    ) -> Result<SubtractionPath, ConfigurationError> {
        if input1.shape() != output.shape() || input2.shape() != output.shape() {
            return Err(ConfigurationError::ShapeMismatch {
                input1: input1.shape().clone(),
                input2: input2.shape().clone(),
                output: output.shape().clone(),
            });
        }

        let path =
            SubtractionPath::select(input1.data_type(), input2.data_type(), output.data_type())
                .ok_or(ConfigurationError::UnsupportedDataTypes {
                    input1: input1.data_type(),
                    input2: input2.data_type(),
                    output: output.data_type(),
                })?;

        if path.is_fixed_point() {
            let bits = [
                input1.fractional_bits(),
                input2.fractional_bits(),
                output.fractional_bits(),
            ];
            if bits[0] != bits[1] || bits[1] != bits[2] {
                return Err(ConfigurationError::FractionalBitsMismatch {
                    input1: bits[0],
                    input2: bits[1],
                    output: bits[2],
                });
            }
            FixedPointFormat::new(output.data_type(), bits[2])?;
        }

        let need = required_padding(output.shape());
        for (tensor, info) in [("input1", input1), ("input2", input2), ("output", output)] {
            if !info.is_resizable() && !covers(info.padding(), need) {
                return Err(ConfigurationError::PaddingLocked {
                    tensor,
                    have: info.padding(),
                    need,
                });
            }
        }

        debug!(
            "subtraction validate ok: path={} policy={policy} shape={}",
            path.name(),
            output.shape()
        );
        Ok(path)
    }

    /// Validates the tensors, extends their padding to whole tiles and sets
    /// the output valid region to the full shape.
    ///
    /// On error nothing is modified and a previous configuration is kept.
    pub fn configure(
        &mut self,
        input1: &mut Tensor,
        input2: &mut Tensor,
        output: &mut Tensor,
        policy: ConvertPolicy,
    ) -> Result<(), ConfigurationError> {
        let path = Self::validate(input1.info(), input2.info(), output.info(), policy)?;
        let shape = output.info().shape().clone();
        let padding = required_padding(&shape);
        let region = shape_to_valid_region(&shape);
        let window = Window::calculate_max_window(&region, VECTOR_WIDTH)?;

        for (tensor, target) in [
            ("input1", &mut *input1),
            ("input2", &mut *input2),
            ("output", &mut *output),
        ] {
            let have = target.info().padding();
            target
                .info_mut()
                .extend_padding(padding)
                .map_err(|_| ConfigurationError::PaddingLocked {
                    tensor,
                    have,
                    need: padding,
                })?;
        }
        output.info_mut().set_valid_region(region);

        debug!(
            "subtraction configured: path={} policy={policy} shape={shape} padding={padding:?} steps={}",
            path.name(),
            window.num_steps()
        );
        self.configured = Some(Configured {
            shape,
            data_types: [
                input1.info().data_type(),
                input2.info().data_type(),
                output.info().data_type(),
            ],
            fractional_bits: if path.is_fixed_point() {
                output.info().fractional_bits()
            } else {
                0
            },
            padding,
            window,
            path,
            policy,
        });
        Ok(())
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    #[must_use]
    pub fn path(&self) -> Option<SubtractionPath> {
        self.configured.as_ref().map(|c| c.path)
    }

    #[must_use]
    pub fn policy(&self) -> Option<ConvertPolicy> {
        self.configured.as_ref().map(|c| c.policy)
    }

    #[must_use]
    pub fn window(&self) -> Option<&Window> {
        self.configured.as_ref().map(|c| &c.window)
    }

    #[must_use]
    pub fn padding(&self) -> Option<PaddingSize> {
        self.configured.as_ref().map(|c| c.padding)
    }

    /// Runs on the process-wide scheduler.
    ///
    /// The output is borrowed exclusively, so it can never alias an input.
    pub fn run(
        &self,
        input1: &Tensor,
        input2: &Tensor,
        output: &mut Tensor,
    ) -> Result<(), ExecutionError> {
        self.run_on(Scheduler::global()?, input1, input2, output)
            .map(|_| ())
    }

    pub fn run_on(
        &self,
        scheduler: &Scheduler,
        input1: &Tensor,
        input2: &Tensor,
        output: &mut Tensor,
    ) -> Result<ExecutionEvent, ExecutionError> {
        let configured = self.configured.as_ref().ok_or(ExecutionError::NotConfigured)?;
        let slots = [("input1", &*input1), ("input2", &*input2), ("output", &*output)];
        for (tensor, target) in slots {
            if !target.is_allocated() {
                return Err(ExecutionError::NotAllocated { tensor });
            }
        }
        for (slot, (tensor, target)) in slots.into_iter().enumerate() {
            configured.check(slot, tensor, target.info())?;
        }

        let out_info = output.info().clone();
        let layout = RowLayout::new(configured, input1.info(), input2.info(), &out_info);
        let label = format!("sub_{}_{}", configured.path.name(), configured.policy.name());
        let policy = configured.policy;

        let a = input1
            .buffer()
            .ok_or(ExecutionError::NotAllocated { tensor: "input1" })?;
        let b = input2
            .buffer()
            .ok_or(ExecutionError::NotAllocated { tensor: "input2" })?;
        let out = output
            .buffer_mut()
            .ok_or(ExecutionError::NotAllocated { tensor: "output" })?;

        let event = match (a, b, out) {
            (TensorBuffer::U8(a), TensorBuffer::U8(b), TensorBuffer::U8(o)) => {
                run_integer(scheduler, &label, &layout, a, b, o, policy)
            }
            (TensorBuffer::U8(a), TensorBuffer::U8(b), TensorBuffer::S16(o)) => {
                run_integer(scheduler, &label, &layout, a, b, o, policy)
            }
            (TensorBuffer::U8(a), TensorBuffer::S16(b), TensorBuffer::S16(o)) => {
                run_integer(scheduler, &label, &layout, a, b, o, policy)
            }
            (TensorBuffer::S16(a), TensorBuffer::U8(b), TensorBuffer::S16(o)) => {
                run_integer(scheduler, &label, &layout, a, b, o, policy)
            }
            (TensorBuffer::S16(a), TensorBuffer::S16(b), TensorBuffer::S16(o)) => {
                run_integer(scheduler, &label, &layout, a, b, o, policy)
            }
            (TensorBuffer::QS8(a), TensorBuffer::QS8(b), TensorBuffer::QS8(o)) => {
                run_integer(scheduler, &label, &layout, a, b, o, policy)
            }
            (TensorBuffer::QS16(a), TensorBuffer::QS16(b), TensorBuffer::QS16(o)) => {
                run_integer(scheduler, &label, &layout, a, b, o, policy)
            }
            #[cfg(feature = "fp16")]
            (TensorBuffer::F16(a), TensorBuffer::F16(b), TensorBuffer::F16(o)) => {
                run_float(scheduler, &label, &layout, a, b, o)
            }
            (TensorBuffer::F32(a), TensorBuffer::F32(b), TensorBuffer::F32(o)) => {
                run_float(scheduler, &label, &layout, a, b, o)
            }
            _ => {
                return Err(ExecutionError::TensorMismatch {
                    tensor: "output",
                    detail: format!(
                        "buffers do not match configured path {}",
                        configured.path.name()
                    ),
                });
            }
        }?;

        debug!(
            "{label}: shape={} rows={} partitions={} elapsed_us={}",
            configured.shape, event.rows, event.partitions, event.elapsed_micros
        );
        Ok(event)
    }
}

/// Maps padded output rows onto logical rows and input row offsets.
struct RowLayout<'a> {
    extent: usize,
    rows_per_plane: usize,
    padded_rows_per_plane: usize,
    top: usize,
    out_left: usize,
    out_row_stride: usize,
    input1: &'a TensorInfo,
    input2: &'a TensorInfo,
}

impl<'a> RowLayout<'a> {
    fn new(
        configured: &Configured,
        input1: &'a TensorInfo,
        input2: &'a TensorInfo,
        output: &TensorInfo,
    ) -> Self {
        let padding = output.padding();
        let rows_per_plane = configured.shape.y();
        Self {
            extent: configured.window.x_extent(),
            rows_per_plane,
            padded_rows_per_plane: rows_per_plane + padding.top + padding.bottom,
            top: padding.top,
            out_left: padding.left,
            out_row_stride: output.row_stride(),
            input1,
            input2,
        }
    }

    /// Logical row of padded output row `padded`, `None` inside top/bottom
    /// padding.
    fn logical_row(&self, padded: usize) -> Option<usize> {
        let plane = padded / self.padded_rows_per_plane;
        let y = (padded % self.padded_rows_per_plane).checked_sub(self.top)?;
        (y < self.rows_per_plane).then_some(plane * self.rows_per_plane + y)
    }

    fn lanes<'s, T>(&self, info: &TensorInfo, buffer: &'s [T], row: usize) -> &'s [T] {
        let start = info.row_offset(row);
        &buffer[start..start + self.extent]
    }
}

trait NarrowPolicy {
    fn narrow<O: IntegerElement>(wide: i32) -> O;
}

struct Saturating;

struct Wrapping;

impl NarrowPolicy for Saturating {
    #[inline]
    fn narrow<O: IntegerElement>(wide: i32) -> O {
        O::saturate_from(wide)
    }
}

impl NarrowPolicy for Wrapping {
    #[inline]
    fn narrow<O: IntegerElement>(wide: i32) -> O {
        O::wrap_from(wide)
    }
}

fn run_integer<A, B, O>(
    scheduler: &Scheduler,
    label: &str,
    layout: &RowLayout<'_>,
    a: &[A],
    b: &[B],
    out: &mut [O],
    policy: ConvertPolicy,
) -> Result<ExecutionEvent, SchedulerError>
where
    A: IntegerElement,
    B: IntegerElement,
    O: IntegerElement,
{
    match policy {
        ConvertPolicy::Saturate => {
            subtract_integer_rows::<A, B, O, Saturating>(scheduler, label, layout, a, b, out)
        }
        ConvertPolicy::Wrap => {
            subtract_integer_rows::<A, B, O, Wrapping>(scheduler, label, layout, a, b, out)
        }
    }
}

fn subtract_integer_rows<A, B, O, P>(
    scheduler: &Scheduler,
    label: &str,
    layout: &RowLayout<'_>,
    a: &[A],
    b: &[B],
    out: &mut [O],
) -> Result<ExecutionEvent, SchedulerError>
where
    A: IntegerElement,
    B: IntegerElement,
    O: IntegerElement,
    P: NarrowPolicy,
{
    scheduler.for_each_partition(label, out, layout.out_row_stride, |rows, band| {
        for (padded, out_row) in rows.zip(band.chunks_mut(layout.out_row_stride)) {
            let Some(row) = layout.logical_row(padded) else {
                continue;
            };
            let lhs = layout.lanes(layout.input1, a, row);
            let rhs = layout.lanes(layout.input2, b, row);
            let dst = &mut out_row[layout.out_left..layout.out_left + layout.extent];
            for ((dst, lhs), rhs) in dst
                .chunks_exact_mut(VECTOR_WIDTH)
                .zip(lhs.chunks_exact(VECTOR_WIDTH))
                .zip(rhs.chunks_exact(VECTOR_WIDTH))
            {
                for lane in 0..VECTOR_WIDTH {
                    dst[lane] = P::narrow(lhs[lane].widen() - rhs[lane].widen());
                }
            }
        }
    })
}

fn run_float<T: FloatElement>(
    scheduler: &Scheduler,
    label: &str,
    layout: &RowLayout<'_>,
    a: &[T],
    b: &[T],
    out: &mut [T],
) -> Result<ExecutionEvent, SchedulerError> {
    scheduler.for_each_partition(label, out, layout.out_row_stride, |rows, band| {
        for (padded, out_row) in rows.zip(band.chunks_mut(layout.out_row_stride)) {
            let Some(row) = layout.logical_row(padded) else {
                continue;
            };
            let lhs = layout.lanes(layout.input1, a, row);
            let rhs = layout.lanes(layout.input2, b, row);
            let dst = &mut out_row[layout.out_left..layout.out_left + layout.extent];
            for ((dst, lhs), rhs) in dst
                .chunks_exact_mut(VECTOR_WIDTH)
                .zip(lhs.chunks_exact(VECTOR_WIDTH))
                .zip(rhs.chunks_exact(VECTOR_WIDTH))
            {
                for lane in 0..VECTOR_WIDTH {
                    dst[lane] = lhs[lane].sub(rhs[lane]);
                }
            }
        }
    })
}

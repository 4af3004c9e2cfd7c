#![forbid(unsafe_code)]

use std::ops::Range;

use tk_ndarray::ValidRegion;

/// One axis of an execution window: `start..end` visited in `step`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

impl Dimension {
    #[must_use]
    pub const fn new(start: usize, end: usize, step: usize) -> Self {
        Self { start, end, step }
    }

    #[must_use]
    pub fn num_iterations(&self) -> usize {
        if self.step == 0 {
            return 0;
        }
        self.end.saturating_sub(self.start).div_ceil(self.step)
    }

    /// Start of every step.
    pub fn steps(&self) -> impl Iterator<Item = usize> {
        let step = self.step.max(1);
        (self.start..self.end).step_by(step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("step must be > 0")]
    ZeroStep,
    #[error("window axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
}

impl WindowError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ZeroStep => "window_zero_step",
            Self::AxisOutOfRange { .. } => "window_axis_out_of_range",
        }
    }
}

/// Iteration space of a kernel over a tensor.
///
/// Axis 0 advances a whole vector per step, so its end is rounded up to a
/// multiple of the step and may reach into trailing padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    dims: Vec<Dimension>,
}

impl Window {
    /// Largest window over `region` processing `step_x` elements per step.
    pub fn calculate_max_window(region: &ValidRegion, step_x: usize) -> Result<Self, WindowError> {
        if step_x == 0 {
            return Err(WindowError::ZeroStep);
        }
        let rank = region.shape().num_dimensions();
        let dims = (0..rank)
            .map(|axis| {
                let start = region.start(axis);
                if axis == 0 {
                    let len = region.shape().dim(0).div_ceil(step_x) * step_x;
                    Dimension::new(start, start + len, step_x)
                } else {
                    Dimension::new(start, region.end(axis), 1)
                }
            })
            .collect();
        Ok(Self { dims })
    }

    #[must_use]
    pub fn num_dimensions(&self) -> usize {
        self.dims.len()
    }

    pub fn dimension(&self, axis: usize) -> Result<Dimension, WindowError> {
        self.dims
            .get(axis)
            .copied()
            .ok_or(WindowError::AxisOutOfRange {
                axis,
                rank: self.dims.len(),
            })
    }

    #[must_use]
    pub fn x(&self) -> Dimension {
        self.dims[0]
    }

    /// Elements covered along `x`, including the rounded-up tail.
    #[must_use]
    pub fn x_extent(&self) -> usize {
        let x = self.x();
        x.end - x.start
    }

    /// Number of `x` rows, i.e. iterations over every axis above 0.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.dims[1..].iter().map(Dimension::num_iterations).product()
    }

    #[must_use]
    pub fn num_steps(&self) -> usize {
        self.x().num_iterations() * self.num_rows()
    }
}

/// Splits `0..total` into at most `parts` contiguous, non-empty ranges whose
/// lengths differ by at most one.
#[must_use]
pub fn partition(total: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, total.max(1));
    let base = total / parts;
    let extra = total % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0usize;
    for idx in 0..parts {
        let len = base + usize::from(idx < extra);
        if len == 0 {
            break;
        }
        out.push(start..start + len);
        start += len;
    }
    out
}

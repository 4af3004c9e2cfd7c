use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tk_dtype::{ConvertPolicy, DataType};
use tk_kernel::{ArithmeticSubtraction, ConfigurationError, ExecutionError};
use tk_ndarray::{Tensor, TensorError, TensorInfo, TensorShape};
use tk_runtime::{ExecutionEvent, Scheduler};

use crate::accessor::{read_tensor, write_tensor};
use crate::datasets::{DataTypeTriple, SubtractionCase};
use crate::reference::{self, SimpleTensor, round_to_data_type};

/// Float inputs are drawn from `[-FLOAT_FILL_BOUND, FLOAT_FILL_BOUND]`.
pub const FLOAT_FILL_BOUND: f32 = 1000.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FixtureError {
    #[error("configure failed: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("run failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("{0}")]
    Data(String),
}

impl FixtureError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Configuration(err) => err.reason_code(),
            Self::Execution(err) => err.reason_code(),
            Self::Tensor(err) => err.reason_code(),
            Self::Data(_) => "fixture_data_invalid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureOutcome {
    pub target: SimpleTensor,
    pub reference: SimpleTensor,
    pub event: ExecutionEvent,
}

/// Builds the three tensors of a case. `fractional_bits` is applied per
/// tensor and ignored for non fixed-point types.
#[must_use]
pub fn create_tensors(
    shape: &TensorShape,
    data_types: DataTypeTriple,
    fractional_bits: [u8; 3],
) -> [Tensor; 3] {
    let make = |data_type: DataType, bits: u8| {
        let info = if data_type.is_fixed_point() {
            TensorInfo::new_fixed_point(shape.clone(), data_type, bits)
        } else {
            TensorInfo::new(shape.clone(), data_type)
        };
        Tensor::new(info)
    };
    [
        make(data_types.input1, fractional_bits[0]),
        make(data_types.input2, fractional_bits[1]),
        make(data_types.output, fractional_bits[2]),
    ]
}

/// Uniform fill over the whole raw range of integer and fixed-point types
/// and over `[-FLOAT_FILL_BOUND, FLOAT_FILL_BOUND]` for floats.
pub fn fill_uniform<R: Rng>(
    rng: &mut R,
    shape: &TensorShape,
    data_type: DataType,
    fractional_bits: u8,
) -> SimpleTensor {
    let mut tensor = SimpleTensor::zeros(shape.clone(), data_type, fractional_bits);
    match data_type.int_range() {
        Some((lo, hi)) => {
            for value in tensor.values_mut() {
                *value = rng.gen_range(lo..=hi) as f64;
            }
        }
        None => {
            for value in tensor.values_mut() {
                let raw = rng.gen_range(-FLOAT_FILL_BOUND..=FLOAT_FILL_BOUND);
                *value = round_to_data_type(data_type, f64::from(raw));
            }
        }
    }
    tensor
}

/// Rejects raw integer or fixed-point codes that are fractional or fall
/// outside the container range. Storing them would clamp silently while the
/// reference computes from the unclamped value.
pub fn check_raw_values(name: &str, tensor: &SimpleTensor) -> Result<(), FixtureError> {
    let Some((lo, hi)) = tensor.data_type().int_range() else {
        return Ok(());
    };
    let bad = tensor
        .values()
        .iter()
        .position(|&v| v.fract() != 0.0 || v < lo as f64 || v > hi as f64);
    match bad {
        None => Ok(()),
        Some(index) => Err(FixtureError::Data(format!(
            "{name} value {} at {:?} is not a raw {} code in [{lo}, {hi}]",
            tensor.values()[index],
            tensor.coordinate(index),
            tensor.data_type()
        ))),
    }
}

/// Runs one case through the kernel and the reference.
pub struct SubtractionFixture<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> SubtractionFixture<'a> {
    #[must_use]
    pub fn new(scheduler: &'a Scheduler) -> Self {
        Self { scheduler }
    }

    /// Seeded random inputs. Both inputs come from one `StdRng` stream, so a
    /// `(case, seed)` pair always reproduces the same data.
    pub fn run(&self, case: &SubtractionCase, seed: u64) -> Result<FixtureOutcome, FixtureError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let bits = case.fractional_bits;
        let src1 = fill_uniform(&mut rng, &case.shape, case.data_types.input1, bits);
        let src2 = fill_uniform(&mut rng, &case.shape, case.data_types.input2, bits);
        self.run_with_inputs(case, &src1, &src2)
    }

    pub fn run_with_inputs(
        &self,
        case: &SubtractionCase,
        src1: &SimpleTensor,
        src2: &SimpleTensor,
    ) -> Result<FixtureOutcome, FixtureError> {
        check_raw_values("input1", src1)?;
        check_raw_values("input2", src2)?;
        let bits = case.fractional_bits;
        let [mut input1, mut input2, mut output] =
            create_tensors(&case.shape, case.data_types, [bits; 3]);

        let mut kernel = ArithmeticSubtraction::new();
        kernel.configure(&mut input1, &mut input2, &mut output, case.policy)?;
        input1.allocate()?;
        input2.allocate()?;
        output.allocate()?;

        write_tensor(&mut input1, src1).map_err(FixtureError::Data)?;
        write_tensor(&mut input2, src2).map_err(FixtureError::Data)?;

        let event = kernel.run_on(self.scheduler, &input1, &input2, &mut output)?;
        let target = read_tensor(&output).map_err(FixtureError::Data)?;
        let reference =
            reference::arithmetic_subtraction(src1, src2, case.data_types.output, case.policy)
                .map_err(FixtureError::Data)?;

        Ok(FixtureOutcome {
            target,
            reference,
            event,
        })
    }
}

/// Configures a kernel on fresh tensors and returns them for inspection.
pub fn configure_case(
    shape: &TensorShape,
    data_types: DataTypeTriple,
    fractional_bits: [u8; 3],
    policy: ConvertPolicy,
) -> Result<[Tensor; 3], ConfigurationError> {
    let [mut input1, mut input2, mut output] = create_tensors(shape, data_types, fractional_bits);
    ArithmeticSubtraction::new().configure(&mut input1, &mut input2, &mut output, policy)?;
    Ok([input1, input2, output])
}

#[cfg(test)]
mod tests {
    use super::{
        FixtureError, SubtractionFixture, check_raw_values, configure_case, fill_uniform,
    };
    use crate::reference::SimpleTensor;
    use crate::datasets::{DataTypeTriple, DatasetMode, SubtractionCase};
    use crate::validation::{Tolerance, validate_values};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tk_dtype::{ConvertPolicy, DataType};
    use tk_ndarray::{PaddingSize, TensorShape};
    use tk_runtime::Scheduler;

    fn case(
        dims: &[usize],
        data_types: DataTypeTriple,
        policy: ConvertPolicy,
        bits: u8,
    ) -> SubtractionCase {
        SubtractionCase {
            suite: "unit",
            shape: TensorShape::new(dims.to_vec()).expect("shape"),
            data_types,
            policy,
            fractional_bits: bits,
            mode: DatasetMode::Precommit,
        }
    }

    #[test]
    fn fill_covers_raw_ranges() {
        let shape = TensorShape::new(vec![4096]).expect("shape");
        let mut rng = StdRng::seed_from_u64(7);
        let qs8 = fill_uniform(&mut rng, &shape, DataType::QS8, 3);
        assert!(qs8.values().iter().all(|v| (-128.0..=127.0).contains(v)));
        assert!(qs8.values().iter().any(|&v| v < -100.0));
        assert!(qs8.values().iter().any(|&v| v > 100.0));
        assert_eq!(qs8.fractional_bits(), 3);

        let f32s = fill_uniform(&mut rng, &shape, DataType::F32, 0);
        assert!(f32s.values().iter().all(|v| v.abs() <= 1000.0));
        assert!(f32s.values().iter().all(|&v| f64::from(v as f32) == v));
    }

    #[test]
    fn same_seed_same_outcome() {
        let scheduler = Scheduler::global().expect("scheduler");
        let fixture = SubtractionFixture::new(scheduler);
        let s16 = DataTypeTriple::uniform(DataType::S16);
        let c = case(&[27, 13, 2], s16, ConvertPolicy::Wrap, 0);
        let a = fixture.run(&c, 11).expect("run a");
        let b = fixture.run(&c, 11).expect("run b");
        assert_eq!(a.target, b.target);
        let other = fixture.run(&c, 12).expect("run other");
        assert_ne!(a.reference, other.reference);
    }

    #[test]
    fn kernel_agrees_with_reference_for_every_family() {
        let scheduler = Scheduler::global().expect("scheduler");
        let fixture = SubtractionFixture::new(scheduler);
        let mut triples = vec![
            (DataTypeTriple::uniform(DataType::U8), 0),
            (DataTypeTriple::new(DataType::U8, DataType::U8, DataType::S16), 0),
            (DataTypeTriple::new(DataType::U8, DataType::S16, DataType::S16), 0),
            (DataTypeTriple::new(DataType::S16, DataType::U8, DataType::S16), 0),
            (DataTypeTriple::uniform(DataType::S16), 0),
            (DataTypeTriple::uniform(DataType::QS8), 5),
            (DataTypeTriple::uniform(DataType::QS16), 11),
            (DataTypeTriple::uniform(DataType::F32), 0),
        ];
        #[cfg(feature = "fp16")]
        triples.push((DataTypeTriple::uniform(DataType::F16), 0));

        for (data_types, bits) in triples {
            for policy in ConvertPolicy::ALL {
                let c = case(&[37, 5], data_types, policy, bits);
                let outcome = fixture.run(&c, 3).expect("fixture run");
                validate_values(&outcome.target, &outcome.reference, Tolerance::exact())
                    .unwrap_or_else(|err| panic!("{}: {err}", c.id()));
            }
        }
    }

    #[test]
    fn out_of_range_raw_inputs_are_rejected_before_running() {
        let scheduler = Scheduler::global().expect("scheduler");
        let fixture = SubtractionFixture::new(scheduler);
        let c = case(
            &[2],
            DataTypeTriple::uniform(DataType::U8),
            ConvertPolicy::Saturate,
            0,
        );
        let shape = TensorShape::new(vec![2]).expect("shape");
        let good =
            SimpleTensor::new(shape.clone(), DataType::U8, 0, vec![1.0, 2.0]).expect("good");
        let too_big =
            SimpleTensor::new(shape.clone(), DataType::U8, 0, vec![300.0, 2.0]).expect("big");

        let err = fixture
            .run_with_inputs(&c, &too_big, &good)
            .expect_err("300 is not a U8 code");
        assert_eq!(err.reason_code(), "fixture_data_invalid");
        assert!(err.to_string().contains("input1"));

        let fractional =
            SimpleTensor::new(shape.clone(), DataType::QS8, 3, vec![1.5, 0.0]).expect("qs8");
        assert!(check_raw_values("input2", &fractional).is_err());
        let floats = SimpleTensor::new(shape, DataType::F32, 0, vec![1.5, 1e9]).expect("f32");
        check_raw_values("input1", &floats).expect("floats are not range checked");
        check_raw_values("input1", &good).expect("in range");
    }

    #[test]
    fn configure_case_reports_padding_and_errors() {
        let shape = TensorShape::new(vec![27, 13, 2]).expect("shape");
        let tensors = configure_case(
            &shape,
            DataTypeTriple::uniform(DataType::F32),
            [0; 3],
            ConvertPolicy::Saturate,
        )
        .expect("configure");
        for tensor in &tensors {
            assert_eq!(tensor.info().padding(), PaddingSize::new(0, 5, 0, 0));
        }

        let err = configure_case(
            &shape,
            DataTypeTriple::uniform(DataType::QS16),
            [3, 3, 4],
            ConvertPolicy::Saturate,
        )
        .expect_err("fractional bits mismatch");
        assert_eq!(
            FixtureError::from(err).reason_code(),
            "subtraction_fractional_bits_mismatch"
        );
    }
}

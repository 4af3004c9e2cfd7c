//! Test-case tables for the subtraction suites.
//!
//! Everything here is a pure factory; suites enumerate cases with
//! [`combine`] the same way for every datatype family.

use std::fmt;

use tk_dtype::{ConvertPolicy, DataType};
use tk_ndarray::TensorShape;

/// Which cases a run selects. A case tagged `All` runs in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetMode {
    Precommit,
    Nightly,
    All,
}

impl DatasetMode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Precommit => "precommit",
            Self::Nightly => "nightly",
            Self::All => "all",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "precommit" => Some(Self::Precommit),
            "nightly" => Some(Self::Nightly),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Whether a run in `self` mode includes a case tagged `case_mode`.
    #[must_use]
    pub fn selects(self, case_mode: Self) -> bool {
        self == Self::All || case_mode == Self::All || self == case_mode
    }
}

impl fmt::Display for DatasetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataTypeTriple {
    pub input1: DataType,
    pub input2: DataType,
    pub output: DataType,
}

impl DataTypeTriple {
    #[must_use]
    pub const fn new(input1: DataType, input2: DataType, output: DataType) -> Self {
        Self {
            input1,
            input2,
            output,
        }
    }

    #[must_use]
    pub const fn uniform(data_type: DataType) -> Self {
        Self::new(data_type, data_type, data_type)
    }
}

impl fmt::Display for DataTypeTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.input1, self.input2, self.output)
    }
}

/// One kernel invocation to validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtractionCase {
    pub suite: &'static str,
    pub shape: TensorShape,
    pub data_types: DataTypeTriple,
    pub policy: ConvertPolicy,
    /// 0 unless the output is fixed-point.
    pub fractional_bits: u8,
    pub mode: DatasetMode,
}

impl SubtractionCase {
    #[must_use]
    pub fn id(&self) -> String {
        let mut id = format!(
            "{}/{}/{}/{}",
            self.suite, self.shape, self.data_types, self.policy
        );
        if self.data_types.output.is_fixed_point() {
            id.push_str(&format!("/fb{}", self.fractional_bits));
        }
        id
    }
}

/// Cartesian product, `lhs` outermost.
#[must_use]
pub fn combine<A: Clone, B: Clone>(lhs: &[A], rhs: &[B]) -> Vec<(A, B)> {
    lhs.iter()
        .flat_map(|a| rhs.iter().map(move |b| (a.clone(), b.clone())))
        .collect()
}

fn shapes(table: &[&[usize]]) -> Vec<TensorShape> {
    table
        .iter()
        .filter_map(|dims| TensorShape::new(dims.to_vec()).ok())
        .collect()
}

#[must_use]
pub fn small_shapes() -> Vec<TensorShape> {
    shapes(&[&[7, 7], &[27, 13, 2], &[128, 64, 1, 3]])
}

#[must_use]
pub fn large_shapes() -> Vec<TensorShape> {
    shapes(&[&[1920, 1080], &[1245, 652, 1, 3], &[4160, 3120]])
}

#[must_use]
pub fn convert_policies() -> Vec<ConvertPolicy> {
    ConvertPolicy::ALL.to_vec()
}

/// Every valid fractional-bit count for `data_type`; empty for non
/// fixed-point types.
#[must_use]
pub fn fractional_bits_range(data_type: DataType) -> Vec<u8> {
    data_type
        .max_fractional_bits()
        .map_or_else(Vec::new, |max| (1..=max).collect())
}

#[must_use]
pub fn u8_dataset() -> Vec<DataTypeTriple> {
    vec![DataTypeTriple::uniform(DataType::U8)]
}

#[must_use]
pub fn s16_dataset() -> Vec<DataTypeTriple> {
    [DataType::U8, DataType::S16]
        .into_iter()
        .map(|input1| DataTypeTriple::new(input1, DataType::S16, DataType::S16))
        .collect()
}

#[must_use]
pub fn qs8_dataset() -> Vec<DataTypeTriple> {
    vec![DataTypeTriple::uniform(DataType::QS8)]
}

#[must_use]
pub fn qs16_dataset() -> Vec<DataTypeTriple> {
    vec![DataTypeTriple::uniform(DataType::QS16)]
}

#[cfg(feature = "fp16")]
#[must_use]
pub fn f16_dataset() -> Vec<DataTypeTriple> {
    vec![DataTypeTriple::uniform(DataType::F16)]
}

#[must_use]
pub fn f32_dataset() -> Vec<DataTypeTriple> {
    vec![DataTypeTriple::uniform(DataType::F32)]
}

/// Value-suite table: datatype family, and the mode its small and large
/// shape runs are tagged with (`None` = not run).
struct ValueSuite {
    suite: &'static str,
    data_types: Vec<DataTypeTriple>,
    small: Option<DatasetMode>,
    large: Option<DatasetMode>,
}

fn value_suites() -> Vec<ValueSuite> {
    let mut suites = vec![
        ValueSuite {
            suite: "u8",
            data_types: u8_dataset(),
            small: Some(DatasetMode::Precommit),
            large: None,
        },
        ValueSuite {
            suite: "s16",
            data_types: s16_dataset(),
            small: Some(DatasetMode::Precommit),
            large: Some(DatasetMode::Nightly),
        },
        ValueSuite {
            suite: "qs8",
            data_types: qs8_dataset(),
            small: Some(DatasetMode::Precommit),
            large: Some(DatasetMode::Nightly),
        },
        ValueSuite {
            suite: "qs16",
            data_types: qs16_dataset(),
            small: Some(DatasetMode::Precommit),
            large: Some(DatasetMode::Nightly),
        },
    ];
    #[cfg(feature = "fp16")]
    suites.push(ValueSuite {
        suite: "f16",
        data_types: f16_dataset(),
        small: Some(DatasetMode::All),
        large: None,
    });
    suites.push(ValueSuite {
        suite: "f32",
        data_types: f32_dataset(),
        small: Some(DatasetMode::Precommit),
        large: Some(DatasetMode::Nightly),
    });
    suites
}

fn expand(
    suite: &'static str,
    shapes: &[TensorShape],
    data_types: &[DataTypeTriple],
    mode: DatasetMode,
) -> Vec<SubtractionCase> {
    combine(&combine(shapes, data_types), &convert_policies())
        .into_iter()
        .flat_map(|((shape, data_types), policy)| {
            let bits = match fractional_bits_range(data_types.output) {
                bits if bits.is_empty() => vec![0],
                bits => bits,
            };
            bits.into_iter().map(move |fractional_bits| SubtractionCase {
                suite,
                shape: shape.clone(),
                data_types,
                policy,
                fractional_bits,
                mode,
            })
        })
        .collect()
}

/// Kernel runs compared against the reference, filtered by `mode`.
#[must_use]
pub fn value_cases(mode: DatasetMode) -> Vec<SubtractionCase> {
    let mut cases = Vec::new();
    for suite in value_suites() {
        for (case_mode, shapes) in [(suite.small, small_shapes()), (suite.large, large_shapes())] {
            let Some(case_mode) = case_mode else {
                continue;
            };
            if mode.selects(case_mode) {
                cases.extend(expand(suite.suite, &shapes, &suite.data_types, case_mode));
            }
        }
    }
    cases
}

/// Configure-only checks over small and large shapes.
#[must_use]
pub fn configuration_cases() -> Vec<SubtractionCase> {
    let mut all_shapes = small_shapes();
    all_shapes.extend(large_shapes());
    [
        ("u8", u8_dataset()),
        ("s16", s16_dataset()),
        ("f32", f32_dataset()),
    ]
    .into_iter()
    .flat_map(|(suite, data_types)| expand(suite, &all_shapes, &data_types, DatasetMode::All))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        DataTypeTriple, DatasetMode, combine, configuration_cases, convert_policies,
        fractional_bits_range, large_shapes, s16_dataset, small_shapes, value_cases,
    };
    use tk_dtype::{ConvertPolicy, DataType};

    #[test]
    fn combine_is_a_cartesian_product() {
        let pairs = combine(&[1, 2], &['a', 'b', 'c']);
        assert_eq!(pairs.len(), 6);
        assert_eq!(pairs[0], (1, 'a'));
        assert_eq!(pairs[5], (2, 'c'));
        assert!(combine::<u8, u8>(&[], &[1]).is_empty());
    }

    #[test]
    fn shape_tables() {
        let small: Vec<String> = small_shapes().iter().map(ToString::to_string).collect();
        assert_eq!(small, vec!["7x7", "27x13x2", "128x64x1x3"]);
        assert_eq!(large_shapes().len(), 3);
        assert_eq!(
            convert_policies(),
            vec![ConvertPolicy::Saturate, ConvertPolicy::Wrap]
        );
    }

    #[test]
    fn fractional_bit_ranges() {
        assert_eq!(fractional_bits_range(DataType::QS8), (1..=7).collect::<Vec<u8>>());
        assert_eq!(fractional_bits_range(DataType::QS16).len(), 15);
        assert!(fractional_bits_range(DataType::F32).is_empty());
    }

    #[test]
    fn mode_selection() {
        assert!(DatasetMode::Precommit.selects(DatasetMode::Precommit));
        assert!(DatasetMode::Precommit.selects(DatasetMode::All));
        assert!(!DatasetMode::Precommit.selects(DatasetMode::Nightly));
        assert!(DatasetMode::All.selects(DatasetMode::Nightly));
        assert_eq!(DatasetMode::parse(" Nightly "), Some(DatasetMode::Nightly));
        assert_eq!(DatasetMode::parse("weekly"), None);
    }

    #[test]
    fn precommit_value_cases_use_small_shapes_only() {
        let cases = value_cases(DatasetMode::Precommit);
        let small = small_shapes();
        assert!(cases.iter().all(|case| small.contains(&case.shape)));

        let count = |suite: &str| cases.iter().filter(|c| c.suite == suite).count();
        assert_eq!(count("u8"), 3 * 2);
        assert_eq!(count("s16"), 3 * 2 * 2);
        assert_eq!(count("qs8"), 3 * 2 * 7);
        assert_eq!(count("qs16"), 3 * 2 * 15);
        assert_eq!(count("f32"), 3 * 2);
        #[cfg(feature = "fp16")]
        assert_eq!(count("f16"), 3 * 2);
    }

    #[test]
    fn nightly_adds_large_shapes_but_not_for_u8() {
        let cases = value_cases(DatasetMode::Nightly);
        let large = large_shapes();
        assert!(
            cases
                .iter()
                .filter(|c| c.mode == DatasetMode::Nightly)
                .all(|c| large.contains(&c.shape))
        );
        assert!(
            cases
                .iter()
                .filter(|c| c.mode == DatasetMode::All)
                .all(|c| c.suite == "f16")
        );
        assert!(cases.iter().any(|c| c.suite == "qs16"));
        assert!(cases.iter().all(|c| c.suite != "u8"));

        let all = value_cases(DatasetMode::All);
        assert_eq!(
            all.len(),
            value_cases(DatasetMode::Precommit).len() + cases.len()
                - all.iter().filter(|c| c.mode == DatasetMode::All).count()
        );
    }

    #[test]
    fn configuration_cases_cover_mixed_s16_inputs() {
        let cases = configuration_cases();
        assert_eq!(cases.len(), 6 * 2 + 6 * 2 * 2 + 6 * 2);
        assert_eq!(
            s16_dataset()[0],
            DataTypeTriple::new(DataType::U8, DataType::S16, DataType::S16)
        );
        assert!(cases.iter().all(|c| c.fractional_bits == 0));
        let id = cases[0].id();
        assert_eq!(id, "u8/7x7/U8-U8-U8/SATURATE");
    }

    #[test]
    fn fixed_point_case_ids_carry_fractional_bits() {
        let case = value_cases(DatasetMode::Precommit)
            .into_iter()
            .find(|c| c.suite == "qs8")
            .expect("qs8 case");
        assert_eq!(case.id(), "qs8/7x7/QS8-QS8-QS8/SATURATE/fb1");
    }
}

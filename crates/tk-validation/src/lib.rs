#![forbid(unsafe_code)]

pub mod accessor;
pub mod datasets;
pub mod fixture;
pub mod reference;
pub mod validation;

use crate::datasets::{DataTypeTriple, DatasetMode, SubtractionCase};
use crate::fixture::{SubtractionFixture, configure_case};
use crate::reference::SimpleTensor;
use crate::validation::{
    ToleranceConfig, ValidationMismatch, validate_padding, validate_valid_region, validate_values,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tk_dtype::{ConvertPolicy, DataType};
use tk_kernel::required_padding;
use tk_ndarray::{PaddingSize, TensorShape, shape_to_valid_region};
use tk_runtime::{ExecutionLedger, Scheduler, SchedulerConfig};

pub const DEFAULT_SEED: u64 = 0x5eed_2017;
pub const VALIDATION_LOG_ENV: &str = "TK_VALIDATION_LOG_PATH";
pub const SUBTRACTION_CASES_FILE: &str = "subtraction_cases.json";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub report_root: PathBuf,
    pub mode: DatasetMode,
    pub seed: u64,
    pub tolerance: ToleranceConfig,
    pub scheduler: SchedulerConfig,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let crate_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        Self {
            fixture_root: crate_root.join("fixtures"),
            report_root: crate_root.join("../../artifacts/reports"),
            mode: DatasetMode::Precommit,
            seed: DEFAULT_SEED,
            tolerance: ToleranceConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub case_count: usize,
    pub pass_count: usize,
    pub failures: Vec<String>,
}

impl SuiteReport {
    #[must_use]
    pub fn new(suite: &'static str) -> Self {
        Self {
            suite,
            case_count: 0,
            pass_count: 0,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.case_count == self.pass_count && self.failures.is_empty()
    }
}

/// One JSONL line per validated case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtractionLogEntry {
    pub suite: String,
    pub case_id: String,
    pub seed: u64,
    pub mode: String,
    pub data_types: String,
    pub policy: String,
    pub fractional_bits: u8,
    pub shape: Vec<usize>,
    pub reason_code: String,
    pub partitions: usize,
    pub threads: usize,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub schema_version: u8,
    pub generated_at_unix_ms: u128,
    pub mode: String,
    pub seed: u64,
    pub threads: usize,
    pub all_passed: bool,
    pub suites: Vec<SuiteReport>,
}

/// Explicit scenario from `subtraction_cases.json`. A non-empty
/// `expected_reason_code` means configuration must fail with that code.
#[derive(Debug, Clone, Deserialize)]
pub struct SubtractionFixtureCase {
    pub id: String,
    pub shape: Vec<usize>,
    pub input1_type: String,
    pub input2_type: String,
    pub output_type: String,
    pub policy: String,
    #[serde(default)]
    pub fractional_bits: Vec<u8>,
    #[serde(default)]
    pub input1: Vec<f64>,
    #[serde(default)]
    pub input2: Vec<f64>,
    #[serde(default)]
    pub expected: Vec<f64>,
    #[serde(default)]
    pub expected_padding: Option<[usize; 4]>,
    #[serde(default)]
    pub expected_reason_code: String,
}

impl SubtractionFixtureCase {
    #[must_use]
    pub fn expects_error(&self) -> bool {
        !self.expected_reason_code.trim().is_empty()
    }
}

static VALIDATION_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

/// Routes per-case JSONL records to `path`; `None` falls back to
/// `TK_VALIDATION_LOG_PATH`.
pub fn set_validation_log_path(path: Option<PathBuf>) {
    let cell = VALIDATION_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

fn maybe_append_validation_log(entry: &SubtractionLogEntry) -> Result<(), String> {
    let configured = VALIDATION_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    let from_env = std::env::var_os(VALIDATION_LOG_ENV).map(PathBuf::from);
    let Some(path) = configured.or(from_env) else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing validation log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload)
        .map_err(|err| format!("failed appending validation log {}: {err}", path.display()))
}

fn record_suite_check(report: &mut SuiteReport, passed: bool, failure: String) {
    report.case_count += 1;
    if passed {
        report.pass_count += 1;
    } else {
        report.failures.push(failure);
    }
}

fn build_scheduler(config: &HarnessConfig) -> Result<Scheduler, String> {
    Scheduler::new(config.scheduler)
        .map_err(|err| format!("failed building scheduler ({}): {err}", err.reason_code()))
}

fn log_entry(
    suite: &'static str,
    case: &SubtractionCase,
    seed: u64,
    mode: DatasetMode,
    reason_code: &str,
) -> SubtractionLogEntry {
    SubtractionLogEntry {
        suite: suite.to_string(),
        case_id: case.id(),
        seed,
        mode: mode.name().to_string(),
        data_types: case.data_types.to_string(),
        policy: case.policy.name().to_string(),
        fractional_bits: case.fractional_bits,
        shape: case.shape.dims().to_vec(),
        reason_code: reason_code.to_string(),
        partitions: 0,
        threads: 0,
        passed: reason_code.is_empty(),
    }
}

/// Configure-only checks: output valid region is the full shape and every
/// tensor carries exactly the padding of a 16-lane tile.
pub fn run_configuration_suite(config: &HarnessConfig) -> Result<SuiteReport, String> {
    let mut report = SuiteReport::new("subtraction_configuration");

    for case in datasets::configuration_cases() {
        let failure = match configure_case(
            &case.shape,
            case.data_types,
            [case.fractional_bits; 3],
            case.policy,
        ) {
            Ok([input1, input2, output]) => {
                let expected_padding = required_padding(&case.shape);
                validate_valid_region(
                    output.info().valid_region(),
                    &shape_to_valid_region(&case.shape),
                )
                .and_then(|()| validate_padding(input1.info().padding(), expected_padding))
                .and_then(|()| validate_padding(input2.info().padding(), expected_padding))
                .and_then(|()| validate_padding(output.info().padding(), expected_padding))
                .err()
                .map(|err| (err.reason_code(), err.to_string()))
            }
            Err(err) => Some((err.reason_code(), err.to_string())),
        };

        let reason_code = failure.as_ref().map_or("", |(code, _)| *code);
        maybe_append_validation_log(&log_entry(
            report.suite,
            &case,
            config.seed,
            config.mode,
            reason_code,
        ))?;
        let passed = failure.is_none();
        record_suite_check(
            &mut report,
            passed,
            failure.map_or_else(String::new, |(code, msg)| {
                format!("{}: {code}: {msg}", case.id())
            }),
        );
    }

    Ok(report)
}

/// Seeded kernel runs compared element-wise against the reference, over
/// the value cases selected by `config.mode`.
pub fn run_value_suite(config: &HarnessConfig) -> Result<SuiteReport, String> {
    let scheduler = build_scheduler(config)?;
    let fixture = SubtractionFixture::new(&scheduler);
    let mut ledger = ExecutionLedger::new();
    let mut report = SuiteReport::new("subtraction_values");

    for (idx, case) in datasets::value_cases(config.mode).iter().enumerate() {
        let seed = config.seed.wrapping_add(idx as u64);
        let mut entry = log_entry(report.suite, case, seed, config.mode, "");
        let result = fixture
            .run(case, seed)
            .map_err(|err| (err.reason_code(), err.to_string()))
            .and_then(|outcome| {
                entry.partitions = outcome.event.partitions;
                entry.threads = outcome.event.threads;
                ledger.record(outcome.event.clone());
                let tolerance = config.tolerance.for_data_type(case.data_types.output);
                validate_values(&outcome.target, &outcome.reference, tolerance)
                    .map_err(|err: ValidationMismatch| (err.reason_code(), err.to_string()))
            });

        if let Err((code, _)) = &result {
            entry.reason_code = (*code).to_string();
            entry.passed = false;
        }
        maybe_append_validation_log(&entry)?;
        record_suite_check(
            &mut report,
            result.is_ok(),
            result.err().map_or_else(String::new, |(code, msg)| {
                format!("{}: seed={seed} {code}: {msg}", case.id())
            }),
        );
    }

    debug!(
        "value suite: runs={} rows={} parallel_runs={}",
        ledger.events().len(),
        ledger.total_rows(),
        ledger.parallel_runs()
    );
    Ok(report)
}

pub fn load_subtraction_cases(path: &Path) -> Result<Vec<SubtractionFixtureCase>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed reading {}: {err}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|err| format!("invalid subtraction fixture json {}: {err}", path.display()))
}

fn parse_data_type(case_id: &str, raw: &str) -> Result<DataType, String> {
    DataType::parse(raw).ok_or_else(|| format!("{case_id}: unknown datatype {raw}"))
}

fn fractional_bits_triple(case_id: &str, raw: &[u8]) -> Result<[u8; 3], String> {
    match raw {
        [] => Ok([0; 3]),
        [bits] => Ok([*bits; 3]),
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(format!(
            "{case_id}: fractional_bits must have 1 or 3 entries, got {}",
            raw.len()
        )),
    }
}

/// Runs one explicit scenario; `Ok(None)` means it passed.
fn evaluate_fixture_case(
    fixture: &SubtractionFixture<'_>,
    config: &HarnessConfig,
    raw: &SubtractionFixtureCase,
) -> Result<(SubtractionCase, Option<(String, String)>), String> {
    let id = raw.id.as_str();
    let shape = TensorShape::new(raw.shape.clone()).map_err(|err| format!("{id}: {err}"))?;
    let data_types = DataTypeTriple::new(
        parse_data_type(id, &raw.input1_type)?,
        parse_data_type(id, &raw.input2_type)?,
        parse_data_type(id, &raw.output_type)?,
    );
    let policy = ConvertPolicy::parse(&raw.policy)
        .ok_or_else(|| format!("{id}: unknown convert policy {}", raw.policy))?;
    let bits = fractional_bits_triple(id, &raw.fractional_bits)?;
    let case = SubtractionCase {
        suite: "fixture",
        shape: shape.clone(),
        data_types,
        policy,
        fractional_bits: bits[2],
        mode: DatasetMode::All,
    };

    let expected_code = raw.expected_reason_code.trim();
    if !expected_code.is_empty() {
        let failure = match configure_case(&shape, data_types, bits, policy) {
            Ok(_) => Some((
                "fixture_expected_error_missing".to_string(),
                format!("expected {expected_code}, configure succeeded"),
            )),
            Err(err) if err.reason_code() == expected_code => None,
            Err(err) => Some((
                err.reason_code().to_string(),
                format!("expected {expected_code}, got {err}"),
            )),
        };
        return Ok((case, failure));
    }

    if let Some([top, right, bottom, left]) = raw.expected_padding {
        let expected = PaddingSize::new(top, right, bottom, left);
        let tensors = match configure_case(&shape, data_types, bits, policy) {
            Ok(tensors) => tensors,
            Err(err) => {
                return Ok((case, Some((err.reason_code().to_string(), err.to_string()))));
            }
        };
        for tensor in &tensors {
            if let Err(err) = validate_padding(tensor.info().padding(), expected) {
                return Ok((case, Some((err.reason_code().to_string(), err.to_string()))));
            }
        }
        if raw.expected.is_empty() {
            return Ok((case, None));
        }
    }

    let src1 = SimpleTensor::new(shape.clone(), data_types.input1, bits[0], raw.input1.clone())
        .map_err(|err| format!("{id}: input1 {err}"))?;
    let src2 = SimpleTensor::new(shape.clone(), data_types.input2, bits[1], raw.input2.clone())
        .map_err(|err| format!("{id}: input2 {err}"))?;
    let fixed_bits = if data_types.output.is_fixed_point() {
        bits[2]
    } else {
        0
    };
    let expected = SimpleTensor::new(shape, data_types.output, fixed_bits, raw.expected.clone())
        .map_err(|err| format!("{id}: expected {err}"))?;

    let outcome = match fixture.run_with_inputs(&case, &src1, &src2) {
        Ok(outcome) => outcome,
        Err(err) => {
            return Ok((case, Some((err.reason_code().to_string(), err.to_string()))));
        }
    };
    let tolerance = config.tolerance.for_data_type(data_types.output);
    let failure = validate_values(&outcome.target, &expected, tolerance)
        .and_then(|()| validate_values(&outcome.reference, &expected, tolerance))
        .err()
        .map(|err| (err.reason_code().to_string(), err.to_string()));
    Ok((case, failure))
}

/// Explicit scenarios with hand-written inputs and expected outputs or
/// expected configuration errors.
pub fn run_fixture_case_suite(config: &HarnessConfig) -> Result<SuiteReport, String> {
    let cases = load_subtraction_cases(&config.fixture_root.join(SUBTRACTION_CASES_FILE))?;
    let scheduler = build_scheduler(config)?;
    let fixture = SubtractionFixture::new(&scheduler);
    let mut report = SuiteReport::new("subtraction_fixture_cases");

    for case in cases {
        let (parsed, failure) = evaluate_fixture_case(&fixture, config, &case)?;
        let reason_code = failure.as_ref().map_or("", |(code, _)| code.as_str());
        let mut entry = log_entry(report.suite, &parsed, config.seed, config.mode, reason_code);
        entry.case_id.clone_from(&case.id);
        maybe_append_validation_log(&entry)?;
        record_suite_check(
            &mut report,
            failure.is_none(),
            failure.map_or_else(String::new, |(code, msg)| {
                format!("{}: {code}: {msg}", case.id)
            }),
        );
    }

    Ok(report)
}

pub fn run_all_core_suites(config: &HarnessConfig) -> Result<Vec<SuiteReport>, String> {
    let suites = vec![
        run_configuration_suite(config)?,
        run_fixture_case_suite(config)?,
        run_value_suite(config)?,
    ];
    for suite in &suites {
        info!(
            "{}: {}/{} passed",
            suite.suite, suite.pass_count, suite.case_count
        );
    }
    Ok(suites)
}

/// Report location used when the caller names none: a timestamped file
/// under `config.report_root`.
#[must_use]
pub fn default_report_path(config: &HarnessConfig, ts_millis: u128) -> PathBuf {
    config
        .report_root
        .join(format!("subtraction_validation_{ts_millis}.json"))
}

#[must_use]
pub fn build_validation_report(
    config: &HarnessConfig,
    suites: Vec<SuiteReport>,
) -> ValidationReport {
    let generated_at_unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let threads = Scheduler::new(config.scheduler).map_or(1, |s| s.num_threads());
    ValidationReport {
        schema_version: 1,
        generated_at_unix_ms,
        mode: config.mode.name().to_string(),
        seed: config.seed,
        threads,
        all_passed: suites.iter().all(SuiteReport::all_passed),
        suites,
    }
}

pub fn write_validation_report(path: &Path, report: &ValidationReport) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let raw = serde_json::to_string_pretty(report)
        .map_err(|err| format!("failed to serialize validation report: {err}"))?;
    fs::write(path, raw).map_err(|err| format!("failed writing {}: {err}", path.display()))
}

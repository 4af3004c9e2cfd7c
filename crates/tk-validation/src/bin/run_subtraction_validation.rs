#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tk_validation::datasets::DatasetMode;
use tk_validation::{
    HarnessConfig, build_validation_report, default_report_path, run_all_core_suites,
    set_validation_log_path, write_validation_report,
};

#[derive(Debug)]
struct RunOptions {
    mode: DatasetMode,
    seed: Option<u64>,
    threads: Option<usize>,
    log_path: PathBuf,
    report_path: Option<PathBuf>,
    ts_millis: u128,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("run_subtraction_validation failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args()?;
    let mut cfg = HarnessConfig::default_paths();
    cfg.mode = options.mode;
    if let Some(seed) = options.seed {
        cfg.seed = seed;
    }
    cfg.scheduler.num_threads = options.threads;

    set_validation_log_path(Some(options.log_path.clone()));
    let suites = run_all_core_suites(&cfg)?;
    let report = build_validation_report(&cfg, suites);

    let summary_json = serde_json::to_string_pretty(&report)
        .map_err(|err| format!("failed serializing summary: {err}"))?;
    let report_path = options
        .report_path
        .clone()
        .unwrap_or_else(|| default_report_path(&cfg, options.ts_millis));
    write_validation_report(&report_path, &report)?;
    println!("{summary_json}");
    eprintln!("validation log: {}", options.log_path.display());
    eprintln!("validation report: {}", report_path.display());

    if !report.all_passed {
        std::process::exit(2);
    }
    Ok(())
}

fn parse_args() -> Result<RunOptions, String> {
    let mut mode = DatasetMode::Precommit;
    let mut seed: Option<u64> = None;
    let mut threads: Option<usize> = None;
    let mut log_path: Option<PathBuf> = None;
    let mut report_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mode" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--mode requires a value".to_string())?;
                mode = DatasetMode::parse(&value)
                    .ok_or_else(|| format!("invalid --mode value '{value}'"))?;
            }
            "--seed" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--seed requires a value".to_string())?;
                seed = Some(
                    value
                        .parse::<u64>()
                        .map_err(|err| format!("invalid --seed value '{value}': {err}"))?,
                );
            }
            "--threads" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--threads requires a value".to_string())?;
                let parsed = value
                    .parse::<usize>()
                    .map_err(|err| format!("invalid --threads value '{value}': {err}"))?;
                if parsed == 0 {
                    return Err("--threads must be at least 1".to_string());
                }
                threads = Some(parsed);
            }
            "--log-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--log-path requires a value".to_string())?;
                log_path = Some(PathBuf::from(value));
            }
            "--report-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--report-path requires a value".to_string())?;
                report_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p tk-validation --bin run_subtraction_validation -- [--mode precommit|nightly|all] [--seed <u64>] [--threads <n>] [--log-path <path>] [--report-path <path>]"
                );
                std::process::exit(0);
            }
            unknown => return Err(format!("unknown argument: {unknown}")),
        }
    }

    let ts_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis());
    let log_path = log_path.unwrap_or_else(|| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../artifacts/logs")
            .join(format!("subtraction_validation_{ts_millis}.jsonl"))
    });

    Ok(RunOptions {
        mode,
        seed,
        threads,
        log_path,
        report_path,
        ts_millis,
    })
}

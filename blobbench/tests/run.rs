use std::process::{Command, Output};

use blobbench_harness::{Operation, ResultRow};
use blobbench_test::output::OutputDir;

const BLOBBENCH_EXE: &str = env!("CARGO_BIN_EXE_blobbench");

const HEADER: &str = "backend,blob_size_bytes,operation,batch_size,mean_duration_ms,\
    min_duration_ms,p50_duration_ms,p90_duration_ms,p99_duration_ms,max_duration_ms,\
    throughput_mib_s,trial_count,failure_count";

const SAMPLES_HEADER: &str =
    "backend,blob_size_bytes,operation,batch_size,trial,duration_ms,outcome";

/// Runs blobbench with the given in-memory backends, configured through the environment.
fn blobbench(backends: &[(&str, &[(&str, &str)])], args: &[&str]) -> Output {
    let mut command = Command::new(BLOBBENCH_EXE);
    command.env("RUST_LOG", "warn");

    for (name, options) in backends {
        let prefix = format!("BLOBBENCH__BACKENDS__{}", name.to_uppercase());
        command.env(format!("{prefix}__TYPE"), "memory");
        for (key, value) in *options {
            command.env(format!("{prefix}__{}", key.to_uppercase()), value);
        }
    }

    command
        .args(args)
        .output()
        .expect("Failed to spawn blobbench")
}

fn run_args<'a>(output: &'a OutputDir, extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![
        "run",
        "--size",
        "1KiB",
        "--size",
        "2KiB",
        "--trials",
        "4",
        "--warmups",
        "1",
        "--batch-size",
        "5",
        "--directory",
        output.path().to_str().unwrap(),
    ];
    args.extend_from_slice(extra);
    args
}

fn summary_rows(output: &OutputDir) -> Vec<ResultRow> {
    let summary = output.read_single("summary-");
    assert_eq!(summary.lines().next(), Some(HEADER));

    csv::Reader::from_reader(summary.as_bytes())
        .deserialize()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn assert_exit(output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn writes_summary_and_samples() {
    let output = OutputDir::new();
    let result = blobbench(
        &[
            ("fast", &[]),
            ("faulty", &[("fail_every_nth_write", "2")]),
        ],
        &run_args(&output, &[]),
    );
    assert_exit(&result, 0);

    let rows = summary_rows(&output);
    assert_eq!(rows.len(), 2 * 2 * 4);

    let faulty_writes: Vec<_> = rows
        .iter()
        .filter(|row| row.backend == "faulty" && row.operation == Operation::Write)
        .collect();
    assert_eq!(faulty_writes.len(), 2);
    for row in faulty_writes {
        assert_eq!(row.trial_count, 4);
        assert_eq!(row.failure_count, 2);
        assert!(row.has_data());
    }

    let batch = rows
        .iter()
        .find(|row| row.backend == "fast" && row.operation == Operation::BatchWrite)
        .unwrap();
    assert_eq!(batch.batch_size, 5);
    assert_eq!(batch.trial_count, 1);
    assert_eq!(batch.failure_count, 0);

    let samples = output.read_single("samples-");
    assert_eq!(samples.lines().next(), Some(SAMPLES_HEADER));
    // 4 writes and 4 reads plus one batch write and read, per backend and size
    assert_eq!(samples.lines().count(), 1 + 2 * 2 * 10);

    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("Results"));
}

#[test]
fn skips_unreachable_backend() {
    let output = OutputDir::new();
    let result = blobbench(
        &[("down", &[("fail_connect", "true")]), ("up", &[])],
        &run_args(&output, &[]),
    );
    assert_exit(&result, 0);

    let rows = summary_rows(&output);
    assert_eq!(rows.len(), 2 * 4);
    assert!(rows.iter().all(|row| row.backend == "up"));

    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("connection refused"));
}

#[test]
fn fails_without_any_backend() {
    let output = OutputDir::new();
    let result = blobbench(
        &[("down", &[("fail_connect", "true")])],
        &run_args(&output, &[]),
    );
    assert_exit(&result, 1);

    assert!(summary_rows(&output).is_empty());
}

#[test]
fn filters_backends() {
    let output = OutputDir::new();
    let result = blobbench(
        &[("one", &[]), ("two", &[])],
        &run_args(&output, &["--backend", "two"]),
    );
    assert_exit(&result, 0);

    let rows = summary_rows(&output);
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| row.backend == "two"));
}

#[test]
fn unknown_backend_is_a_config_error() {
    let output = OutputDir::new();
    let result = blobbench(&[("one", &[])], &run_args(&output, &["--backend", "nope"]));
    assert_exit(&result, 2);

    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("unknown backend"));
    assert!(output.files("").is_empty());
}

#[test]
fn invalid_sizes_are_a_config_error() {
    let output = OutputDir::new();
    let result = blobbench(
        &[("one", &[])],
        &[
            "run",
            "--size",
            "2KiB",
            "--size",
            "1KiB",
            "--directory",
            output.path().to_str().unwrap(),
        ],
    );
    assert_exit(&result, 2);
}

#[test]
fn dry_run_prints_plan() {
    let output = OutputDir::new();
    let result = blobbench(&[("one", &[])], &run_args(&output, &["--dry-run"]));
    assert_exit(&result, 0);

    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("Plan"));
    assert!(stdout.contains("(memory)"));
    assert!(output.files("").is_empty());
}

#[test]
fn dry_run_with_huge_sizes() {
    let result = blobbench(
        &[("one", &[])],
        &["run", "--start-power", "60", "--end-power", "63", "--dry-run"],
    );
    assert_exit(&result, 0);

    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("Plan"));
    assert!(stdout.contains("per backend"));
}

#[test]
fn compares_summary() {
    let output = OutputDir::new();
    let result = blobbench(&[("alpha", &[]), ("beta", &[])], &run_args(&output, &[]));
    assert_exit(&result, 0);

    let summary = output.files("summary-").remove(0);
    let result = blobbench(
        &[],
        &[
            "compare",
            summary.to_str().unwrap(),
            "--baseline",
            "beta",
            "--operation",
            "write",
        ],
    );
    assert_exit(&result, 0);

    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("beta"));
    assert!(stdout.contains("alpha"));
    assert!(!stdout.contains("batch_read"));
}

#[test]
fn rejects_unknown_arguments() {
    let result = blobbench(&[], &["run", "--frobnicate"]);
    assert_exit(&result, 2);
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use argh::FromArgs;
use blobbench_backends::build_adapter;
use blobbench_harness::{NamedAdapter, Operation, ResultWriter, RunLabel};
use bytesize::ByteSize;
use tracing::level_filters::LevelFilter;

use crate::compare::Comparison;
use crate::config::Config;
use crate::observability;
use crate::plan::Plan;
use crate::summary::Summary;

/// Benchmark writes and reads of binary blobs against several storage backends.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Compare(CompareCommand),
    Version(VersionCommand),
}

/// run the benchmark and write the results as CSV
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// smallest blob size as a power of two, 10 for 1 KiB
    #[argh(option)]
    start_power: Option<u32>,

    /// largest blob size as a power of two, 20 for 1 MiB
    #[argh(option)]
    end_power: Option<u32>,

    /// blob size such as `4KiB`, repeat for several sizes
    #[argh(option)]
    size: Vec<ByteSize>,

    /// blobs per batch operation
    #[argh(option)]
    batch_size: Option<usize>,

    /// measured trials per backend and size
    #[argh(option, short = 'n')]
    trials: Option<usize>,

    /// unmeasured warmup cycles per backend and size
    #[argh(option)]
    warmups: Option<usize>,

    /// measured batch cycles per backend and size
    #[argh(option)]
    batch_repetitions: Option<usize>,

    /// directory receiving the result files
    #[argh(option, short = 'd')]
    directory: Option<PathBuf>,

    /// only benchmark the named backend, repeat for several backends
    #[argh(option, short = 'b')]
    backend: Vec<String>,

    /// seed for blob contents
    #[argh(option)]
    seed: Option<u64>,

    /// timeout for every backend call, such as `10s`
    #[argh(option, from_str_fn(parse_duration))]
    timeout: Option<Duration>,

    /// do not compare read contents with what was written
    #[argh(switch)]
    no_verify: bool,

    /// print the plan without connecting to any backend
    #[argh(switch)]
    dry_run: bool,

    /// show progress bars and debug logs
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// only log warnings and errors
    #[argh(switch, short = 'q')]
    quiet: bool,
}

/// compare the mean durations in a summary file against one backend
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "compare")]
struct CompareCommand {
    /// path to a `summary-*.csv` file
    #[argh(positional)]
    summary: PathBuf,

    /// backend the others are compared to, defaults to the first by name
    #[argh(option)]
    baseline: Option<String>,

    /// only compare this operation
    #[argh(option)]
    operation: Option<Operation>,
}

/// print the blobbench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

impl RunCommand {
    /// Applies the command line flags on top of the loaded configuration.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if self.verbose && self.quiet {
            bail!("--verbose and --quiet cannot be combined");
        }

        let benchmark = &mut config.benchmark;
        let powers = self.start_power.is_some() || self.end_power.is_some();
        if powers && !self.size.is_empty() {
            bail!("--size cannot be combined with --start-power or --end-power");
        }
        if powers {
            let start = self.start_power.unwrap_or(10);
            let end = self.end_power.unwrap_or(20);
            if end >= u64::BITS {
                bail!("--end-power must be below {}", u64::BITS);
            }
            benchmark.sizes = blobbench_harness::BenchmarkConfig::power_of_two_sizes(start, end)
                .into_iter()
                .map(ByteSize::b)
                .collect();
        }
        if !self.size.is_empty() {
            benchmark.sizes = self.size.clone();
        }

        if let Some(batch_size) = self.batch_size {
            benchmark.batch_size = batch_size;
        }
        if let Some(trials) = self.trials {
            benchmark.trials = trials;
        }
        if let Some(warmups) = self.warmups {
            benchmark.warmups = warmups;
        }
        if let Some(batch_repetitions) = self.batch_repetitions {
            benchmark.batch_repetitions = batch_repetitions;
        }
        if let Some(directory) = &self.directory {
            benchmark.directory = directory.clone();
        }
        if self.seed.is_some() {
            benchmark.seed = self.seed;
        }
        if let Some(timeout) = self.timeout {
            benchmark.operation_timeout = timeout;
        }
        if self.no_verify {
            benchmark.verify = false;
        }

        if self.verbose {
            config.logging.level = LevelFilter::DEBUG;
        } else if self.quiet {
            config.logging.level = LevelFilter::WARN;
        }
        Ok(())
    }
}

/// Parses the command line and executes the command.
///
/// Returns the exit code for completed runs, or `2` for invalid arguments. Errors are configuration
/// or output problems.
pub fn execute() -> Result<ExitCode> {
    let strings: Vec<String> = std::env::args().collect();
    let strs: Vec<&str> = strings.iter().map(String::as_str).collect();
    let (command, rest) = match strs.split_first() {
        Some((command, rest)) => (*command, rest),
        None => ("blobbench", &[][..]),
    };

    let args = match Args::from_args(&[command], rest) {
        Ok(args) => args,
        Err(argh::EarlyExit { output, status }) => {
            return match status {
                Ok(()) => {
                    println!("{output}");
                    Ok(ExitCode::SUCCESS)
                }
                Err(()) => {
                    eprintln!("{output}");
                    Ok(ExitCode::from(2))
                }
            };
        }
    };

    match args.command {
        Command::Version(VersionCommand {}) => {
            println!("blobbench {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Compare(command) => {
            let comparison = Comparison::from_path(
                &command.summary,
                command.baseline.as_deref(),
                command.operation,
            )?;
            print!("{comparison}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(command) => run(args.config, command),
    }
}

fn run(config_path: Option<PathBuf>, command: RunCommand) -> Result<ExitCode> {
    let mut config = Config::load(config_path.as_deref()).context("failed to load config")?;
    command.apply(&mut config)?;

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    let benchmark = config.benchmark.to_harness(command.verbose);
    benchmark.validate().context("invalid benchmark parameters")?;

    let backends = config.select_backends(&command.backend)?;
    let plan = Plan::new(
        &benchmark,
        backends
            .iter()
            .map(|(name, backend)| (*name, backend.kind()))
            .collect(),
    );
    plan.log();

    if command.dry_run {
        print!("{plan}");
        return Ok(ExitCode::SUCCESS);
    }

    let adapters = backends
        .iter()
        .map(|(name, backend)| NamedAdapter::new(*name, build_adapter(backend)))
        .collect();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .thread_name("blobbench")
        .enable_all()
        .build()?;
    let label = RunLabel::now();
    let report = runtime.block_on(blobbench_harness::run(&benchmark, adapters))?;

    let writer = ResultWriter::new(&config.benchmark.directory, label);
    let rows = report.rows();
    let summary_path = writer.write(&rows).context("failed to write summary")?;
    let samples_path = writer
        .write_samples(report.measurements())
        .context("failed to write samples")?;

    print!("{}", Summary::new(&report, &rows));
    tracing::info!(
        summary = %summary_path.display(),
        samples = %samples_path.display(),
        "wrote results"
    );

    if report.has_successes() {
        tracing::info!(backends = ?report.successful_backends(), "benchmark finished");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("no backend completed a single operation");
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn overrides_sizes_with_powers() {
        let mut config = config();
        let command = RunCommand {
            start_power: Some(12),
            end_power: Some(14),
            ..Default::default()
        };
        command.apply(&mut config).unwrap();

        assert_eq!(
            config.benchmark.sizes,
            [ByteSize::kib(4), ByteSize::kib(8), ByteSize::kib(16)]
        );
    }

    #[test]
    fn explicit_sizes_keep_exact_values() {
        let mut config = config();
        let command = RunCommand {
            size: vec![ByteSize::b(1000), ByteSize::b(1500)],
            ..Default::default()
        };
        command.apply(&mut config).unwrap();

        let harness = config.benchmark.to_harness(false);
        assert_eq!(harness.sizes, [1000, 1500]);
    }

    #[test]
    fn rejects_conflicting_flags() {
        let command = RunCommand {
            size: vec![ByteSize::kib(1)],
            end_power: Some(12),
            ..Default::default()
        };
        assert!(command.apply(&mut config()).is_err());

        let command = RunCommand {
            verbose: true,
            quiet: true,
            ..Default::default()
        };
        assert!(command.apply(&mut config()).is_err());

        let command = RunCommand {
            end_power: Some(64),
            ..Default::default()
        };
        assert!(command.apply(&mut config()).is_err());
    }

    #[test]
    fn overrides_parameters() {
        let mut config = config();
        let command = RunCommand {
            batch_size: Some(5),
            trials: Some(3),
            warmups: Some(0),
            timeout: Some(Duration::from_secs(2)),
            no_verify: true,
            quiet: true,
            ..Default::default()
        };
        command.apply(&mut config).unwrap();

        assert_eq!(config.benchmark.batch_size, 5);
        assert_eq!(config.benchmark.trials, 3);
        assert_eq!(config.benchmark.warmups, 0);
        assert_eq!(config.benchmark.operation_timeout, Duration::from_secs(2));
        assert!(!config.benchmark.verify);
        assert_eq!(config.logging.level, LevelFilter::WARN);
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("1s 500ms"), Ok(Duration::from_millis(1500)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn parses_arguments() {
        let args = Args::from_args(
            &["blobbench"],
            &[
                "-c",
                "bench.yaml",
                "run",
                "--size",
                "4KiB",
                "-b",
                "local",
                "-b",
                "mongodb",
                "--dry-run",
            ],
        )
        .unwrap();

        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("bench.yaml")));
        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.size, [ByteSize::kib(4)]);
        assert_eq!(run.backend, ["local", "mongodb"]);
        assert!(run.dry_run);
    }

    #[test]
    fn parses_compare_arguments() {
        let args = Args::from_args(
            &["blobbench"],
            &["compare", "summary.csv", "--operation", "batch_read"],
        )
        .unwrap();

        let Command::Compare(compare) = args.command else {
            panic!("expected compare command");
        };
        assert_eq!(compare.operation, Some(Operation::BatchRead));
        assert_eq!(compare.baseline, None);
    }
}

//! Configuration for the benchmark.
//!
//! Configuration is layered with the following precedence (highest to lowest):
//!
//! 1. Command line flags of `blobbench run`
//! 2. Environment variables (prefixed with `BLOBBENCH__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `BLOBBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `BLOBBENCH__BENCHMARK__TRIALS=20` sets the number of trials
//! - `BLOBBENCH__BACKENDS__LOCAL__TYPE=memory` adds an in-memory backend named `local`
//! - `BLOBBENCH__BACKENDS__LOCAL__WRITE_LATENCY=2ms` configures its simulated latency
//!
//! # YAML Configuration File
//!
//! ```yaml
//! benchmark:
//!   sizes: [1KiB, 64KiB, 1MiB]
//!   trials: 20
//!
//! backends:
//!   reductstore:
//!     type: reductstore
//!     url: http://localhost:8383
//!     token: my-token
//! ```
//!
//! Without any configured backend, all four storage systems are benchmarked with their default
//! connection parameters on `localhost`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use blobbench_backends::{
    BackendConfig, MinioInfluxConfig, MongoConfig, ReductStoreConfig, TimescaleConfig,
};
use blobbench_harness::BenchmarkConfig;
use blobbench_harness::config::DEFAULT_OPERATION_TIMEOUT;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "BLOBBENCH__";

/// Parameters of the benchmark sweep.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Benchmark {
    /// Blob sizes, strictly ascending.
    ///
    /// Defaults to all powers of two from 1 KiB to 1 MiB.
    pub sizes: Vec<ByteSize>,
    /// Blobs per batch operation.
    pub batch_size: usize,
    /// Measured single write/read trials per backend and size.
    pub trials: usize,
    /// Unmeasured write/read cycles before the trials.
    pub warmups: usize,
    /// Measured batch cycles per backend and size.
    pub batch_repetitions: usize,
    /// Directory receiving the result files.
    pub directory: PathBuf,
    /// Compare read contents against what was written.
    pub verify: bool,
    /// Seed for blob contents. Random when unset.
    pub seed: Option<u64>,
    /// Upper bound for every single backend call.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for Benchmark {
    fn default() -> Self {
        Self {
            sizes: BenchmarkConfig::power_of_two_sizes(10, 20)
                .into_iter()
                .map(ByteSize::b)
                .collect(),
            batch_size: 1000,
            trials: 10,
            warmups: 1,
            batch_repetitions: 1,
            directory: PathBuf::from("results"),
            verify: true,
            seed: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl Benchmark {
    /// Converts into the parameters of the harness.
    pub fn to_harness(&self, verbose: bool) -> BenchmarkConfig {
        BenchmarkConfig {
            sizes: self.sizes.iter().map(|size| size.as_u64()).collect(),
            batch_size: self.batch_size,
            trials: self.trials,
            warmups: self.warmups,
            batch_repetitions: self.batch_repetitions,
            verify: self.verify,
            seed: self.seed,
            operation_timeout: self.operation_timeout,
            verbose,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr. `RUST_LOG` takes precedence over the level configured here.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct of the benchmark.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Parameters of the sweep.
    pub benchmark: Benchmark,

    /// Logging configuration.
    pub logging: Logging,

    /// Backends to benchmark by name, run in name order.
    pub backends: BTreeMap<String, BackendConfig>,
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `path`)
    /// 3. Environment variables (prefixed with `BLOBBENCH__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let mut config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        if config.backends.is_empty() {
            config.backends = default_backends();
        }

        Ok(config)
    }

    /// Returns the backends to benchmark, restricted to `names` unless empty.
    pub fn select_backends(&self, names: &[String]) -> Result<Vec<(&str, &BackendConfig)>> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.backends.contains_key(name.as_str()))
        {
            let known: Vec<_> = self.backends.keys().map(String::as_str).collect();
            bail!(
                "unknown backend {unknown:?}, configured are: {}",
                known.join(", ")
            );
        }

        Ok(self
            .backends
            .iter()
            .filter(|(name, _)| names.is_empty() || names.contains(*name))
            .map(|(name, config)| (name.as_str(), config))
            .collect())
    }
}

fn default_backends() -> BTreeMap<String, BackendConfig> {
    [
        BackendConfig::ReductStore(ReductStoreConfig::default()),
        BackendConfig::MinioInflux(MinioInfluxConfig::default()),
        BackendConfig::Timescale(TimescaleConfig::default()),
        BackendConfig::MongoDb(MongoConfig::default()),
    ]
    .into_iter()
    .map(|config| (config.kind().to_owned(), config))
    .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use blobbench_harness::MemoryConfig;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.benchmark.sizes.first(), Some(&ByteSize::kib(1)));
            assert_eq!(config.benchmark.sizes.last(), Some(&ByteSize::mib(1)));
            assert_eq!(config.benchmark.sizes.len(), 11);
            assert_eq!(config.benchmark.batch_size, 1000);
            assert_eq!(config.benchmark.directory, Path::new("results"));
            assert_eq!(config.logging.level, LevelFilter::INFO);

            let names: Vec<_> = config.backends.keys().map(String::as_str).collect();
            assert_eq!(names, ["minio_influx", "mongodb", "reductstore", "timescale"]);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BLOBBENCH__BENCHMARK__TRIALS", "3");
            jail.set_env("BLOBBENCH__BENCHMARK__OPERATION_TIMEOUT", "5s");
            jail.set_env("BLOBBENCH__LOGGING__LEVEL", "debug");
            jail.set_env("BLOBBENCH__LOGGING__FORMAT", "json");
            jail.set_env("BLOBBENCH__BACKENDS__LOCAL__TYPE", "memory");
            jail.set_env("BLOBBENCH__BACKENDS__LOCAL__WRITE_LATENCY", "2ms");
            jail.set_env("BLOBBENCH__BACKENDS__LOCAL__FAIL_EVERY_NTH_WRITE", "5");

            let config = Config::load(None).unwrap();

            assert_eq!(config.benchmark.trials, 3);
            assert_eq!(config.benchmark.operation_timeout, Duration::from_secs(5));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            assert_eq!(config.backends.len(), 1);
            let BackendConfig::Memory(MemoryConfig {
                write_latency,
                fail_every_nth_write,
                ..
            }) = &config.backends["local"]
            else {
                panic!("expected memory backend");
            };
            assert_eq!(*write_latency, Duration::from_millis(2));
            assert_eq!(*fail_every_nth_write, Some(5));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            benchmark:
                sizes: [1KiB, 4KiB, 1MiB]
                batch_size: 100
                seed: 42
            backends:
                reduct:
                    type: reductstore
                    url: http://reduct:8383
                    token: abcde
                mongo:
                    type: mongodb
                    database: bench
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(
                config.benchmark.sizes,
                [ByteSize::kib(1), ByteSize::kib(4), ByteSize::mib(1)]
            );
            assert_eq!(config.benchmark.batch_size, 100);
            assert_eq!(config.benchmark.seed, Some(42));

            let BackendConfig::ReductStore(reduct) = &dbg!(&config).backends["reduct"] else {
                panic!("expected reductstore backend");
            };
            assert_eq!(reduct.url, "http://reduct:8383");
            assert_eq!(reduct.token.as_ref().unwrap().expose_secret().as_str(), "abcde");

            let BackendConfig::MongoDb(mongo) = &config.backends["mongo"] else {
                panic!("expected mongodb backend");
            };
            assert_eq!(mongo.database, "bench");
            assert_eq!(mongo.collection, "blobs");

            Ok(())
        });
    }

    #[test]
    fn configured_with_env_and_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            benchmark:
                trials: 5
            backends:
                local:
                    type: memory
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("BLOBBENCH__BENCHMARK__TRIALS", "7");
            jail.set_env("BLOBBENCH__BACKENDS__LOCAL__READ_LATENCY", "1ms");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.benchmark.trials, 7);

            let BackendConfig::Memory(memory) = &config.backends["local"] else {
                panic!("expected memory backend");
            };
            assert_eq!(memory.read_latency, Duration::from_millis(1));

            Ok(())
        });
    }

    #[test]
    fn selects_backends() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            let all = config.select_backends(&[]).unwrap();
            assert_eq!(all.len(), 4);

            let selected = config
                .select_backends(&["mongodb".into(), "reductstore".into()])
                .unwrap();
            let names: Vec<_> = selected.iter().map(|(name, _)| *name).collect();
            assert_eq!(names, ["mongodb", "reductstore"]);

            let error = config.select_backends(&["cassandra".into()]).unwrap_err();
            assert!(error.to_string().contains("unknown backend \"cassandra\""));

            Ok(())
        });
    }

    #[test]
    fn converts_to_harness_config() {
        let benchmark = Benchmark {
            sizes: vec![ByteSize::b(1000), ByteSize::kib(2)],
            ..Default::default()
        };

        let config = benchmark.to_harness(true);
        assert_eq!(config.sizes, [1000, 2048]);
        assert!(config.verbose);
        assert!(config.validate().is_ok());
    }
}

//! crashwatch - builds cargo tests and supervises each test binary for crashes

use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use crashwatch::build::BuildOptions;
use crashwatch::common::config::{Config, ShowOutput};
use crashwatch::common::logging;
use crashwatch::harness::{self, HarnessOptions};

#[derive(Parser)]
#[command(name = "crashwatch", about = "Run cargo test binaries under a crash-detecting debugger")]
#[command(version, long_about = None)]
struct Cli {
    /// Features to enable (comma or space separated, repeatable)
    #[arg(long, short = 'F', value_name = "FEATURES")]
    features: Vec<String>,

    /// Enable all features
    #[arg(long)]
    all_features: bool,

    /// Disable default features
    #[arg(long)]
    no_default_features: bool,

    /// Only build and run tests of this package
    #[arg(long, short = 'p', value_name = "SPEC")]
    package: Option<String>,

    /// Build test binaries with the release profile
    #[arg(long)]
    release: bool,

    /// Configuration file (default: ./crashwatch.toml, then the user config)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debugger executable to use instead of searching for one
    #[arg(long, value_name = "PATH", conflicts_with = "no_debugger")]
    debugger: Option<PathBuf>,

    /// Run test binaries directly even if a debugger is available
    #[arg(long)]
    no_debugger: bool,

    /// Per-binary timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// When to echo captured test output
    #[arg(long, value_enum, value_name = "WHEN")]
    show_output: Option<ShowOutput>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Also write harness logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// `--features` came after `--all-features`; filled in from the matches
    #[arg(skip)]
    features_after_all: bool,
}

impl Cli {
    /// Parse the arguments, remembering the order of the feature flags
    fn from_matches(matches: &ArgMatches) -> Result<Self, clap::Error> {
        let mut cli = Self::from_arg_matches(matches)?;
        cli.features_after_all = features_after_all(matches);
        Ok(cli)
    }

    /// Command-line flags take precedence over the configuration file
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(path) = &self.debugger {
            config.debugger.path = Some(path.clone());
            config.debugger.disabled = false;
        }
        if self.no_debugger {
            config.debugger.disabled = true;
        }
        if let Some(secs) = self.timeout {
            config.run.timeout_secs = secs;
        }
        if let Some(show_output) = self.show_output {
            config.run.show_output = show_output;
        }
    }

    fn harness_options(&self) -> HarnessOptions {
        HarnessOptions {
            build: BuildOptions {
                features: self.features.clone(),
                all_features: self.all_features,
                features_after_all: self.features_after_all,
                no_default_features: self.no_default_features,
                package: self.package.clone(),
                release: self.release,
            },
            json: self.json,
        }
    }
}

/// Whether the last `--features` value follows `--all-features`
fn features_after_all(matches: &ArgMatches) -> bool {
    if matches.value_source("all_features") != Some(ValueSource::CommandLine) {
        return false;
    }
    let Some(all_index) = matches.index_of("all_features") else {
        return false;
    };
    matches
        .indices_of("features")
        .and_then(|indices| indices.max())
        .is_some_and(|last| last > all_index)
}

async fn run(cli: &Cli) -> crashwatch::Result<i32> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    harness::run(&config, &cli.harness_options()).await
}

#[tokio::main]
async fn main() {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_matches(&matches).unwrap_or_else(|e| e.exit());
    let log_guard = logging::init_cli(cli.verbose, cli.log_file.as_deref());

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    // process::exit skips destructors; flush the log file first
    drop(log_guard);
    std::process::exit(code);
}

/*!
 * aigate CLI - Command Line Interface
 */

use aigate::{
    config::{GateConfig, LogLevel},
    error::{GateError, Result, EXIT_SUCCESS},
    logging,
    resilience::Context,
    run_simulation, SimulationOptions, SimulationReport,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "aigate")]
#[command(version, about = "Backpressure-aware dispatch of inference requests", long_about = None)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Path to log file (default: stdout)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push synthetic requests through the queue and a simulated backend
    Simulate(SimulateArgs),

    /// Print or write the effective configuration as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SimulateArgs {
    /// Number of requests to submit
    #[arg(short = 'n', long, default_value = "100")]
    requests: usize,

    /// Probability that a single backend call fails (0.0 - 1.0)
    #[arg(long, default_value = "0.2")]
    failure_rate: f64,

    /// Simulated backend latency in milliseconds
    #[arg(long, default_value = "50")]
    latency_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => GateConfig::from_file(path)?,
        None => GateConfig::default(),
    };
    config.apply_env_overrides()?;

    // CLI flags win over file and environment
    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    if cli.log_file.is_some() {
        config.logging.file = cli.log_file.clone();
    }
    config.logging.verbose |= cli.verbose;
    config.validate()?;

    match cli.command {
        Commands::Config { output } => handle_config_command(&config, output),
        Commands::Simulate(args) => {
            if let Err(e) = logging::init_logging(&config.logging) {
                eprintln!("Warning: Failed to initialize logging: {}", e);
            }
            handle_simulate_command(&config, args)
        }
    }
}

fn handle_config_command(config: &GateConfig, output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            config.to_file(&path)?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}

fn handle_simulate_command(config: &GateConfig, args: SimulateArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(GateError::Config(format!(
            "--failure-rate must be between 0 and 1, got {}",
            args.failure_rate
        )));
    }

    let options = SimulationOptions {
        requests: args.requests,
        failure_rate: args.failure_rate,
        latency: Duration::from_millis(args.latency_ms),
        timeout: Duration::from_secs(args.timeout_secs),
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| GateError::Other(format!("Failed to start async runtime: {}", e)))?;

    let report = runtime.block_on(async {
        let ctx = Context::new();
        let interrupt = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, shutting down");
                interrupt.cancel();
            }
        });

        run_simulation(config, &options, &ctx).await
    })?;

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| GateError::Other(format!("Failed to encode report: {}", e)))?;
        println!("{}", json);
    } else {
        print_report(&report);
    }

    report.check()
}

fn print_report(report: &SimulationReport) {
    println!();
    println!("Simulation summary");
    println!("  Requested:     {}", report.requested);
    println!("  Submitted:     {}", report.submitted);
    println!("  Succeeded:     {}", report.succeeded);
    println!("  Failed:        {}", report.failed);
    println!("  Cancelled:     {}", report.cancelled);
    println!("  Unfinished:    {}", report.unfinished);
    println!("  Backend calls: {}", report.backend_calls);
    println!("  Elapsed:       {} ms", report.elapsed_ms);
}

use anyhow::Result;
use clap::Parser;
use ffwarden::app::EXIT_TERMINATED;
use ffwarden::{detect_container_id, run_passthrough, FfwardenConfig, FfwardenOrchestrator};
use std::path::Path;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "ffwarden")]
#[command(about = "Supervisor for long-running encoder processes")]
#[command(version)]
#[command(long_about = "Runs one encoder process, captures its output and progress reports \
into bounded memory, stops it when it stalls or degrades, and serves the captured \
telemetry over HTTP. Encoder arguments follow `--`; without them the encoder binary \
is run once without arguments and its output printed.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ffwarden.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the encoder")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Arguments passed to the encoder
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ENCODER_ARGS")]
    encoder_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let config = match FfwardenConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(EXIT_TERMINATED);
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(EXIT_TERMINATED);
            }
        }
    }
    config.validate()?;

    let container_id = detect_container_id();
    let logs_dir = config.logs_dir(&container_id, std::process::id());
    let guard = init_logging(&args, config.logs.wrapper_log.then_some(logs_dir.as_path()))?;

    info!("Starting ffwarden v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    if args.encoder_args.is_empty() {
        let exit_code = match run_passthrough(&config.process.binary).await {
            Ok(output) => {
                print!("{}", output);
                EXIT_TERMINATED
            }
            Err(e) => {
                error!("Failed to run {}: {}", config.process.binary, e);
                ffwarden::exit_code(&Err(e))
            }
        };
        std::process::exit(exit_code);
    }

    let encoder_args = args.encoder_args.join(" ");
    info!("Encoder arguments: {}", encoder_args);

    let mut orchestrator = FfwardenOrchestrator::new(config, encoder_args, container_id);

    let outcome = match orchestrator.initialize().await {
        Ok(()) => match orchestrator.start().await {
            Ok(()) => orchestrator.run().await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };
    if let Err(e) = &outcome {
        error!("ffwarden failed: {}", e);
    }

    let exit_code = orchestrator.shutdown(&outcome).await;
    info!("ffwarden exited with code: {}", exit_code);

    drop(guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args, wrapper_log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ffwarden={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    // Own log next to the encoder logs, as manager_<start>.log
    let (file_layer, guard) = match wrapper_log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_name = format!(
                "manager_{}.log",
                chrono::Local::now().format("%Y_%m_%d__%H_%M_%S")
            );
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# ffwarden configuration file");
    println!("# Every option with its default value; FFWARDEN_<SECTION>__<KEY> overrides any of them");
    println!();
    println!("{}", toml::to_string_pretty(&FfwardenConfig::default())?);
    Ok(())
}

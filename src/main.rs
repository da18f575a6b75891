use anyhow::{Context, Result};
use camwatch::{CameraRegistry, CamwatchConfig, CamwatchOrchestrator, FileCameraRegistry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "camwatch")]
#[command(about = "Multi-camera motion capture with deduplication and space-aware eviction")]
#[command(version)]
#[command(long_about = "Watches every registered camera for motion, saves the frames that \
show it, moves near-duplicate captures into cold storage and evicts cold images when the \
disk runs low on space.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camwatch.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without starting the pipeline")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - load configuration and registry but start nothing
    #[arg(long, help = "Show the cameras that would be started and exit")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture pipeline (default)
    Run,
    /// Manage the camera registry
    #[command(subcommand)]
    Cameras(CamerasCommand),
}

#[derive(Subcommand, Debug)]
enum CamerasCommand {
    /// List registered cameras
    List,
    /// Register a camera, or point an existing one at a new source
    Add { name: String, source: String },
    /// Remove a camera
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting camwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CamwatchConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    match args.command {
        Some(Command::Cameras(command)) => manage_cameras(&config, command).await,
        Some(Command::Run) | None => {
            if args.dry_run {
                return dry_run(&config).await;
            }
            run_pipeline(config).await
        }
    }
}

async fn run_pipeline(config: CamwatchConfig) -> Result<()> {
    let mut orchestrator = CamwatchOrchestrator::new(config)
        .await
        .context("Failed to create orchestrator")?;

    orchestrator
        .start()
        .await
        .context("Failed to start pipeline")?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("camwatch exited with code: {}", exit_code);

    // Exit with appropriate code for systemd
    std::process::exit(exit_code);
}

async fn dry_run(config: &CamwatchConfig) -> Result<()> {
    let registry = FileCameraRegistry::new(config.paths.registry_path());
    let cameras = registry
        .list()
        .await
        .context("Failed to read camera registry")?;

    println!("✓ Dry run: {} camera(s) would be started", cameras.len());
    for camera in &cameras {
        println!(
            "  {} -> {}",
            camera.name,
            config.paths.camera_dir(&camera.name).display()
        );
    }
    println!(
        "  cold storage: {}",
        config.paths.cold_storage_dir().display()
    );
    Ok(())
}

async fn manage_cameras(config: &CamwatchConfig, command: CamerasCommand) -> Result<()> {
    let registry = FileCameraRegistry::new(config.paths.registry_path());

    match command {
        CamerasCommand::List => {
            let cameras = registry.list().await?;
            if cameras.is_empty() {
                println!("No cameras registered");
            }
            for camera in cameras {
                // Display form masks credentials
                let shown = camwatch::SourceUri::parse(&camera.source)
                    .map(|uri| uri.to_string())
                    .unwrap_or(camera.source);
                println!("{}\t{}", camera.name, shown);
            }
        }
        CamerasCommand::Add { name, source } => {
            registry.save(&name, &source).await?;
            println!("✓ Camera '{}' saved", name.trim());
        }
        CamerasCommand::Remove { name } => {
            registry.delete(&name).await?;
            println!("✓ Camera '{}' removed", name);
        }
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    };

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
        .unwrap_or_else(|_| EnvFilter::new(format!("camwatch={}", log_level)));

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

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "camwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
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
    println!("# camwatch configuration file");
    println!("# This is the default configuration with all available options");
    println!("# Any value can be overridden with CAMWATCH_<SECTION>__<KEY>");
    println!();

    let rendered = toml::to_string_pretty(&CamwatchConfig::default())
        .context("Failed to render default configuration")?;
    println!("{}", rendered);
    Ok(())
}

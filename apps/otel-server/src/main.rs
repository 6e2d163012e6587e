use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modkit::{
    AxumAdapter, HttpOptions, ModuleRegistry, RegistryBuilder, RunOptions, ShutdownOptions,
    TelemetryProviders,
};
use otel_core::{AsyncOptions, OpenTelemetryModule, OpenTelemetryOptions};
use runtime::{AppConfig, AppConfigProvider, CliArgs};
use std::path::PathBuf;
use std::sync::Arc;

mod health;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// Adapter to make AppConfigProvider implement modkit::ConfigProvider
struct ModkitConfigAdapter(AppConfigProvider);

impl modkit::ConfigProvider for ModkitConfigAdapter {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.0.get_module_config(module_name)
    }
}

/// OtelKit Server - HTTP host with conditional OpenTelemetry integration
#[derive(Parser)]
#[command(name = "otel-server")]
#[command(about = "OtelKit Server - HTTP host with conditional OpenTelemetry integration")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Check configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    runtime::logging::init_logging_from_config(&logging_config, &config.home_dir());
    tracing::info!("OtelKit Server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

/// Registers every module the server hosts. The OpenTelemetry module resolves
/// its options from the `otel_core` config section when one is present.
fn build_registry(config: &AppConfig) -> Result<ModuleRegistry> {
    let mut builder = RegistryBuilder::new();

    let otel = if config.modules.contains_key(otel_core::MODULE_NAME) {
        OpenTelemetryModule::for_root_async(AsyncOptions::new().use_factory(|ctx| async move {
            ctx.module_config_required::<OpenTelemetryOptions>()
        }))?
    } else {
        tracing::warn!(
            module = otel_core::MODULE_NAME,
            "no config section, API and host metrics stay disabled"
        );
        OpenTelemetryModule::for_root(OpenTelemetryOptions::default())
    };
    otel.register(&mut builder);
    health::HealthModule.register(&mut builder);

    Ok(builder.build_topo_sorted()?)
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Initializing modules...");
    let registry = build_registry(&config)?;

    let addr = tokio::net::lookup_host((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("invalid bind address {}:{}", config.server.host, config.server.port))?
        .next()
        .ok_or_else(|| anyhow!("bind address {} did not resolve", config.server.host))?;

    let mut adapter = AxumAdapter::new();
    if let Some(prefix) = config.server.global_prefix.as_deref() {
        adapter = adapter.with_global_prefix(prefix);
    }

    let telemetry = TelemetryProviders::init(&config.telemetry.clone().unwrap_or_default())?;

    let run_options = RunOptions {
        modules_cfg: Arc::new(ModkitConfigAdapter(AppConfigProvider::new(config))),
        registry,
        http: Some(HttpOptions {
            bind_addr: addr,
            adapter,
        }),
        telemetry: Some(telemetry),
        shutdown: ShutdownOptions::Signals,
    };

    modkit::run(run_options).await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");

    if let Some(raw) = config.modules.get(otel_core::MODULE_NAME) {
        serde_json::from_value::<OpenTelemetryOptions>(raw.clone())
            .with_context(|| format!("invalid {} config", otel_core::MODULE_NAME))?;
    }
    let registry = build_registry(&config)?;
    tracing::info!(modules = registry.modules().len(), "Module graph is valid");

    println!("Configuration check passed");
    println!("{}", config.to_yaml()?);
    Ok(())
}

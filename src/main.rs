//! launchdeck - game library host with hot-reloadable plugins
//!
//! Loads plugin modules from the configured plugin directory and drives them
//! through a host session: inspection, an idle session with hot reload, or a
//! single game launch.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use launchdeck::config::ConfigManager;
use launchdeck::logging::{init_logging, LogFormat};
use launchdeck::models::{Emulator, Game};
use launchdeck::plugins::{
    HotReloadConfig, ModuleLoader, NativeModuleLoader, PluginHotReloader, PluginInfo, PluginManager,
};
use launchdeck::services::{
    ConsoleInteraction, GameLauncher, GameLibraryService, InMemoryEmulatorService, InMemoryGameLibrary,
    NullMediaScraper, ServiceRegistry,
};
use launchdeck::LaunchdeckConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// launchdeck - game library host CLI
#[derive(Parser)]
#[command(name = "launchdeck")]
#[command(about = "Game library host with a hot-reloadable native plugin runtime")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (overrides the configured level; RUST_LOG overrides both)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Plugin directory (overrides the configured one)
    #[arg(short, long)]
    plugin_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Plugin inspection
    Plugins {
        #[command(subcommand)]
        action: PluginCommands,
    },

    /// Run a host session until Ctrl-C
    Run {
        /// Watch the plugin directory and reload changed modules
        #[arg(long)]
        hot_reload: bool,
    },

    /// Launch one game with the given emulator
    Launch {
        /// Game file
        rom: PathBuf,

        /// Emulator executable
        #[arg(short, long)]
        emulator: PathBuf,

        /// Argument template; {0} stands for the game path
        #[arg(short, long)]
        args: Option<String>,

        /// Pass the game path without shell quoting
        #[arg(long)]
        no_quotes: bool,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// Load every plugin and list what registered
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the plugin types a module offers without loading them
    Inspect {
        /// Module file
        module: PathBuf,
    },
}

/// Host services and the plugin manager wired together
struct Host {
    manager: Arc<PluginManager>,
    launcher: Arc<GameLauncher>,
    library: Arc<InMemoryGameLibrary>,
}

impl Host {
    async fn start(config: &LaunchdeckConfig) -> Result<Self> {
        let library = Arc::new(InMemoryGameLibrary::new());
        let emulators = Arc::new(InMemoryEmulatorService::new());
        let launcher = Arc::new(GameLauncher::new(library.clone(), emulators.clone()));
        let services = Arc::new(ServiceRegistry::new(
            library.clone(),
            emulators,
            launcher.clone(),
            Arc::new(NullMediaScraper),
            Arc::new(ConsoleInteraction),
        ));

        let manager = Arc::new(
            PluginManager::with_native_loader(config.plugins.clone(), services)
                .await
                .context("Failed to create plugin manager")?,
        );
        launcher.set_plugin_manager(&manager);

        let summary = manager.load_all().await;
        for failure in &summary.failures {
            warn!("{:?}: {}", failure.path, failure.error);
        }
        info!(
            "{} plugins loaded from {} modules",
            summary.plugins_loaded, summary.modules_found
        );

        Ok(Self {
            manager,
            launcher,
            library,
        })
    }

    async fn shutdown(self) {
        self.manager.unload_all().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config_manager = ConfigManager::new(cli.config.clone()).context("Failed to load configuration")?;
    let config = config_manager.config_mut();
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }
    if let Some(plugin_dir) = cli.plugin_dir {
        config.plugins.plugin_dir = plugin_dir;
    }
    let config = config.clone();
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Plugins {
            action: PluginCommands::List { json },
        } => list_plugins(&config, json).await,
        Commands::Plugins {
            action: PluginCommands::Inspect { module },
        } => inspect_module(&module).await,
        Commands::Run { hot_reload } => run_session(&config, hot_reload).await,
        Commands::Launch {
            rom,
            emulator,
            args,
            no_quotes,
        } => launch(&config, rom, emulator, args, !no_quotes).await,
    }
}

async fn list_plugins(config: &LaunchdeckConfig, json: bool) -> Result<()> {
    let host = Host::start(config).await?;
    let plugins = host.manager.list_plugins().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
    } else if plugins.is_empty() {
        println!("No plugins found in {:?}", config.plugins.plugin_dir);
    } else {
        print_table(&plugins);
    }

    host.shutdown().await;
    Ok(())
}

fn print_table(plugins: &[PluginInfo]) {
    println!("{:<32} {:<10} {:<20} {:<9} SOURCE", "ID", "VERSION", "KIND", "STATE");
    for plugin in plugins {
        println!(
            "{:<32} {:<10} {:<20} {:<9} {}",
            plugin.descriptor.id,
            plugin.descriptor.version,
            plugin.kind.to_string(),
            format!("{:?}", plugin.state),
            plugin.source_path.display()
        );
    }
}

async fn inspect_module(module: &Path) -> Result<()> {
    let loader = NativeModuleLoader::new();
    let mut unit = loader
        .load_module(module)
        .await
        .with_context(|| format!("Failed to load {:?}", module))?;

    println!("{} offers {} plugin type(s)", unit.name(), unit.find_contract_types().len());
    for factory in unit.find_contract_types() {
        match unit.instantiate(factory) {
            Ok(instance) => {
                let d = instance.descriptor();
                println!("  {} -> {} v{} by {}", factory.type_name(), d.id, d.version, d.author);
                if !d.description.is_empty() {
                    println!("      {}", d.description);
                }
            }
            Err(e) => println!("  {} -> failed: {}", factory.type_name(), e),
        }
    }

    unit.unload();
    Ok(())
}

async fn run_session(config: &LaunchdeckConfig, hot_reload: bool) -> Result<()> {
    let host = Host::start(config).await?;

    let mut reload_config = HotReloadConfig::from(&config.plugins);
    reload_config.enabled |= hot_reload;
    let mut reloader = PluginHotReloader::new(reload_config, Arc::clone(&host.manager));
    reloader.start().await?;

    info!("Host session running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    reloader.stop();
    host.shutdown().await;
    Ok(())
}

async fn launch(
    config: &LaunchdeckConfig,
    rom: PathBuf,
    emulator_path: PathBuf,
    args: Option<String>,
    use_quotes: bool,
) -> Result<()> {
    let host = Host::start(config).await?;

    let title = rom
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "game".to_string());
    let game = host.library.add_game(Game::new(1, title, rom, 0)).await?;

    let emulator_name = emulator_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "emulator".to_string());
    let mut emulator = Emulator::new(1, emulator_name, emulator_path);
    emulator.command_line_arguments = args;
    emulator.use_quotes_for_path = use_quotes;

    let handle = host.launcher.launch_and_track(&game, Some(emulator)).await?;
    info!("{} started (pid {:?})", game.title, handle.pid());

    if let Some(report) = handle.wait().await {
        info!(
            "{} closed; {} plugins notified, {} failed",
            game.title,
            report.invoked,
            report.failed.len()
        );
    }

    host.shutdown().await;
    Ok(())
}

//! Main application entry point for the voxel server.
//!
//! Parses the command line, loads the configuration file, sets up logging
//! and runs the server until a termination signal arrives.

mod cli;
mod config;
mod signals;

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use voxel_server::GameServer;

/// Initialize logging system
fn setup_logging(config: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Owns the configuration and the server for the lifetime of the process.
pub struct Application {
    config: AppConfig,
    server: Arc<GameServer>,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if args.offline {
            config.auth.online_mode = false;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {}", e).into());
        }

        setup_logging(&config.logging)?;

        let server = GameServer::new(config.to_server_config()?)?;

        info!(
            "🧱 Voxel Server v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("UNK")
        );
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self {
            config,
            server: Arc::new(server),
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  🏷️ Name: {}", self.config.server.name);
        info!("  👥 Max players: {}", self.config.server.max_players);
        info!(
            "  🔐 Name verification: {}",
            if self.config.auth.online_mode { "on" } else { "off" }
        );
        for world in &self.config.worlds {
            info!(
                "  🌍 World {}: {}x{}x{}",
                world.name, world.width, world.height, world.length
            );
        }

        let mut server_task = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        info!("✅ Voxel Server is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            request = signals::stop_requested() => {
                let request = request?;
                info!("📡 Stop requested ({}), shutting down gracefully...", request);
                self.server.shutdown().await?;
            }
            finished = &mut server_task => {
                // Only reached when the server stopped without a signal.
                return Self::report(finished);
            }
        }

        Self::report(server_task.await)
    }

    fn report(
        finished: Result<Result<(), voxel_server::ServerError>, tokio::task::JoinError>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match finished {
            Ok(Ok(())) => {
                info!("✅ Voxel Server shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("❌ Server error: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("❌ Server task failed: {}", e);
                Err(e.into())
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

//! `telearm` – teleoperation server for a networked robot arm.
//!
//! This binary wires the stack together:
//!
//! 1. Loads `~/.telearm/config.toml` (defaults when absent) and initialises
//!    logging.
//! 2. Builds the [`EventBus`], the [`RobotLink`] and, if enabled, the camera
//!    [`FrameSource`] plus its [`FrameBroadcaster`].
//! 3. Serves the cockpit until **Ctrl-C**, then releases the link and the
//!    camera exactly once.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use telearm_cockpit::CockpitServer;
use telearm_hal::{RobotLink, SimCamera, SimController};
use telearm_middleware::EventBus;
use telearm_types::ArmError;
use telearm_vision::{FrameBroadcaster, FrameSource};

#[tokio::main]
async fn main() -> ExitCode {
    let telemetry = telemetry::init_tracing("telearm");
    if telemetry.is_exporting() {
        info!("exporting spans over OTLP");
    }

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => {
            println!(
                "  Config: {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let cancel = CancellationToken::new();
    install_ctrlc(cancel.clone());

    match run(cfg, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("\n{} {}", "Server error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(mut cfg: config::Config, cancel: CancellationToken) -> Result<(), ArmError> {
    let bus = Arc::new(EventBus::default());

    let sim = if cfg.robot.simulate {
        let sim = SimController::start().await?;
        cfg.robot.address = sim.address();
        println!(
            "  {} simulated controller on {}",
            "▶".cyan(),
            sim.address().bold()
        );
        Some(sim)
    } else {
        None
    };

    let link = Arc::new(RobotLink::new(cfg.robot.link_config(), bus.clone()));
    info!(address = %link.address(), "robot link ready");
    let mut services = Services::new(Arc::clone(&link), sim);

    if cfg.camera.enabled {
        let source = Arc::new(FrameSource::new(
            Box::new(SimCamera::new("camera0")),
            cfg.camera.frame_source_config(),
        ));
        match source.start().await {
            Ok(()) => {
                services.broadcaster = Some(FrameBroadcaster::spawn(
                    Arc::clone(&source),
                    bus.clone(),
                    cfg.server.broadcast_interval(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "camera failed to start; serving without video");
                println!("  {} camera unavailable: {}", "!".yellow().bold(), e);
            }
        }
        services.source = Some(source);
    }

    print_access_urls(cfg.server.port);
    println!("{}", "Starting server...".green());

    let result = CockpitServer::new(link, bus)
        .with_port(cfg.server.port)
        .run(cancel)
        .await;
    services.cleanup().await;
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

/// Everything that must be released on the way out.
///
/// [`cleanup`][Self::cleanup] releases it in order. If the owning future is
/// dropped or unwinds first, `Drop` performs a synchronous best-effort
/// teardown instead. Either way it happens once.
struct Services {
    link: Arc<RobotLink>,
    source: Option<Arc<FrameSource>>,
    broadcaster: Option<FrameBroadcaster>,
    sim: Option<SimController>,
    cleaned: bool,
}

impl Services {
    fn new(link: Arc<RobotLink>, sim: Option<SimController>) -> Self {
        Self {
            link,
            source: None,
            broadcaster: None,
            sim,
            cleaned: false,
        }
    }

    async fn cleanup(&mut self) {
        if std::mem::replace(&mut self.cleaned, true) {
            return;
        }
        println!("{}", "Cleaning up resources...".yellow());
        if let Some(broadcaster) = self.broadcaster.take() {
            broadcaster.stop().await;
        }
        if let Some(source) = self.source.take() {
            source.stop().await;
        }
        self.link.disconnect().await;
        if let Some(sim) = self.sim.take() {
            sim.shutdown();
        }
        info!("shutdown complete");
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        if std::mem::replace(&mut self.cleaned, true) {
            return;
        }
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.abort_now();
        }
        if let Some(source) = &self.source {
            source.abort_now();
        }
        self.link.shutdown_now();
    }
}

fn install_ctrlc(cancel: CancellationToken) {
    if let Err(e) = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            println!("{}", "  Forced exit.".red());
            std::process::exit(130);
        }
        println!();
        println!("{}", "Server shutdown requested".yellow().bold());
        cancel.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Console output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "=".repeat(50).cyan());
    println!(
        "  {} {}",
        "telearm".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot arm teleoperation server");
    println!("{}", "=".repeat(50).cyan());
    println!();
}

fn print_access_urls(port: u16) {
    println!();
    println!("{}", "Server can be accessed at:".green());
    println!("  {} http://localhost:{port}", "Local access:".yellow());
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces
                .iter()
                .filter(|i| !i.is_loopback() && i.ip().is_ipv4())
            {
                println!(
                    "  {} http://{}:{port}",
                    format!("Network access ({}):", iface.name).yellow(),
                    iface.ip()
                );
            }
        }
        Err(e) => warn!(error = %e, "could not list network interfaces"),
    }
    println!();
}

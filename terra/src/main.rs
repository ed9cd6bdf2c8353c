//! # TERRA System Supervisor
//!
//! Central coordinator for the on-vehicle stack. Loads configuration once,
//! constructs the event mesh and every subsystem task (leaves first), then
//! runs the 1 Hz supervision loop: per-module health, system status and
//! metrics publishing, and coordinated shutdown on SIGINT.

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use terra_common::clock::monotonic_ns;
use terra_common::config::{ConfigError, TerraConfig};
use terra_common::consts::{
    REQ_OPERATION_CANCEL, SUPERVISOR_RATE_HZ, TOPIC_MONITORING_METRICS, TOPIC_MONITORING_SYSTEM,
    TOPIC_MOTOR_COMMAND,
};
use terra_common::metrics::Metrics;
use terra_common::types::bus::BusMessage;
use terra_common::types::motor::MotorCommand;
use terra_common::types::status::{ModuleHealth, SystemStatus};
use terra_hal::drivers::simulation::{default_drivers, SimWorld};
use terra_hal::{spawn_driver, spawn_motor_endpoint};
use terra_link::server::{spawn_link_server, ServerMaterial};
use terra_mesh::{Mesh, RequestOutcome};

#[derive(Debug, Parser)]
#[command(name = "terra", about = "TERRA autonomous tractor supervisor")]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "terra.toml")]
    config: PathBuf,

    /// Override the configured log level (trace|debug|info|warn|error).
    #[arg(long)]
    log_level: Option<String>,
}

struct TerraSupervisor {
    mesh: Mesh,
    metrics: Metrics,
    modules: Vec<(&'static str, JoinHandle<()>)>,
    startup_ns: u64,
    metrics_interval_ms: u64,
}

impl TerraSupervisor {
    fn module_health(&self) -> BTreeMap<String, ModuleHealth> {
        self.modules
            .iter()
            .map(|(name, handle)| {
                let health = if handle.is_finished() {
                    ModuleHealth::Dead
                } else {
                    ModuleHealth::Healthy
                };
                (name.to_string(), health)
            })
            .collect()
    }

    /// 1 Hz supervision loop; returns when SIGINT arrives.
    async fn run(&mut self) {
        let mut heartbeat = tokio::time::interval(Duration::from_micros(
            1_000_000 / SUPERVISOR_RATE_HZ,
        ));
        let mut metrics_ticker =
            tokio::time::interval(Duration::from_millis(self.metrics_interval_ms));

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let modules = self.module_health();
                    for (name, health) in &modules {
                        if *health == ModuleHealth::Dead {
                            error!(module = name, "module task has died");
                        }
                    }
                    self.mesh.publish(
                        TOPIC_MONITORING_SYSTEM,
                        BusMessage::System(SystemStatus {
                            modules,
                            startup_ns: self.startup_ns,
                            timestamp_ns: monotonic_ns(),
                        }),
                    );
                }
                _ = metrics_ticker.tick() => {
                    self.mesh.publish(
                        TOPIC_MONITORING_METRICS,
                        BusMessage::Metrics(self.metrics.snapshot()),
                    );
                }
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("shutdown signal received"),
                        Err(e) => error!(error = %e, "signal handler failed"),
                    }
                    return;
                }
            }
        }
    }

    /// Coordinated wind-down: cancel the operation, zero the motors, give
    /// the tasks the cancel budget to settle, then abort what remains.
    async fn shutdown(&mut self, cancel_budget_ms: u64) {
        info!("shutting down");
        let outcome = self
            .mesh
            .request(
                REQ_OPERATION_CANCEL,
                BusMessage::Value(serde_json::json!({})),
                Duration::from_millis(cancel_budget_ms),
            )
            .await;
        if let RequestOutcome::HandlerError(e) = outcome {
            // "no operation to cancel" is the normal idle answer.
            info!(detail = e, "operation cancel");
        }
        self.mesh.publish(
            TOPIC_MOTOR_COMMAND,
            BusMessage::MotorCommand(MotorCommand::stop(monotonic_ns())),
        );
        tokio::time::sleep(Duration::from_millis(cancel_budget_ms)).await;
        for (name, handle) in &self.modules {
            if !handle.is_finished() {
                handle.abort();
            }
            info!(module = name, "stopped");
        }
    }
}

fn init_tracing(config: &TerraConfig, override_level: Option<&str>) {
    let level = override_level.unwrap_or(config.machine.log_level.as_filter());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match TerraConfig::load_validated(&args.config) {
        Ok(cfg) => cfg,
        Err(ConfigError::FileNotFound) => {
            eprintln!("configuration file not found: {}", args.config.display());
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };
    init_tracing(&config, args.log_level.as_deref());
    info!(machine = config.machine.name, "starting TERRA");

    let metrics = Metrics::new();
    let mesh = Mesh::new(metrics.clone());
    let world = SimWorld::new();

    let mut modules: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    // Leaves first: drivers and the motor endpoint.
    for driver in default_drivers(&world) {
        let name = driver.name();
        match spawn_driver(mesh.clone(), &config, driver) {
            Ok(handle) => modules.push((name, handle)),
            Err(e) => {
                error!(driver = name, error = %e, "driver init failed");
                std::process::exit(1);
            }
        }
    }
    modules.push((
        "motor_endpoint",
        spawn_motor_endpoint(mesh.clone(), &config, Some(world.clone())),
    ));

    // Estimation and planning.
    modules.push((
        "localisation",
        terra_nav::tasks::spawn_localisation(mesh.clone(), &config, metrics.clone()),
    ));
    modules.push((
        "obstacle_map",
        terra_nav::tasks::spawn_obstacle_map(mesh.clone(), &config),
    ));
    modules.push((
        "navigator",
        terra_nav::tasks::spawn_navigator(mesh.clone(), &config, metrics.clone()),
    ));

    // Control and safety. Failure to start either is fatal.
    modules.push((
        "motion_controller",
        terra_control_unit::tasks::spawn_motion_controller(mesh.clone(), &config),
    ));
    modules.push((
        "safety_monitor",
        terra_control_unit::tasks::spawn_safety_monitor(mesh.clone(), &config, metrics.clone()),
    ));

    modules.push((
        "implements",
        terra_implements::tasks::spawn_implements(mesh.clone(), &config),
    ));
    modules.push((
        "operation",
        terra_operation::tasks::spawn_operation(mesh.clone(), &config),
    ));

    // Outward-facing last.
    let material = match ServerMaterial::from_config(&config) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "link material failed to load");
            std::process::exit(1);
        }
    };
    match spawn_link_server(mesh.clone(), &config, metrics.clone(), material).await {
        Ok((handle, addr)) => {
            info!(%addr, "command channel up");
            modules.push(("link_server", handle));
        }
        Err(e) => {
            error!(error = %e, "link server failed to start");
            std::process::exit(1);
        }
    }

    info!(modules = modules.len(), "all subsystems started");

    let mut supervisor = TerraSupervisor {
        mesh,
        metrics,
        modules,
        startup_ns: monotonic_ns(),
        metrics_interval_ms: config.monitoring.metrics_interval_ms,
    };
    supervisor.run().await;
    supervisor.shutdown(config.operation.cancel_budget_ms).await;
    info!("bye");
}

//! Driver and motor endpoint tasks.
//!
//! Each driver gets its own tokio task woken by a timer at the driver's
//! rated frequency; the motor endpoint runs at the control rate and consumes
//! `motor.command` between ticks.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use terra_common::clock::monotonic_ns;
use terra_common::config::TerraConfig;
use terra_common::consts::{sensor_topic, CONTROL_RATE_HZ, TOPIC_MOTOR_COMMAND, TOPIC_MOTOR_STATUS};
use terra_common::types::bus::BusMessage;
use terra_common::types::sensor::SensorSample;
use terra_mesh::Mesh;

use crate::driver::SensorDriver;
use crate::drivers::simulation::SimWorld;
use crate::motor::MotorEndpoint;
use crate::HalError;

/// Spawn one sensor driver task publishing `sensor.<name>.updated`.
pub fn spawn_driver(
    mesh: Mesh,
    config: &TerraConfig,
    mut driver: Box<dyn SensorDriver>,
) -> Result<JoinHandle<()>, HalError> {
    driver.init(config)?;
    let name = driver.name();
    let topic = sensor_topic(name);
    let period = Duration::from_micros(1_000_000 / driver.rate_hz().max(1));
    info!(driver = name, rate_hz = driver.rate_hz(), "sensor driver started");

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Some(sample) = driver.sample(monotonic_ns()) {
                mesh.publish(&topic, BusMessage::Sensor(sample));
            }
        }
    }))
}

/// Spawn the motor bus endpoint task.
///
/// Consumes `motor.command`, ticks the endpoint at the control rate and
/// publishes `motor.status.updated`.
pub fn spawn_motor_endpoint(
    mesh: Mesh,
    config: &TerraConfig,
    world: Option<SimWorld>,
) -> JoinHandle<()> {
    let mut endpoint = MotorEndpoint::new(config, world);
    let (_sub, mut commands) = mesh.subscribe(TOPIC_MOTOR_COMMAND);
    let period = Duration::from_micros(1_000_000 / CONTROL_RATE_HZ);
    let dt = 1.0 / CONTROL_RATE_HZ as f64;
    info!("motor bus endpoint started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let sense_topic = sensor_topic("motor_sense");
        let mut tick_count: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_ns = monotonic_ns();
                    let status = endpoint.tick(dt, now_ns);
                    mesh.publish(TOPIC_MOTOR_STATUS, BusMessage::MotorStatus(status));
                    tick_count += 1;
                    // Electrical/thermal telemetry as sensor samples at 1 Hz.
                    if tick_count % CONTROL_RATE_HZ == 0 {
                        for motor in status.motors {
                            mesh.publish(
                                &sense_topic,
                                BusMessage::Sensor(SensorSample::MotorSense {
                                    wheel: motor.wheel,
                                    current_amps: motor.current_amps,
                                    temperature_c: motor.temperature_c,
                                    timestamp_ns: now_ns,
                                }),
                            );
                        }
                    }
                }
                msg = commands.recv() => match msg {
                    Some(envelope) => match envelope.payload {
                        BusMessage::MotorCommand(cmd) => endpoint.apply_command(&cmd),
                        other => warn!(kind = other.kind(), "unexpected payload on motor.command"),
                    },
                    // Mesh gone; nothing left to drive.
                    None => break,
                },
            }
        }
    })
}

//! The server end of the link.
//!
//! Accepts TCP connections, runs the mutual-attestation handshake, issues a
//! session bound to the client CN, admits commands through the
//! [`CommandVerifier`](crate::verify::CommandVerifier) and dispatches them
//! onto the mesh. Telemetry goes out on the configured cadence, immediately
//! on safety edges, and once on connect, with the current safety (ESTOP)
//! state in the first snapshot a client sees.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use terra_common::clock::wall_clock_ms;
use terra_common::config::TerraConfig;
use terra_common::consts::{
    command_topic, TOPIC_COMMAND_RECEIVED, TOPIC_ESTOP_ACTIVATED, TOPIC_ESTOP_RESET,
    TOPIC_IMPLEMENTS_STATUS, TOPIC_MOTOR_STATUS, TOPIC_OPERATION_STATUS, TOPIC_POSE_UPDATED,
    TOPIC_SAFETY_STATUS,
};
use terra_common::metrics::Metrics;
use terra_common::types::bus::BusMessage;
use terra_mesh::Mesh;

use crate::cert::{CaKey, Certificate, TrustedClients};
use crate::error::LinkError;
use crate::protocol::{Frame, TelemetrySnapshot};
use crate::session::SessionManager;
use crate::verify::CommandVerifier;

/// Certificate material the server runs with.
#[derive(Clone)]
pub struct ServerMaterial {
    pub server_cert: Certificate,
    pub ca: CaKey,
    pub trusted: TrustedClients,
}

impl ServerMaterial {
    /// Load material from the paths in the link config.
    pub fn from_config(config: &TerraConfig) -> Result<Self, LinkError> {
        let link = &config.link;
        let ca = match &link.ca_key_path {
            Some(path) => CaKey::load(std::path::Path::new(path))?,
            None => {
                warn!("no ca_key_path configured; generating an ephemeral CA key");
                CaKey::generate()
            }
        };
        let server_cert = match &link.server_cert_path {
            Some(path) => Certificate::load(std::path::Path::new(path))?,
            None => Certificate::issue(&ca, &config.machine.name, wall_clock_ms(), 86_400_000),
        };
        let trusted = match &link.trusted_clients_dir {
            Some(dir) => TrustedClients::load_dir(std::path::Path::new(dir))?,
            None => TrustedClients::new(),
        };
        Ok(Self {
            server_cert,
            ca,
            trusted,
        })
    }
}

struct ServerContext {
    mesh: Mesh,
    verifier: CommandVerifier,
    sessions: Mutex<SessionManager>,
    server_cert: Certificate,
    ca: CaKey,
    telemetry: Mutex<TelemetrySnapshot>,
    /// Safety-edge notifications for edge-triggered pushes.
    safety_edge: broadcast::Sender<()>,
    telemetry_interval_ms: u64,
}

/// Spawn the link server and its background tasks.
///
/// Returns the accept-loop handle and the bound local address (useful with
/// a `:0` bind for tests).
pub async fn spawn_link_server(
    mesh: Mesh,
    config: &TerraConfig,
    metrics: Metrics,
    material: ServerMaterial,
) -> Result<(JoinHandle<()>, std::net::SocketAddr), LinkError> {
    let listener = TcpListener::bind(&config.link.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "link server listening");

    let (safety_edge, _) = broadcast::channel(8);
    let ctx = Arc::new(ServerContext {
        mesh: mesh.clone(),
        verifier: CommandVerifier::new(
            material.trusted,
            config.link.command_freshness_window_ms,
            metrics,
        ),
        sessions: Mutex::new(SessionManager::new(config.link.session_ttl_ms)),
        server_cert: material.server_cert,
        ca: material.ca,
        telemetry: Mutex::new(TelemetrySnapshot::default()),
        safety_edge,
        telemetry_interval_ms: config.link.telemetry_interval_ms,
    });

    spawn_collector(mesh, ctx.clone());
    spawn_sweeper(ctx.clone(), config.link.command_freshness_window_ms);

    let accept_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "link connection accepted");
                    let conn_ctx = accept_ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn_ctx, stream).await {
                            debug!(error = %e, "link connection closed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    Ok((handle, local_addr))
}

/// Cache status snapshots and signal safety edges.
fn spawn_collector(mesh: Mesh, ctx: Arc<ServerContext>) {
    let (_s1, mut safety) = mesh.subscribe(TOPIC_SAFETY_STATUS);
    let (_s2, mut poses) = mesh.subscribe(TOPIC_POSE_UPDATED);
    let (_s3, mut motors) = mesh.subscribe(TOPIC_MOTOR_STATUS);
    let (_s4, mut implements) = mesh.subscribe(TOPIC_IMPLEMENTS_STATUS);
    let (_s5, mut operations) = mesh.subscribe(TOPIC_OPERATION_STATUS);
    let (_s6, mut estops) = mesh.subscribe(TOPIC_ESTOP_ACTIVATED);
    let (_s7, mut resets) = mesh.subscribe(TOPIC_ESTOP_RESET);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = safety.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Safety(status) = env.payload {
                            let mut cache = ctx.telemetry.lock();
                            let changed = cache
                                .safety
                                .as_ref()
                                .map_or(true, |prev| prev.mode != status.mode);
                            cache.safety = Some(status);
                            drop(cache);
                            if changed {
                                let _ = ctx.safety_edge.send(());
                            }
                        }
                    }
                    None => break,
                },
                msg = poses.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Pose(pose) = env.payload {
                            ctx.telemetry.lock().pose = Some(pose);
                        }
                    }
                    None => break,
                },
                msg = motors.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::MotorStatus(status) = env.payload {
                            ctx.telemetry.lock().motors = Some(status);
                        }
                    }
                    None => break,
                },
                msg = implements.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Implements(status) = env.payload {
                            ctx.telemetry.lock().implements = Some(status);
                        }
                    }
                    None => break,
                },
                msg = operations.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Operation(status) = env.payload {
                            ctx.telemetry.lock().operation = Some(status);
                        }
                    }
                    None => break,
                },
                msg = estops.recv() => match msg {
                    Some(_) => { let _ = ctx.safety_edge.send(()); }
                    None => break,
                },
                msg = resets.recv() => match msg {
                    Some(_) => { let _ = ctx.safety_edge.send(()); }
                    None => break,
                },
            }
        }
    });
}

/// Periodic seen-set and session purge.
fn spawn_sweeper(ctx: Arc<ServerContext>, freshness_window_ms: u64) {
    let period = Duration::from_millis((freshness_window_ms / 2).max(1_000));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let swept = ctx.verifier.sweep();
            let purged = ctx.sessions.lock().purge_expired(wall_clock_ms());
            if swept > 0 || purged > 0 {
                debug!(swept, purged, "link sweep");
            }
        }
    });
}

async fn send_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> Result<(), LinkError> {
    let mut line = serde_json::to_string(frame)
        .map_err(|e| LinkError::InvalidFormat(format!("frame: {e}")))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

fn snapshot(ctx: &ServerContext) -> TelemetrySnapshot {
    let mut snap = ctx.telemetry.lock().clone();
    snap.timestamp_ms = wall_clock_ms();
    snap
}

async fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream) -> Result<(), LinkError> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let client_cn = match handshake(&ctx, &mut lines, &mut writer).await {
        Ok(cn) => cn,
        Err(e) => {
            let _ = send_frame(
                &mut writer,
                &Frame::HandshakeError {
                    error_kind: e.kind_str().to_string(),
                    message: e.to_string(),
                },
            )
            .await;
            return Err(e);
        }
    };

    let session = ctx.sessions.lock().create(&client_cn, wall_clock_ms());
    let token = session.token.clone();
    send_frame(
        &mut writer,
        &Frame::SessionGranted {
            token: token.clone(),
        },
    )
    .await?;

    // Current safety/ESTOP state goes out before anything else.
    send_frame(
        &mut writer,
        &Frame::Telemetry {
            snapshot: snapshot(&ctx),
        },
    )
    .await?;

    let mut safety_edges = ctx.safety_edge.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(ctx.telemetry_interval_ms));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break; // peer closed
                };
                match serde_json::from_str::<Frame>(&line) {
                    Ok(Frame::Command { envelope }) => {
                        let has_mfa = ctx
                            .sessions
                            .lock()
                            .touch(&token, wall_clock_ms())
                            .map(|s| s.second_factor)
                            .ok_or_else(|| {
                                LinkError::Unauthorized("session expired".to_string())
                            });
                        let verdict = match has_mfa {
                            Ok(mfa) => ctx.verifier.verify(&envelope, &client_cn, mfa),
                            Err(e) => Err(e),
                        };
                        match verdict {
                            Ok(()) => {
                                info!(
                                    client = client_cn,
                                    command = envelope.command.type_name(),
                                    "command admitted"
                                );
                                // Liveness event first (watchdog reset precedes
                                // the dispatched command), then the command
                                // itself on its own topic.
                                ctx.mesh.publish(
                                    TOPIC_COMMAND_RECEIVED,
                                    BusMessage::Value(serde_json::json!({
                                        "id": envelope.id,
                                        "type": envelope.command.type_name(),
                                    })),
                                );
                                ctx.mesh.publish(
                                    &command_topic(envelope.command.type_name()),
                                    BusMessage::Command(envelope.clone()),
                                );
                                send_frame(&mut writer, &Frame::Ack { id: envelope.id }).await?;
                            }
                            Err(e) => {
                                warn!(
                                    client = client_cn,
                                    command = envelope.command.type_name(),
                                    kind = e.kind_str(),
                                    "command rejected"
                                );
                                send_frame(
                                    &mut writer,
                                    &Frame::Reject {
                                        id: envelope.id,
                                        error_kind: e.kind_str().to_string(),
                                        message: e.to_string(),
                                    },
                                )
                                .await?;
                            }
                        }
                    }
                    Ok(Frame::Mfa { assertion }) => {
                        // Minimal second-factor contract: a non-empty
                        // assertion marks the session.
                        if !assertion.is_empty()
                            && ctx.sessions.lock().record_second_factor(&token, wall_clock_ms())
                        {
                            send_frame(&mut writer, &Frame::MfaAccepted {}).await?;
                        }
                    }
                    Ok(other) => {
                        debug!(frame = ?other, "unexpected frame from client");
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable frame");
                    }
                }
            }
            _ = ticker.tick() => {
                send_frame(&mut writer, &Frame::Telemetry { snapshot: snapshot(&ctx) }).await?;
            }
            _ = safety_edges.recv() => {
                send_frame(&mut writer, &Frame::Telemetry { snapshot: snapshot(&ctx) }).await?;
            }
        }
    }

    ctx.sessions.lock().invalidate(&token);
    info!(client = client_cn, "link connection closed");
    Ok(())
}

async fn handshake(
    ctx: &ServerContext,
    lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
) -> Result<String, LinkError> {
    send_frame(
        writer,
        &Frame::ServerHello {
            certificate: ctx.server_cert.clone(),
        },
    )
    .await?;

    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .map_err(|_| LinkError::Handshake("client hello timeout".to_string()))??
        .ok_or_else(|| LinkError::Handshake("connection closed during handshake".to_string()))?;

    let frame: Frame = serde_json::from_str(&line)
        .map_err(|e| LinkError::Handshake(format!("bad client hello: {e}")))?;
    let Frame::ClientHello { certificate } = frame else {
        return Err(LinkError::Handshake("expected client hello".to_string()));
    };

    certificate.verify(&ctx.ca, wall_clock_ms())?;
    let cn = certificate.subject_cn.clone();
    if ctx.verifier.trusted().get(&cn).is_none() {
        return Err(LinkError::Unauthorized(format!(
            "client '{cn}' not in trusted directory"
        )));
    }
    Ok(cn)
}

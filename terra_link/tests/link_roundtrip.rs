//! End-to-end link tests: handshake, admission, replay, offline queue.

use std::time::Duration;

use terra_common::clock::wall_clock_ms;
use terra_common::config::TerraConfig;
use terra_common::consts::{TOPIC_COMMAND_RECEIVED, TOPIC_SAFETY_STATUS};
use terra_common::metrics::{Metrics, METRIC_REJECTED_REPLAY};
use terra_common::types::bus::BusMessage;
use terra_common::types::command::Command;
use terra_common::types::safety::{SafetyMode, SafetyStatus};
use terra_link::cert::{CaKey, Certificate, TrustedClients};
use terra_link::client::{LinkClient, SubmitOutcome};
use terra_link::offline::OfflineQueue;
use terra_link::server::{spawn_link_server, ServerMaterial};
use terra_mesh::Mesh;

fn config() -> TerraConfig {
    toml::from_str(
        r#"
[machine]
name = "link-test"

[motion]
max_speed_mps = 2.0
max_accel_mps2 = 1.0
max_decel_mps2 = 2.0

[safety]
obstacle_safe_distance_m = 3.0
human_safe_distance_m = 5.0
max_incline_deg = 20.0

[link]
bind_addr = "127.0.0.1:0"
telemetry_interval_ms = 200
"#,
    )
    .unwrap()
}

struct Harness {
    mesh: Mesh,
    metrics: Metrics,
    addr: String,
    ca: CaKey,
    client_cert: Certificate,
}

async fn start_server() -> Harness {
    let metrics = Metrics::new();
    let mesh = Mesh::new(metrics.clone());
    let cfg = config();

    let ca = CaKey::generate();
    let server_cert = Certificate::issue(&ca, "tractor", wall_clock_ms(), 3_600_000);
    let client_cert = Certificate::issue(&ca, "operator-1", wall_clock_ms(), 3_600_000);
    let mut trusted = TrustedClients::new();
    trusted.insert(client_cert.clone());

    let material = ServerMaterial {
        server_cert,
        ca: ca.clone(),
        trusted,
    };
    let (_handle, addr) = spawn_link_server(mesh.clone(), &cfg, metrics.clone(), material)
        .await
        .expect("server starts");

    Harness {
        mesh,
        metrics,
        addr: addr.to_string(),
        ca,
        client_cert,
    }
}

async fn connected_client(h: &Harness, queue: Option<OfflineQueue>) -> LinkClient {
    let mut client =
        LinkClient::new(&h.addr, h.client_cert.clone(), h.ca.clone(), queue).unwrap();
    client.connect().await.expect("handshake succeeds");
    client
}

#[tokio::test]
async fn signed_command_is_accepted_and_dispatched() {
    let h = start_server().await;
    let (_sub, mut received) = h.mesh.subscribe("command.move");
    let (_sub2, mut liveness) = h.mesh.subscribe(TOPIC_COMMAND_RECEIVED);
    let mut client = connected_client(&h, None).await;

    let outcome = client
        .submit(Command::Move {
            speed: 1.0,
            direction: 0.0,
        })
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Accepted);

    let env = tokio::time::timeout(Duration::from_secs(1), received.recv())
        .await
        .unwrap()
        .unwrap();
    match env.payload {
        BusMessage::Command(e) => assert_eq!(e.command.type_name(), "move"),
        other => panic!("unexpected payload {other:?}"),
    }

    // The liveness event precedes the dispatched command.
    let live = tokio::time::timeout(Duration::from_secs(1), liveness.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(live.payload, BusMessage::Value(_)));
    assert!(live.timestamp_ns <= env.timestamp_ns);
}

#[tokio::test]
async fn replayed_envelope_is_rejected_and_counted() {
    let h = start_server().await;
    let mut client = connected_client(&h, None).await;

    // Build one envelope and submit it twice verbatim.
    let envelope = terra_link::envelope::make_envelope(
        Command::Stop {},
        &h.client_cert.key_bytes().unwrap(),
    )
    .unwrap();

    let first = client.submit_envelope(envelope.clone()).await.unwrap();
    assert_eq!(first, SubmitOutcome::Accepted);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = client.submit_envelope(envelope).await.unwrap();
    match second {
        SubmitOutcome::Rejected { error_kind, .. } => assert_eq!(error_kind, "replay"),
        other => panic!("expected replay rejection, got {other:?}"),
    }
    assert_eq!(h.metrics.get(METRIC_REJECTED_REPLAY), 1.0);
}

#[tokio::test]
async fn stranger_certificate_is_refused() {
    let h = start_server().await;
    // Attested by the right CA but absent from the trusted directory.
    let stranger = Certificate::issue(&h.ca, "stranger", wall_clock_ms(), 3_600_000);
    let mut client = LinkClient::new(&h.addr, stranger, h.ca.clone(), None).unwrap();
    assert!(client.connect().await.is_err());
}

#[tokio::test]
async fn forged_certificate_is_refused() {
    let h = start_server().await;
    let wrong_ca = CaKey::generate();
    let forged = Certificate::issue(&wrong_ca, "operator-1", wall_clock_ms(), 3_600_000);
    let mut client = LinkClient::new(&h.addr, forged, h.ca.clone(), None).unwrap();
    assert!(client.connect().await.is_err());
}

#[tokio::test]
async fn critical_command_needs_second_factor() {
    let h = start_server().await;
    let mut client = connected_client(&h, None).await;

    let outcome = client
        .submit(Command::EmergencyStop {
            reason: "test".into(),
        })
        .await
        .unwrap();
    match outcome {
        SubmitOutcome::Rejected { error_kind, .. } => assert_eq!(error_kind, "mfa_required"),
        other => panic!("expected mfa rejection, got {other:?}"),
    }

    client.provide_second_factor("biometric:ok").await.unwrap();
    let outcome = client
        .submit(Command::EmergencyStop {
            reason: "test".into(),
        })
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Accepted);
}

#[tokio::test]
async fn offline_queue_replay_contract() {
    let h = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let queue = OfflineQueue::open(
        &dir.path().join("queue.jsonl"),
        604_800,
        true,
        wall_clock_ms(),
    )
    .unwrap();

    // Disconnected client: move queues, emergency_stop is refused locally.
    let mut client = LinkClient::new(&h.addr, h.client_cert.clone(), h.ca.clone(), Some(queue))
        .unwrap();
    let outcome = client
        .submit(Command::Move {
            speed: 1.0,
            direction: 0.0,
        })
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Queued);
    assert_eq!(client.queued_len(), 1);

    let err = client
        .submit(Command::EmergencyStop {
            reason: "x".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind_str(), "not_queueable");
    assert_eq!(client.queued_len(), 1);

    // Reconnect inside the freshness window: the queued move is accepted.
    client.connect().await.unwrap();
    let (accepted, rejected) = client.flush_offline().await.unwrap();
    assert_eq!((accepted, rejected), (1, 0));
    assert_eq!(client.queued_len(), 0);
}

#[tokio::test]
async fn reconnecting_client_sees_estop_state_first() {
    let h = start_server().await;

    // Publish an estop-active safety status before any client connects.
    let mut status = SafetyStatus::nominal(0);
    status.mode = SafetyMode::Estop;
    status.estop_active = true;
    h.mesh
        .publish(TOPIC_SAFETY_STATUS, BusMessage::Safety(status));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = connected_client(&h, None).await;
    let snapshot = client
        .last_telemetry()
        .expect("first telemetry frame arrives during connect");
    let safety = snapshot.safety.as_ref().expect("safety present");
    assert!(safety.estop_active);
    assert_eq!(safety.mode, SafetyMode::Estop);
}

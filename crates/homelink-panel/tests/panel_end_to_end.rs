//! PanelClient against an in-process broker and a hand-driven lamp.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use homelink_broker::application::broker::Broker;
use homelink_broker::application::settings::BrokerSettings;
use homelink_broker::infrastructure::network::listener::{bind, serve};
use homelink_core::{Connection, Envelope, EnvelopeKind, ErrorCode};
use homelink_panel::application::script::{demo_plan, describe_reply};
use homelink_panel::infrastructure::client::PanelClient;

async fn start_broker() -> SocketAddr {
    let listener = bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let broker = Broker::shared(BrokerSettings::default());
    tokio::spawn(serve(listener, broker, Arc::new(AtomicBool::new(true))));
    addr
}

/// A lamp that echoes every command back as `<COMMAND>_OK`.
async fn echo_lamp(addr: SocketAddr, name: &'static str) {
    let mut conn = Connection::connect(addr).await.unwrap();
    conn.send(&Envelope::register(name, None)).await.unwrap();
    let ack = conn.recv().await.unwrap().unwrap();
    assert_eq!(ack.kind, EnvelopeKind::Register);

    tokio::spawn(async move {
        while let Some(Ok(cmd)) = conn.recv().await {
            let Some(id) = cmd.correlation_id else { continue };
            let answer = format!("{}_OK", cmd.payload_str().unwrap_or("?"));
            if conn
                .send(&Envelope::response(name, answer).with_correlation(id))
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

#[tokio::test]
async fn test_demo_plan_runs_against_broker() {
    // Arrange
    let addr = start_broker().await;
    echo_lamp(addr, "LAMPADA_1").await;
    echo_lamp(addr, "LAMPADA_2").await;
    let mut client = PanelClient::connect(addr, Duration::from_secs(5)).await.unwrap();

    // Act
    let mut lines = Vec::new();
    for planned in demo_plan(&["LAMPADA_1", "LAMPADA_2"]) {
        let reply = client
            .send_command(&planned.device, &planned.command)
            .await
            .unwrap();
        lines.push(describe_reply(&reply));
    }

    // Assert
    assert_eq!(lines.len(), 8);
    assert_eq!(lines[0], "LAMPADA_1: LIGAR_OK");
    assert_eq!(lines[6], "LAMPADA_2: DESLIGAR_OK");
}

#[tokio::test]
async fn test_unknown_device_reaches_panel_as_error() {
    let addr = start_broker().await;
    let mut client = PanelClient::connect(addr, Duration::from_secs(5)).await.unwrap();

    let reply = client.send_command("LAMPADA_9", "STATUS").await.unwrap();

    assert_eq!(reply.error_code(), Some(ErrorCode::DeviceNotFound));
    assert_eq!(describe_reply(&reply), "LAMPADA_9: erro device_not_found");
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    // Arrange: reserve a port and release it
    let reserved = bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    // Act
    let result = PanelClient::connect(addr, Duration::from_secs(1)).await;

    // Assert
    assert!(result.is_err());
}

//! End-to-end tests against a live UDP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use vbmc::protocol::{self, netfn, IpmiMessage, SessionWrapper, AUTH_NONE};
use vbmc::server::{BmcServer, ServerConfig};
use vbmc::target::{InstanceRegistry, ManagedTargets};
use vbmc::{BootDevice, PowerState};

const REPLY_WAIT: Duration = Duration::from_secs(2);
const SILENCE_WAIT: Duration = Duration::from_millis(300);

async fn start_server(targets: &[&str]) -> (Arc<InstanceRegistry>, Vec<SocketAddr>) {
    let registry = Arc::new(InstanceRegistry::new());
    for name in targets {
        registry.add(name);
    }

    let server = BmcServer::new(
        Arc::clone(&registry) as Arc<dyn ManagedTargets>,
        ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            targets: targets.iter().map(|s| s.to_string()).collect(),
            backend_timeout: Duration::from_secs(1),
        },
    );

    let bound = server.bind().await.expect("bind");
    let addrs = bound.local_addrs().expect("local addrs");
    tokio::spawn(bound.serve());
    (registry, addrs)
}

fn request_datagram(netfn_code: u8, cmd: u8, rq_seq: u8, data: &[u8]) -> Vec<u8> {
    let wrapper = SessionWrapper {
        auth_type: AUTH_NONE,
        sequence: 0,
        session_id: 0,
        message_len: 0,
    };
    let message = IpmiMessage {
        target_address: 0x20,
        target_lun: netfn_code << 2,
        checksum: 0,
        source_address: 0x81,
        source_lun: rq_seq << 2,
        command: cmd,
        completion_code: None,
        data: data.to_vec(),
        data_checksum: 0,
    };
    protocol::encode_packet(&wrapper, &message).expect("encode request")
}

/// Split a decoded response message into completion code and data.
/// The request-oriented decoder leaves the completion code as the
/// leading payload byte.
fn split_response(message: &IpmiMessage) -> (u8, &[u8]) {
    let (code, data) = message.data.split_first().expect("completion code");
    (*code, data)
}

async fn transact(addr: SocketAddr, datagram: Vec<u8>) -> IpmiMessage {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind client");
    socket.send_to(&datagram, addr).await.expect("send");

    let mut buf = [0u8; 4096];
    let (len, _) = timeout(REPLY_WAIT, socket.recv_from(&mut buf))
        .await
        .expect("response before timeout")
        .expect("recv");

    let (consumed, _, _, message) = protocol::decode_packet(&buf[..len]).expect("decode response");
    assert_eq!(consumed, len);
    message
}

async fn expect_silence(addr: SocketAddr, datagram: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind client");
    socket.send_to(datagram, addr).await.expect("send");

    let mut buf = [0u8; 4096];
    let outcome = timeout(SILENCE_WAIT, socket.recv_from(&mut buf)).await;
    assert!(outcome.is_err(), "expected no response datagram");
}

#[tokio::test]
async fn power_lifecycle_over_the_wire() {
    let (_registry, addrs) = start_server(&["node-a"]).await;
    let addr = addrs[0];

    // Stopped initially.
    let status = transact(addr, request_datagram(netfn::CHASSIS, 0x01, 1, &[])).await;
    assert_eq!(status.netfn(), netfn::CHASSIS | netfn::RESPONSE);
    let (code, data) = split_response(&status);
    assert_eq!(code, 0x00);
    assert_eq!(data[0] & 0x01, 0x00);

    // Power up.
    let up = transact(addr, request_datagram(netfn::CHASSIS, 0x02, 2, &[0x01])).await;
    assert_eq!(split_response(&up).0, 0x00);

    let status = transact(addr, request_datagram(netfn::CHASSIS, 0x01, 3, &[])).await;
    let (code, data) = split_response(&status);
    assert_eq!(code, 0x00);
    assert_eq!(data[0] & 0x01, 0x01);

    // Power down.
    let down = transact(addr, request_datagram(netfn::CHASSIS, 0x02, 4, &[0x00])).await;
    assert_eq!(split_response(&down).0, 0x00);

    let status = transact(addr, request_datagram(netfn::CHASSIS, 0x01, 5, &[])).await;
    assert_eq!(split_response(&status).1[0] & 0x01, 0x00);
}

#[tokio::test]
async fn response_echoes_request_addressing() {
    let (_registry, addrs) = start_server(&["node-a"]).await;

    let reply = transact(addrs[0], request_datagram(netfn::CHASSIS, 0x01, 9, &[])).await;
    assert_eq!(reply.target_address, 0x20);
    assert_eq!(reply.source_address, 0x81);
    assert_eq!(reply.request_sequence(), 9);
    assert_eq!(reply.command, 0x01);
}

#[tokio::test]
async fn boot_override_applies_once() {
    let (registry, addrs) = start_server(&["node-a"]).await;
    let addr = addrs[0];

    // Stage PXE via Set System Boot Options, boot flags parameter.
    let set = transact(
        addr,
        request_datagram(netfn::CHASSIS, 0x08, 1, &[0x05, 0x80, 0x04]),
    )
    .await;
    assert_eq!(split_response(&set).0, 0x00);
    assert_eq!(
        registry.boot_override("node-a"),
        Ok(Some(BootDevice::Pxe))
    );

    // Staged override is visible through Get System Boot Options.
    let get = transact(
        addr,
        request_datagram(netfn::CHASSIS, 0x09, 2, &[0x05, 0x00, 0x00]),
    )
    .await;
    let (code, data) = split_response(&get);
    assert_eq!(code, 0x00);
    assert_eq!(data[2], 0x80);
    assert_eq!(data[3], 0x04);

    // Power on consumes it; power off restores the prior order.
    let up = transact(addr, request_datagram(netfn::CHASSIS, 0x02, 3, &[0x01])).await;
    assert_eq!(split_response(&up).0, 0x00);
    assert_eq!(registry.boot_override("node-a"), Ok(None));

    let down = transact(addr, request_datagram(netfn::CHASSIS, 0x02, 4, &[0x00])).await;
    assert_eq!(split_response(&down).0, 0x00);

    let get = transact(
        addr,
        request_datagram(netfn::CHASSIS, 0x09, 5, &[0x05, 0x00, 0x00]),
    )
    .await;
    assert_eq!(split_response(&get).1[2], 0x00);
}

#[tokio::test]
async fn app_session_establishment_succeeds() {
    let (_registry, addrs) = start_server(&["node-a"]).await;
    let addr = addrs[0];

    for (cmd, data) in [
        (0x38u8, vec![0x8E, 0x04]), // Get Channel Auth Capabilities
        (0x39, vec![0x00, 0x00]),   // Get Session Challenge
        (0x3A, vec![0x00, 0x00]),   // Activate Session
        (0x3C, vec![]),             // Close Session
    ] {
        let reply = transact(addr, request_datagram(netfn::APP, cmd, 1, &data)).await;
        assert_eq!(reply.netfn(), netfn::APP | netfn::RESPONSE);
        assert_eq!(split_response(&reply).0, 0x00, "cmd {cmd:#04x}");
    }
}

#[tokio::test]
async fn unknown_command_gets_nonzero_completion() {
    let (_registry, addrs) = start_server(&["node-a"]).await;

    let reply = transact(addrs[0], request_datagram(netfn::APP, 0x7F, 1, &[])).await;
    assert_eq!(split_response(&reply).0, 0xC1);

    let reply = transact(addrs[0], request_datagram(netfn::CHASSIS, 0x7F, 2, &[])).await;
    assert_eq!(split_response(&reply).0, 0xC1);
}

#[tokio::test]
async fn unknown_netfn_is_silent() {
    let (_registry, addrs) = start_server(&["node-a"]).await;
    expect_silence(addrs[0], &request_datagram(netfn::STORAGE, 0x10, 1, &[])).await;
    expect_silence(addrs[0], &request_datagram(0x3E, 0x01, 2, &[])).await;
}

#[tokio::test]
async fn malformed_and_corrupted_frames_are_silent() {
    let (_registry, addrs) = start_server(&["node-a"]).await;
    let addr = addrs[0];

    // Declared message length exceeding the datagram.
    let mut oversized = request_datagram(netfn::CHASSIS, 0x01, 1, &[]);
    oversized[13] = 0x7F;
    expect_silence(addr, &oversized).await;

    // Truncated frame.
    let mut truncated = request_datagram(netfn::CHASSIS, 0x01, 2, &[]);
    truncated.truncate(9);
    expect_silence(addr, &truncated).await;

    // Corrupted data checksum.
    let mut corrupted = request_datagram(netfn::CHASSIS, 0x01, 3, &[]);
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    expect_silence(addr, &corrupted).await;
}

#[tokio::test]
async fn targets_are_served_independently() {
    let (registry, addrs) = start_server(&["node-a", "node-b"]).await;
    assert_eq!(addrs.len(), 2);

    // Drive both endpoints concurrently; each command lands on its own
    // target and neither blocks the other.
    let a = tokio::spawn(transact(
        addrs[0],
        request_datagram(netfn::CHASSIS, 0x02, 1, &[0x01]),
    ));
    let b = tokio::spawn(transact(
        addrs[1],
        request_datagram(netfn::CHASSIS, 0x01, 1, &[]),
    ));

    let up = a.await.expect("join");
    let status = b.await.expect("join");
    assert_eq!(split_response(&up).0, 0x00);
    assert_eq!(split_response(&status).0, 0x00);

    assert_eq!(registry.query("node-a"), Ok(PowerState::Running));
    assert_eq!(registry.query("node-b"), Ok(PowerState::Stopped));
}

//! Engine behavior over an in-memory network

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tsprobe_core::core::simulator::spawn_network;
use tsprobe_core::{
    Client, Correlator, DeviceProfile, DiscoveredDevice, MemoryTransport, Request, RpcError, SimulatedDevice,
};

const LOCAL: &str = "10.0.0.1:40000";
const DEVICE: &str = "10.0.0.7:4800";

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn simulated(device: SimulatedDevice) -> Client {
    let (transport, handle) = MemoryTransport::new(addr(LOCAL));
    spawn_network(handle, vec![(addr(DEVICE), device)]);
    Client::new(Arc::new(transport))
}

async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn discovery_reference_exchange() {
    let (transport, mut handle) = MemoryTransport::new(addr(LOCAL));
    let client = Client::with_correlator(Arc::new(transport), Correlator::with_cursor(1));

    let mut stream = client.discover(addr("255.255.255.255:4800")).await.unwrap();
    let (request, _) = handle.next_sent().await.unwrap();
    assert_eq!(hex::encode(&request), "0100000800000001");

    let reply = hex::decode("8100001800000001005555551a510090e8aaaaaac0a87ffe").unwrap();
    handle.inject(reply, addr("192.168.127.254:4800"));

    let inbound = stream.next_reply().await.unwrap();
    let device = DiscoveredDevice::parse(&inbound).unwrap();
    assert_eq!(device.device_id.apid(), 0x0055_5555);
    assert_eq!(device.device_id.model_hex(), "1a51");
    assert_eq!(device.device_id.mac().to_string(), "00:90:e8:aa:aa:aa");
    assert_eq!(device.address, Ipv4Addr::new(192, 168, 127, 254));
}

#[tokio::test]
async fn slot_resolves_once_and_repeat_is_unsolicited() {
    let (transport, mut handle) = MemoryTransport::new(addr(LOCAL));
    let client = Client::with_correlator(Arc::new(transport), Correlator::with_cursor(0x20));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request(addr(DEVICE), 0x10, &[], None, None).await }
    });

    let (request, _) = handle.next_sent().await.unwrap();
    assert_eq!(hex::encode(&request), "1000000800000020");

    let reply = hex::decode("9000000a00000020abcd").unwrap();
    handle.inject(reply.clone(), addr(DEVICE));
    handle.inject(reply, addr(DEVICE));

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.body.as_ref(), &[0xab, 0xcd]);
    settle(|| client.stats().unsolicited == 1).await;
    assert_eq!(client.stats().delivered, 1);
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn concurrent_requests_are_correlated() {
    let device = SimulatedDevice::new(DeviceProfile::default());
    let id = device.device_id();
    let client = simulated(device);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..64 {
        let client = client.clone();
        tasks.spawn(async move {
            client
                .request(addr(DEVICE), Request::Address.id(), &[], Some(&id), Some(Duration::from_secs(5)))
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        let reply = result.unwrap().unwrap();
        assert_eq!(&reply.body[12..], &[192, 168, 127, 254]);
    }
    assert_eq!(client.pending(), 0);
    assert_eq!(client.stats().unsolicited, 0);
}

#[tokio::test]
async fn remote_status_is_reported_verbatim() {
    let device = SimulatedDevice::new(DeviceProfile::default()).reject(0x21, 0x09);
    let id = device.device_id();
    let client = simulated(device);

    let err = client
        .request(addr(DEVICE), 0x21, &[], Some(&id), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(err.is_remote());
    match err {
        RpcError::Remote(remote) => {
            assert_eq!(remote.status, 0x09);
            assert_eq!(remote.request_id, 0x21);
            assert_eq!(remote.peer, addr(DEVICE));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_and_cancellation_release_entries() {
    let device = SimulatedDevice::new(DeviceProfile::default()).silence(0x22);
    let id = device.device_id();
    let client = simulated(device);

    let err = client
        .request(addr(DEVICE), 0x22, &[], Some(&id), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(client.pending(), 0);

    let outer = tokio::time::timeout(
        Duration::from_secs(1),
        client.request(addr(DEVICE), 0x22, &[], Some(&id), None),
    )
    .await;
    assert!(outer.is_err());
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn shutdown_fails_waiting_requests() {
    let device = SimulatedDevice::new(DeviceProfile::default()).silence(0x10);
    let id = device.device_id();
    let client = simulated(device);

    let waiting = tokio::spawn({
        let client = client.clone();
        async move { client.request(addr(DEVICE), 0x10, &[], Some(&id), None).await }
    });
    settle(|| client.pending() == 1).await;

    client.shutdown();
    assert!(matches!(waiting.await.unwrap(), Err(RpcError::Closed)));
    assert_eq!(client.pending(), 0);
}

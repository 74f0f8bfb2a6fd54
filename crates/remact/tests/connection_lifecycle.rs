// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client/service lifecycle over the in-process transport.

use parking_lot::Mutex;
use remact::{
    ClientConfig, ClientPort, ErrorCode, ExecutionContext, HostIdentity, MemoryTransport, Payload,
    PortState, ReadyMessage, RequestContext, ServiceConfig, ServicePort, ThreadingMode,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

const URI: &str = "mem://plant-7:40001/Echo";

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn open_service(transport: &MemoryTransport, uri: &str, timeout_secs: u32) -> ServicePort {
    let service = ServicePort::builder("Echo", uri, Arc::new(transport.clone()))
        .config(ServiceConfig {
            timeout_secs,
            threading: ThreadingMode::Multithreaded,
            ..Default::default()
        })
        .build()
        .unwrap();
    service.on_request("Ping", |_: ReadyMessage, _ctx: &RequestContext| Ok(ReadyMessage {}));
    service.open().await.unwrap();
    service
}

fn client(transport: &MemoryTransport, name: &str, instance: i32) -> ClientPort {
    client_with_timeout(transport, name, instance, 30)
}

fn client_with_timeout(
    transport: &MemoryTransport,
    name: &str,
    instance: i32,
    timeout_secs: u32,
) -> ClientPort {
    ClientPort::builder(name, Arc::new(transport.clone()))
        .host(HostIdentity::current("Plant", instance))
        .service_uri(URI)
        .config(ClientConfig {
            timeout_secs,
            threading: ThreadingMode::Multithreaded,
            ..Default::default()
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_client_id_stable_across_reconnect() {
    let transport = MemoryTransport::new();
    let service = open_service(&transport, URI, 30).await;

    let console = client(&transport, "Console", 3);
    console.connect().await.unwrap();
    assert_eq!(console.client_id(), 1);

    console.disconnect();
    wait_for(|| service.connected_count() == 0).await;

    console.connect().await.unwrap();
    assert_eq!(console.client_id(), 1);

    let other = client(&transport, "Logger", 3);
    other.connect().await.unwrap();
    assert_eq!(other.client_id(), 2);
    assert_eq!(service.connected_count(), 2);

    let slot = service
        .clients()
        .into_iter()
        .find(|c| c.client_id == 1)
        .unwrap();
    assert_eq!(slot.connect_count, 2);
}

#[tokio::test]
async fn test_process_bound_client_gets_new_slot() {
    let transport = MemoryTransport::new();
    let service = open_service(&transport, URI, 30).await;

    let console = client(&transport, "Console", 0);
    console.connect().await.unwrap();
    assert_eq!(console.client_id(), 1);

    console.disconnect();
    wait_for(|| service.connected_count() == 0).await;

    console.connect().await.unwrap();
    assert_eq!(console.client_id(), 2);
    assert!(service.clients()[0].unusable);
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let transport = MemoryTransport::new();
    let service = open_service(&transport, URI, 5).await;
    let console = client_with_timeout(&transport, "Console", 3, 5);
    console.connect().await.unwrap();
    assert_eq!(service.connected_count(), 1);

    assert!(!service.do_periodic_tasks(5000));
    assert_eq!(service.connected_count(), 1);
    assert!(service.do_periodic_tasks(1));
    assert_eq!(service.connected_count(), 0);
    assert_eq!(service.clients()[0].state, PortState::Faulted);
}

#[tokio::test]
async fn test_pending_requests_fail_once_on_connection_loss() {
    let transport = MemoryTransport::new();
    // Handlers are posted to a context nobody runs, so requests stay open.
    let ctx = ExecutionContext::new();
    let service = ServicePort::builder("Echo", URI, Arc::new(transport.clone()))
        .context(ctx.handle())
        .build()
        .unwrap();
    service.on_request("Ping", |_: ReadyMessage, _ctx: &RequestContext| Ok(ReadyMessage {}));
    service.open().await.unwrap();

    let console = client(&transport, "Console", 3);
    console.connect().await.unwrap();

    let answers = Arc::new(Mutex::new(Vec::new()));
    let mut ids = Vec::new();
    for _ in 0..3 {
        let answers = Arc::clone(&answers);
        let id = console
            .send_request("Ping", Payload::new(&ReadyMessage {}), move |reply| {
                answers.lock().push((reply.request_id, reply.error_message()));
            })
            .unwrap();
        ids.push(id);
    }
    assert_eq!(console.outstanding_count(), 3);

    transport.sever(URI);
    wait_for(|| answers.lock().len() == 3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let answers = answers.lock();
    assert_eq!(answers.len(), 3);
    let mut answered: Vec<i32> = answers.iter().map(|(id, _)| *id).collect();
    answered.sort_unstable();
    ids.sort_unstable();
    assert_eq!(answered, ids);
    assert!(answers
        .iter()
        .all(|(_, e)| e.as_ref().map(|e| e.code) == Some(ErrorCode::CouldNotSend)));
    assert_eq!(console.outstanding_count(), 0);
    assert_eq!(console.state(), PortState::Faulted);
    drop(ctx);
}

#[tokio::test]
async fn test_address_fallback_reaches_second_address() {
    let transport = MemoryTransport::new();
    let _service = open_service(&transport, "mem://10.0.0.2:40001/Echo", 30).await;

    let console = ClientPort::builder("Console", Arc::new(transport.clone()))
        .host(HostIdentity::current("Plant", 3))
        .service_uri(URI)
        .addresses(vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ])
        .threading(ThreadingMode::Multithreaded)
        .build()
        .unwrap();

    console.connect().await.unwrap();
    assert_eq!(console.state(), PortState::Ok);
    assert_eq!(console.addresses_tried(), 2);
    let _: ReadyMessage = console.ask("Ping", &ReadyMessage {}).await.unwrap();
}

#[tokio::test]
async fn test_keep_alives_hold_connection_open() {
    let transport = MemoryTransport::new();
    let service = open_service(&transport, URI, 2).await;
    let console = client_with_timeout(&transport, "Console", 3, 2);
    console.connect().await.unwrap();

    // Both sides tick past the timeout window in small steps; keep-alives
    // flowing each way keep the connection up.
    for _ in 0..10 {
        console.do_periodic_tasks(500);
        service.do_periodic_tasks(500);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(console.state(), PortState::Ok);
    assert_eq!(service.connected_count(), 1);
}

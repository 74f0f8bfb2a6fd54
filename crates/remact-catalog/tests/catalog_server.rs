// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two catalog daemons over TCP, with an announcing and a looking-up process.

use remact::{
    CatalogClient, CatalogClientConfig, ClientPort, ErrorCode, HostIdentity, ReadyMessage,
    RequestContext, ServicePort, ThreadingMode,
};
use remact_catalog::{CatalogServer, CatalogServerConfig};
use remact_tcp::TcpTransport;
use std::sync::Arc;
use std::time::Duration;

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn start_server(peers: Vec<String>) -> Arc<CatalogServer> {
    let mut config = CatalogServerConfig::default();
    config.catalog.uri = "tcp://127.0.0.1:0/RemactCatalog".into();
    config.catalog.tick_ms = 50;
    config.catalog.peer_refresh_secs = 1;
    config.add_peers(peers);
    let server = Arc::new(CatalogServer::new(config).unwrap());
    server.start().await.unwrap();
    server
}

fn agent(catalog_uri: &str, transport: &Arc<TcpTransport>, host: &HostIdentity) -> Arc<CatalogClient> {
    CatalogClient::new(
        host.clone(),
        CatalogClientConfig {
            uri: catalog_uri.into(),
            tick_ms: 50,
            ..Default::default()
        },
        transport.clone(),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lookup_through_peer_catalog() {
    let a = start_server(Vec::new()).await;
    let b = start_server(vec![a.bound_uri()]).await;

    // Process on plant-1 announces Clock to catalog A.
    let transport = Arc::new(TcpTransport::default());
    let plant_1 = HostIdentity::current("plant-1", 1);
    let agent_a = agent(&a.bound_uri(), &transport, &plant_1);
    let service = ServicePort::builder("Clock", "tcp://127.0.0.1:0/Clock", transport.clone())
        .host(plant_1)
        .catalog(Arc::clone(&agent_a))
        .threading(ThreadingMode::Multithreaded)
        .build()
        .unwrap();
    service.on_request("Ping", |_: ReadyMessage, _ctx: &RequestContext| Ok(ReadyMessage {}));
    service.open().await.unwrap();
    let agent_timer = agent_a.start();

    wait_for(|| a.catalog().lookup("Clock").is_some()).await;
    wait_for(|| b.catalog().lookup("Clock").is_some()).await;
    let entry = b.catalog().lookup("Clock").unwrap();
    assert_eq!(entry.hop_count, 2);
    assert_eq!(entry.uri, service.identity().uri);

    // Process on plant-2 only knows catalog B.
    let plant_2 = HostIdentity::current("plant-2", 1);
    let agent_b = agent(&b.bound_uri(), &transport, &plant_2);
    let console = ClientPort::builder("Console", transport.clone())
        .host(plant_2)
        .lookup("Clock", Arc::clone(&agent_b))
        .threading(ThreadingMode::Multithreaded)
        .build()
        .unwrap();
    assert_eq!(console.connect().await.unwrap().name, "Clock");
    let _: ReadyMessage = console.ask("Ping", &ReadyMessage {}).await.unwrap();

    console.disconnect();
    service.close();
    agent_timer.stop().await;
    b.stop().await;
    a.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_service_lookup_fails() {
    let a = start_server(Vec::new()).await;
    let transport = Arc::new(TcpTransport::default());
    let agent = agent(&a.bound_uri(), &transport, &HostIdentity::current("plant-3", 1));

    let err = agent.lookup_service("Nobody").await.unwrap_err();
    assert_eq!(
        err.remote_code(),
        Some(ErrorCode::ServiceNameNotRegisteredInCatalog)
    );
    a.stop().await;
}

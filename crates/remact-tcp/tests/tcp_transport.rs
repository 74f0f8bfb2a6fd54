// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ports talking over real sockets on the loopback interface.

use remact::{
    ClientPort, ErrorMessage, PayloadType, PortState, ReadyMessage, RemactError, RequestContext,
    ServicePort, ThreadingMode,
};
use remact_tcp::TcpTransport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Reading {
    sensor: String,
    value: f64,
}

impl PayloadType for Reading {
    const TYPE_NAME: &'static str = "Reading";
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn open_service(transport: &Arc<TcpTransport>, name: &str, uri: &str) -> ServicePort {
    let service = ServicePort::builder(name, uri, transport.clone())
        .threading(ThreadingMode::Multithreaded)
        .build()
        .unwrap();
    service.on_request("Scale", |r: Reading, _ctx: &RequestContext| {
        Ok::<_, ErrorMessage>(Reading {
            sensor: r.sensor,
            value: r.value * 2.0,
        })
    });
    service.open().await.unwrap();
    service
}

fn bound_uri(service: &ServicePort) -> String {
    service.identity().uri.unwrap()
}

fn client(transport: &Arc<TcpTransport>, uri: &str) -> ClientPort {
    ClientPort::builder("Console", transport.clone())
        .service_uri(uri)
        .threading(ThreadingMode::Multithreaded)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_round_trip() {
    let transport = Arc::new(TcpTransport::default());
    let service = open_service(&transport, "Sensors", "tcp://127.0.0.1:0/Sensors").await;
    let uri = bound_uri(&service);
    assert!(!uri.contains(":0/"));

    let console = client(&transport, &uri);
    let identity = console.connect().await.unwrap();
    assert_eq!(identity.name, "Sensors");
    assert_eq!(console.client_id(), 1);

    let scaled: Reading = console
        .ask(
            "Scale",
            &Reading {
                sensor: "boiler".into(),
                value: 21.5,
            },
        )
        .await
        .unwrap();
    assert_eq!(scaled.sensor, "boiler");
    assert_eq!(scaled.value, 43.0);
    assert_eq!(service.connected_count(), 1);

    console.disconnect();
    wait_for(|| service.connected_count() == 0).await;
    service.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_services_share_a_port() {
    let transport = Arc::new(TcpTransport::default());
    let first = open_service(&transport, "Sensors", "tcp://127.0.0.1:0/Sensors").await;
    let port = first.identity().uri.unwrap();
    let port = port
        .trim_start_matches("tcp://127.0.0.1:")
        .trim_end_matches("/Sensors")
        .parse::<u16>()
        .unwrap();

    let second_uri = format!("tcp://127.0.0.1:{}/Clock", port);
    let second = open_service(&transport, "Clock", &second_uri).await;
    assert_eq!(bound_uri(&second), second_uri);

    let to_clock = client(&transport, &second_uri);
    assert_eq!(to_clock.connect().await.unwrap().name, "Clock");
    let to_sensors = client(&transport, &bound_uri(&first));
    assert_eq!(to_sensors.connect().await.unwrap().name, "Sensors");

    // The path is taken now.
    let dup = ServicePort::builder("Clock2", &second_uri, transport.clone())
        .threading(ThreadingMode::Multithreaded)
        .build()
        .unwrap();
    assert!(dup.open().await.is_err());

    // Closing one service leaves the port serving the other.
    second.close();
    wait_for(|| to_clock.state() == PortState::Faulted).await;
    assert!(transport.local_addr(port).is_some());
    let _: Reading = to_sensors
        .ask(
            "Scale",
            &Reading {
                sensor: "x".into(),
                value: 1.0,
            },
        )
        .await
        .unwrap();

    first.close();
    assert!(transport.local_addr(port).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_path_faults_client() {
    let transport = Arc::new(TcpTransport::default());
    let service = open_service(&transport, "Sensors", "tcp://127.0.0.1:0/Sensors").await;
    let uri = bound_uri(&service).replace("/Sensors", "/Nobody");

    let console = client(&transport, &uri);
    assert!(console.connect().await.is_err());
    assert_eq!(console.state(), PortState::Faulted);
    service.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_close_faults_connected_client() {
    let transport = Arc::new(TcpTransport::default());
    let service = open_service(&transport, "Sensors", "tcp://127.0.0.1:0/Sensors").await;
    let console = client(&transport, &bound_uri(&service));
    console.connect().await.unwrap();

    service.close();
    wait_for(|| console.state() == PortState::Faulted).await;
    let err = console.ask::<_, ReadyMessage>("Scale", &ReadyMessage {}).await;
    assert!(err.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nothing_listening() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let transport = Arc::new(TcpTransport::default());
    let console = client(&transport, &format!("tcp://127.0.0.1:{}/Sensors", port));
    assert!(console.connect().await.is_err());
    assert_eq!(console.state(), PortState::Faulted);
}

#[tokio::test]
async fn test_bad_uri_is_rejected() {
    let transport = Arc::new(TcpTransport::default());
    let console = client(&transport, "http://127.0.0.1:1/Sensors");
    let err = console.connect().await.unwrap_err();
    match err {
        RemactError::ConnectFailed { reason, .. } => assert!(reason.contains("scheme"), "{}", reason),
        other => panic!("unexpected error {:?}", other),
    }
}

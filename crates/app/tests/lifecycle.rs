// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! End-to-end lifecycle tests against a real TCP listener

mod fixtures;

use std::{net::TcpListener, sync::Arc, time::Duration};

use app::{AppConfig, HttpServer, Lifecycle, Server, ServerError, ShutdownConfig};
use fixtures::lazy_container;
use serde_json::Value;

fn server(config: AppConfig) -> Arc<Server> {
    let shutdown = ShutdownConfig {
        graceful_timeout: Duration::from_secs(5),
    };
    Arc::new(Server::new(lazy_container(config), shutdown))
}

#[tokio::test]
async fn serves_requests_until_shutdown() {
    let server = server(AppConfig::for_testing());
    let mut bound = server
        .container()
        .resolve::<HttpServer>()
        .await
        .unwrap()
        .local_addr();
    let mut lifecycle = server.lifecycle();

    let running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run_with::<HttpServer>().await }
    });

    let addr = bound
        .wait_for(Option::is_some)
        .await
        .unwrap()
        .expect("listener address");
    assert_eq!(*lifecycle.borrow_and_update(), Lifecycle::Running);

    let response = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "pong");

    server.shutdown();
    server.shutdown();

    let result = running.await.unwrap();
    assert!(result.is_ok(), "unexpected shutdown result: {result:?}");
    assert_eq!(*server.lifecycle().borrow(), Lifecycle::Stopped);

    // the listener no longer accepts connections
    assert!(reqwest::get(format!("http://{addr}/healthz")).await.is_err());
}

#[tokio::test]
async fn occupied_port_fails_without_draining() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = AppConfig::for_testing();
    config.server.api.port = occupied.local_addr().unwrap().port();

    let server = server(config);
    let result = server.run_with::<HttpServer>().await;

    assert!(matches!(result, Err(ServerError::Bind { .. })));
    assert!(!server.cancellation_token().is_cancelled());
    assert_eq!(*server.lifecycle().borrow(), Lifecycle::Stopped);
}

#[tokio::test]
async fn host_names_are_resolved_at_bind() {
    let mut config = AppConfig::for_testing();
    config.server.api.host = "localhost".to_string();

    let server = server(config);
    let mut bound = server
        .container()
        .resolve::<HttpServer>()
        .await
        .unwrap()
        .local_addr();

    let running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run_with::<HttpServer>().await }
    });

    let addr = bound
        .wait_for(Option::is_some)
        .await
        .unwrap()
        .expect("listener address");
    assert!(addr.ip().is_loopback());

    server.shutdown();
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn second_run_is_rejected() {
    let server = server(AppConfig::for_testing());

    let running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run_with::<HttpServer>().await }
    });
    let mut lifecycle = server.lifecycle();
    lifecycle
        .wait_for(|state| *state == Lifecycle::Running)
        .await
        .unwrap();

    let second = server.run_with::<HttpServer>().await;
    assert!(matches!(second, Err(ServerError::Startup { .. })));

    server.shutdown();
    assert!(running.await.unwrap().is_ok());
}

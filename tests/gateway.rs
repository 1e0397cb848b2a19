//! End-to-end request/response behaviour over real TCP connections.

use base64::Engine;
use redis_gateway::config::{AclConfig, GatewayConfig};

mod common;

use common::TestGateway;

#[tokio::test]
async fn keep_alive_connection_serves_many_requests() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;

    for i in 1..=10 {
        let response = client.get("/INCR/counter").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), format!("{{\"INCR\":{}}}", i));
    }
    assert_eq!(gateway.state.tracker.active_count(), 1);
    assert_eq!(client.get("/GET/counter").await.text(), r#"{"GET":"10"}"#);
}

#[tokio::test]
async fn put_body_round_trips_through_raw_output() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;

    client
        .send(b"PUT /SET/blob HTTP/1.1\r\nContent-Length: 7\r\n\r\na\r\nb\x00cd")
        .await;
    assert_eq!(client.read_response().await.status, 200);

    let response = client.get("/GET/blob.raw").await;
    assert_eq!(response.header("Content-Type"), Some("application/octet-stream"));
    assert_eq!(response.body, b"$7\r\na\r\nb\x00cd\r\n");

    let response = client.get("/GET/blob.bin").await;
    assert_eq!(response.body, b"a\r\nb\x00cd");
}

#[tokio::test]
async fn post_body_names_the_command() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    client
        .send(b"POST / HTTP/1.1\r\nContent-Length: 18\r\n\r\nSET/greeting/hi%21")
        .await;
    assert_eq!(client.read_response().await.status, 200);
    assert_eq!(client.get("/GET/greeting").await.text(), r#"{"GET":"hi!"}"#);
}

#[tokio::test]
async fn database_prefix_selects_keyspace() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    client.get("/3/SET/k/three").await;
    assert_eq!(client.get("/GET/k").await.text(), r#"{"GET":null}"#);
    assert_eq!(client.get("/3/GET/k").await.text(), r#"{"GET":"three"}"#);
}

#[tokio::test]
async fn output_selection() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    client.get("/SET/page/%3Ch1%3Ehi%3C%2Fh1%3E").await;

    let response = client.get("/GET/page.html").await;
    assert_eq!(response.header("Content-Type"), Some("text/html"));
    assert_eq!(response.text(), "<h1>hi</h1>");

    let response = client.get("/GET/page?type=text/x-custom").await;
    assert_eq!(response.header("Content-Type"), Some("text/x-custom"));

    let response = client.get("/GET/page?jsonp=app.cb").await;
    assert_eq!(response.header("Content-Type"), Some("application/javascript"));
    assert_eq!(response.text(), r#"app.cb({"GET":"<h1>hi</h1>"});"#);

    assert_eq!(client.get("/GET/page?format=yaml").await.status, 400);
    assert_eq!(client.get("/GET/page?callback=x%28%29").await.status, 400);
}

#[tokio::test]
async fn default_root_serves_bare_get() {
    let mut config = GatewayConfig::default();
    config.http.default_root = Some("/GET/index.html".into());
    let gateway = TestGateway::start(config).await;
    let mut client = gateway.connect().await;
    client.get("/SET/index/%3Cp%3Ewelcome%3C%2Fp%3E").await;

    let response = client.get("/").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("text/html"));
    assert_eq!(response.text(), "<p>welcome</p>");
}

#[tokio::test]
async fn etag_and_conditional_fetch() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    client.get("/SET/k/v").await;

    let first = client.get("/GET/k").await;
    let etag = first.header("ETag").unwrap().to_string();
    assert_eq!(client.get("/GET/k").await.header("ETag"), Some(etag.as_str()));

    client
        .send(format!("GET /GET/k HTTP/1.1\r\nIf-None-Match: {}\r\n\r\n", etag).as_bytes())
        .await;
    let response = client.read_response().await;
    assert_eq!(response.status, 304);
    assert!(response.body.is_empty());

    client.get("/SET/k/changed").await;
    client
        .send(format!("GET /GET/k HTTP/1.1\r\nIf-None-Match: {}\r\n\r\n", etag).as_bytes())
        .await;
    assert_eq!(client.read_response().await.status, 200);
}

#[tokio::test]
async fn cors_headers() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    assert_eq!(client.get("/PING").await.header("Access-Control-Allow-Origin"), Some("*"));

    client.send(b"OPTIONS * HTTP/1.1\r\n\r\n").await;
    let response = client.read_response().await;
    assert_eq!(response.status, 200);
    assert!(response.header("Access-Control-Allow-Methods").is_some());
}

#[tokio::test]
async fn malformed_request_closes_connection() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    client.send(b"GET /PING\r\n\r\n").await;
    let response = client.read_response().await;
    assert_eq!(response.status, 400);
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let mut config = GatewayConfig::default();
    config.http.max_body_size = 16;
    let gateway = TestGateway::start(config).await;
    let mut client = gateway.connect().await;
    client
        .send(b"PUT /SET/k HTTP/1.1\r\nContent-Length: 17\r\n\r\n")
        .await;
    assert_eq!(client.read_response().await.status, 413);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn unknown_command_is_bad_gateway() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    let response = client.get("/NOPE").await;
    assert_eq!(response.status, 502);
    assert_eq!(response.text(), r#"{"NOPE":[false,"ERR unknown command 'NOPE'"]}"#);
    // Still keep-alive.
    assert_eq!(client.get("/PING").await.status, 200);
}

fn basic(credentials: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials)
    )
}

#[tokio::test]
async fn basic_auth_acl_entry_takes_precedence() {
    let config = GatewayConfig {
        acl: vec![
            AclConfig {
                http_basic_auth: Some("admin:secret".into()),
                ..AclConfig::default()
            },
            AclConfig {
                enabled: vec!["GET".into(), "PING".into()],
                ..AclConfig::default()
            },
        ],
        ..GatewayConfig::default()
    };
    let gateway = TestGateway::start(config).await;
    let mut client = gateway.connect().await;

    assert_eq!(client.get("/SET/k/v").await.status, 403);
    assert_eq!(client.get("/GET/k").await.status, 200);

    client
        .send(
            format!(
                "GET /SET/k/v HTTP/1.1\r\nAuthorization: {}\r\n\r\n",
                basic("admin:secret")
            )
            .as_bytes(),
        )
        .await;
    assert_eq!(client.read_response().await.status, 200);

    client
        .send(
            format!(
                "GET /SET/k/v HTTP/1.1\r\nAuthorization: {}\r\n\r\n",
                basic("admin:wrong")
            )
            .as_bytes(),
        )
        .await;
    assert_eq!(client.read_response().await.status, 403);
}

#[tokio::test]
async fn no_matching_acl_denies_everything() {
    let config = GatewayConfig {
        acl: vec![AclConfig {
            ip: Some("10.0.0.0/24".into()),
            ..AclConfig::default()
        }],
        ..GatewayConfig::default()
    };
    let gateway = TestGateway::start(config).await;
    let mut client = gateway.connect().await;
    let response = client.get("/PING").await;
    assert_eq!(response.status, 403);
    assert_eq!(response.text(), r#"{"PING":[false,"forbidden"]}"#);
}

#[tokio::test]
async fn default_acl_blocks_flushall() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    assert_eq!(client.get("/FLUSHALL").await.status, 403);
    assert_eq!(client.get("/flushall").await.status, 403);
    assert_eq!(client.get("/FlushDb").await.status, 403);
    assert_eq!(client.get("/ping").await.text(), r#"{"PING":[true,"PONG"]}"#);
}

#[tokio::test]
async fn lower_case_subscribe_is_denied_like_upper_case() {
    let config = GatewayConfig {
        acl: vec![AclConfig {
            disabled: vec!["SUBSCRIBE".into()],
            ..AclConfig::default()
        }],
        ..GatewayConfig::default()
    };
    let gateway = TestGateway::start(config).await;
    let mut client = gateway.connect().await;
    assert_eq!(client.get("/subscribe/c").await.status, 403);
    assert_eq!(client.get("/Subscribe/c").await.status, 403);
    assert_eq!(gateway.state.hub.topic_count(), 0);
    assert_eq!(gateway.backend.live_subscriptions(), 0);
}

#[tokio::test]
async fn half_closed_client_gets_its_response() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut client = gateway.connect().await;
    client.send(b"GET /ECHO/bye HTTP/1.0\r\n\r\n").await;
    client.finish_sending().await;

    let response = client.read_response().await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), r#"{"ECHO":"bye"}"#);
    assert!(client.is_closed().await);
}

//! Shared utilities for integration tests: an in-memory backend, a gateway
//! on an ephemeral port, and raw HTTP/1.1 helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use redis_gateway::backend::{Backend, BackendError, Command, Message, MessageStream, Reply, Topic};
use redis_gateway::config::GatewayConfig;
use redis_gateway::http::{GatewayState, HttpServer};
use redis_gateway::lifecycle::Shutdown;
use redis_gateway::net::Listener;

#[derive(Default)]
struct Store {
    databases: HashMap<u32, HashMap<Bytes, Bytes>>,
    subscribers: Vec<(Topic, mpsc::UnboundedSender<Message>)>,
}

/// A tiny Redis: strings per database plus pub/sub.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
}

fn topic_matches(topic: &Topic, channel: &str) -> bool {
    match topic {
        Topic::Channel(name) => name == channel,
        Topic::Pattern(pattern) => match pattern.strip_suffix('*') {
            Some(prefix) => channel.starts_with(prefix),
            None => pattern == channel,
        },
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_subscriptions(&self) -> usize {
        let mut store = self.store.lock().unwrap();
        store.subscribers.retain(|(_, tx)| !tx.is_closed());
        store.subscribers.len()
    }

    fn execute(&self, command: Command) -> Result<Reply, BackendError> {
        let mut store = self.store.lock().unwrap();
        let arg = |i: usize| command.args.get(i).cloned().unwrap_or_default();
        let db = store.databases.entry(command.database.unwrap_or(0)).or_default();
        match command.name.to_ascii_uppercase().as_str() {
            "PING" => Ok(Reply::Status("PONG".into())),
            "ECHO" => Ok(Reply::Bulk(arg(0))),
            "GET" => Ok(db.get(&arg(0)).cloned().map(Reply::Bulk).unwrap_or(Reply::Nil)),
            "SET" => {
                db.insert(arg(0), arg(1));
                Ok(Reply::Status("OK".into()))
            }
            "DEL" => {
                let removed = command.args.iter().filter(|key| db.remove(*key).is_some()).count();
                Ok(Reply::Integer(removed as i64))
            }
            "INCR" => {
                let current = db
                    .get(&arg(0))
                    .map(|v| String::from_utf8_lossy(v).parse::<i64>())
                    .transpose()
                    .map_err(|_| BackendError::Reply("ERR value is not an integer".into()))?
                    .unwrap_or(0);
                db.insert(arg(0), Bytes::from((current + 1).to_string()));
                Ok(Reply::Integer(current + 1))
            }
            "PUBLISH" => {
                let channel = String::from_utf8_lossy(&arg(0)).into_owned();
                let payload = arg(1);
                store.subscribers.retain(|(_, tx)| !tx.is_closed());
                let mut delivered = 0;
                for (topic, tx) in &store.subscribers {
                    if topic_matches(topic, &channel) {
                        let message = Message {
                            topic: topic.clone(),
                            channel: channel.clone(),
                            payload: payload.clone(),
                        };
                        if tx.send(message).is_ok() {
                            delivered += 1;
                        }
                    }
                }
                Ok(Reply::Integer(delivered))
            }
            _ => Err(BackendError::Reply(format!(
                "ERR unknown command '{}'",
                command.name
            ))),
        }
    }
}

impl Backend for MemoryBackend {
    fn dispatch(&self, command: Command) -> BoxFuture<'static, Result<Reply, BackendError>> {
        let backend = self.clone();
        Box::pin(async move { backend.execute(command) })
    }

    fn subscribe(&self, topic: Topic) -> BoxFuture<'static, Result<MessageStream, BackendError>> {
        let backend = self.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            backend.store.lock().unwrap().subscribers.push((topic, tx));
            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|message| (message, rx))
            });
            Ok(stream.boxed())
        })
    }
}

/// A gateway running on 127.0.0.1 with an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub backend: MemoryBackend,
    pub state: Arc<GatewayState>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let backend = MemoryBackend::new();
        let server = HttpServer::new(&config, Arc::new(backend.clone())).unwrap();
        let state = server.state();
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_listener(tcp, 64).unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        tokio::spawn(server.run(listener, shutdown.clone()));
        Self {
            addr,
            backend,
            state,
            shutdown,
        }
    }

    pub async fn connect(&self) -> Client {
        Client::new(TcpStream::connect(self.addr).await.unwrap())
    }
}

/// A parsed response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A raw HTTP/1.1 client over one TCP connection.
pub struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, raw: &[u8]) {
        self.reader.get_mut().write_all(raw).await.unwrap();
    }

    /// Shut down the write side, keeping the read side open.
    pub async fn finish_sending(&mut self) {
        self.reader.get_mut().shutdown().await.unwrap();
    }

    pub async fn get(&mut self, path: &str) -> HttpResponse {
        self.send(format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path).as_bytes())
            .await;
        self.read_response().await
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for the gateway")
            .unwrap();
        assert!(n > 0, "connection closed");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Status and headers.
    pub async fn read_head(&mut self) -> (u16, Vec<(String, String)>) {
        let status_line = self.read_line().await;
        let status = status_line[9..12].parse().unwrap();
        let mut headers = Vec::new();
        loop {
            let line = self.read_line().await;
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').unwrap();
            headers.push((name.to_string(), value.trim().to_string()));
        }
        (status, headers)
    }

    pub async fn read_response(&mut self) -> HttpResponse {
        let (status, headers) = self.read_head().await;
        let length = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse::<usize>().unwrap())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await.unwrap();
        HttpResponse {
            status,
            headers,
            body,
        }
    }

    /// One chunk of a chunked body; `None` for the terminating chunk.
    pub async fn read_chunk(&mut self) -> Option<String> {
        let size = usize::from_str_radix(&self.read_line().await, 16).unwrap();
        if size == 0 {
            self.read_line().await;
            return None;
        }
        let mut data = vec![0u8; size + 2];
        self.reader.read_exact(&mut data).await.unwrap();
        data.truncate(size);
        Some(String::from_utf8(data).unwrap())
    }

    /// True if nothing arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        let mut byte = [0u8; 1];
        tokio::time::timeout(wait, self.reader.read(&mut byte)).await.is_err()
    }

    /// True once the gateway has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.reader.read_to_end(&mut rest)).await,
            Ok(Ok(_))
        )
    }
}

//! In-memory backend used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Semaphore};

use super::{Backend, BackendError, Command, Message, MessageStream, Reply, Topic};

#[derive(Default)]
struct State {
    store: HashMap<Bytes, Bytes>,
    calls: Vec<Command>,
    subscribers: Vec<(Topic, mpsc::UnboundedSender<Message>)>,
}

/// Understands `PING`, `GET`, `SET`, `PUBLISH`; `FAIL` answers with an
/// error reply and `DOWN` behaves like an unreachable server.
#[derive(Clone, Default)]
pub(crate) struct StubBackend {
    state: Arc<Mutex<State>>,
    gate: Option<Arc<Semaphore>>,
    upstream_subscriptions: Arc<AtomicUsize>,
}

impl StubBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A backend whose dispatches wait for a permit on the returned gate.
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (backend, gate)
    }

    pub(crate) fn calls(&self) -> Vec<Command> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn upstream_subscriptions(&self) -> usize {
        self.upstream_subscriptions.load(Ordering::SeqCst)
    }

    /// Number of live upstream subscriber streams.
    pub(crate) fn live_streams(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }

    pub(crate) fn publish(&self, channel: &str, payload: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        let mut delivered = 0;
        for (topic, tx) in &state.subscribers {
            let hit = match topic {
                Topic::Channel(name) => name == channel,
                Topic::Pattern(pattern) => match pattern.strip_suffix('*') {
                    Some(prefix) => channel.starts_with(prefix),
                    None => pattern == channel,
                },
            };
            if hit {
                let message = Message {
                    topic: topic.clone(),
                    channel: channel.to_string(),
                    payload: Bytes::copy_from_slice(payload.as_bytes()),
                };
                if tx.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn execute(&self, command: &Command) -> Result<Reply, BackendError> {
        let arg = |i: usize| command.args.get(i).cloned().unwrap_or_default();
        match command.name.to_ascii_uppercase().as_str() {
            "PING" => Ok(Reply::Status("PONG".into())),
            "GET" => Ok(self
                .state
                .lock()
                .unwrap()
                .store
                .get(&arg(0))
                .cloned()
                .map(Reply::Bulk)
                .unwrap_or(Reply::Nil)),
            "SET" => {
                self.state.lock().unwrap().store.insert(arg(0), arg(1));
                Ok(Reply::Status("OK".into()))
            }
            "PUBLISH" => {
                let channel = String::from_utf8_lossy(&arg(0)).into_owned();
                let payload = String::from_utf8_lossy(&arg(1)).into_owned();
                Ok(Reply::Integer(self.publish(&channel, &payload)))
            }
            "FAIL" => Err(BackendError::Reply("ERR induced failure".into())),
            "DOWN" => Err(BackendError::Unavailable("connection refused".into())),
            _ => Err(BackendError::Reply(format!("ERR unknown command '{}'", command.name))),
        }
    }
}

impl Backend for StubBackend {
    fn dispatch(&self, command: Command) -> BoxFuture<'static, Result<Reply, BackendError>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.state.lock().unwrap().calls.push(command.clone());
            if let Some(gate) = &backend.gate {
                gate.acquire()
                    .await
                    .map_err(|_| BackendError::Unavailable("gate closed".into()))?
                    .forget();
            }
            backend.execute(&command)
        })
    }

    fn subscribe(&self, topic: Topic) -> BoxFuture<'static, Result<MessageStream, BackendError>> {
        let backend = self.clone();
        Box::pin(async move {
            if topic.name() == "DOWN" {
                return Err(BackendError::Unavailable("connection refused".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            backend.state.lock().unwrap().subscribers.push((topic, tx));
            backend.upstream_subscriptions.fetch_add(1, Ordering::SeqCst);
            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|message| (message, rx))
            });
            Ok(stream.boxed())
        })
    }
}

//! In-process job servers for integration tests.
//!
//! [`FakeServer`] speaks enough of the protocol to exercise clients and
//! workers: it queues submissions, assigns jobs to workers that announced the
//! function, wakes sleeping workers with `noop`, and forwards work results to
//! the submitting connection.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use gearman_client::protocol::{Codec, CommandTable, Magic, Packet};
use gearman_client::transport::ServerAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What a worker reported for a handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Complete(Bytes),
    Fail,
}

struct QueuedJob {
    handle: String,
    function: String,
    arg: Bytes,
}

struct Peer {
    tx: mpsc::UnboundedSender<Bytes>,
    abilities: HashSet<String>,
    sleeping: bool,
}

#[derive(Default)]
struct State {
    next_conn: usize,
    next_handle: u64,
    queue: VecDeque<QueuedJob>,
    owners: HashMap<String, usize>,
    peers: HashMap<usize, Peer>,
    received: Vec<(usize, String)>,
    client_ids: Vec<String>,
    outcomes: HashMap<String, Outcome>,
    tasks: Vec<JoinHandle<()>>,
}

impl State {
    fn send(&self, to: usize, frame: Bytes) {
        if let Some(peer) = self.peers.get(&to) {
            let _ = peer.tx.send(frame);
        }
    }

    fn has_job_for(&self, abilities: &HashSet<String>) -> bool {
        self.queue.iter().any(|j| abilities.contains(&j.function))
    }

    fn wake_sleepers(&mut self, codec: &Codec, function: &str) {
        let noop = response(codec, "noop", &[]);
        for peer in self.peers.values_mut() {
            if peer.sleeping && peer.abilities.contains(function) {
                peer.sleeping = false;
                let _ = peer.tx.send(noop.clone());
            }
        }
    }
}

/// A minimal job server bound to an ephemeral localhost port.
pub struct FakeServer {
    port: u16,
    state: Arc<Mutex<State>>,
    accept: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let accept = tokio::spawn(accept_loop(listener, state.clone()));
        Self {
            port,
            state,
            accept,
        }
    }

    /// `host:port` string for builders.
    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn server_addr(&self) -> ServerAddr {
        ServerAddr::new("127.0.0.1", Some(self.port)).unwrap()
    }

    /// Names of every command received, in arrival order.
    pub fn received(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.received.iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.received.iter().filter(|(_, name)| name == command).count()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().client_ids.clone()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }

    pub fn outcome(&self, handle: &str) -> Option<Outcome> {
        self.state.lock().unwrap().outcomes.get(handle).cloned()
    }

    /// Queue a job with no submitter attached and return its handle.
    pub fn enqueue(&self, function: &str, arg: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = format!("H:test:{}", state.next_handle);
        state.queue.push_back(QueuedJob {
            handle: handle.clone(),
            function: function.to_string(),
            arg: Bytes::copy_from_slice(arg),
        });
        handle
    }

    /// Drop every open connection. The listener keeps accepting.
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock().unwrap();
        for task in state.tasks.drain(..) {
            task.abort();
        }
        state.peers.clear();
    }

    /// Poll `condition` every 10ms until it holds or `timeout` passes.
    pub async fn wait_for(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept.abort();
        if let Ok(mut state) = self.state.lock() {
            for task in state.tasks.drain(..) {
                task.abort();
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<State>>) {
    while let Ok((stream, _)) = listener.accept().await {
        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        let mut guard = state.lock().unwrap();
        let id = guard.next_conn;
        guard.next_conn += 1;
        guard.peers.insert(
            id,
            Peer {
                tx,
                abilities: HashSet::new(),
                sleeping: false,
            },
        );

        let write_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });
        let read_task = tokio::spawn(read_loop(reader, id, state.clone()));
        guard.tasks.push(write_task);
        guard.tasks.push(read_task);
        drop(guard);
    }
}

async fn read_loop(mut reader: tokio::net::tcp::OwnedReadHalf, id: usize, state: Arc<Mutex<State>>) {
    let mut codec = Codec::new(Arc::new(CommandTable::standard()));
    let mut buf = vec![0u8; 4096];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        codec.push(&buf[..n]);

        loop {
            match codec.decode() {
                Ok(Some(packet)) => handle_packet(&state, id, &codec, &packet),
                Ok(None) => break,
                Err(_) => {
                    state.lock().unwrap().peers.remove(&id);
                    return;
                }
            }
        }
    }

    state.lock().unwrap().peers.remove(&id);
}

fn handle_packet(state: &Mutex<State>, id: usize, codec: &Codec, packet: &Packet) {
    let mut state = state.lock().unwrap();
    state.received.push((id, packet.name().to_string()));
    let text = |field: &str| packet.field_str(field).unwrap_or_default().into_owned();

    match packet.name() {
        name if name.starts_with("submit_job") => {
            state.next_handle += 1;
            let handle = format!("H:test:{}", state.next_handle);
            let function = text("func");
            let background = name.ends_with("_bg") || name == "submit_job_epoch";
            if !background {
                state.owners.insert(handle.clone(), id);
            }
            state.queue.push_back(QueuedJob {
                handle: handle.clone(),
                function: function.clone(),
                arg: packet.field("arg").cloned().unwrap_or_default(),
            });
            state.send(id, response(codec, "job_created", &[("handle", handle.as_bytes())]));
            state.wake_sleepers(codec, &function);
        }
        "can_do" | "can_do_timeout" => {
            let function = text("func");
            if let Some(peer) = state.peers.get_mut(&id) {
                peer.abilities.insert(function);
            }
        }
        "cant_do" => {
            let function = text("func");
            if let Some(peer) = state.peers.get_mut(&id) {
                peer.abilities.remove(&function);
            }
        }
        "set_client_id" => {
            let client_id = text("client_id");
            state.client_ids.push(client_id);
        }
        "grab_job" => {
            let abilities = state
                .peers
                .get(&id)
                .map(|p| p.abilities.clone())
                .unwrap_or_default();
            let position = state.queue.iter().position(|j| abilities.contains(&j.function));
            let frame = match position {
                Some(pos) => {
                    let job = state.queue.remove(pos).unwrap();
                    response(
                        codec,
                        "job_assign",
                        &[
                            ("handle", job.handle.as_bytes()),
                            ("func", job.function.as_bytes()),
                            ("arg", &job.arg[..]),
                        ],
                    )
                }
                None => response(codec, "no_job", &[]),
            };
            state.send(id, frame);
        }
        "pre_sleep" => {
            let abilities = state
                .peers
                .get(&id)
                .map(|p| p.abilities.clone())
                .unwrap_or_default();
            if state.has_job_for(&abilities) {
                state.send(id, response(codec, "noop", &[]));
            } else if let Some(peer) = state.peers.get_mut(&id) {
                peer.sleeping = true;
            }
        }
        "work_status" | "work_complete" | "work_fail" => {
            let handle = text("handle");
            match packet.name() {
                "work_complete" => {
                    let result = packet.field("result").cloned().unwrap_or_default();
                    state.outcomes.insert(handle.clone(), Outcome::Complete(result));
                }
                "work_fail" => {
                    state.outcomes.insert(handle.clone(), Outcome::Fail);
                }
                _ => {}
            }
            if let Some(&owner) = state.owners.get(&handle) {
                let fields: Vec<(&str, &[u8])> = packet
                    .command
                    .fields
                    .iter()
                    .zip(packet.fields.iter())
                    .map(|(name, value)| (*name, &value[..]))
                    .collect();
                state.send(owner, response(codec, packet.name(), &fields));
            }
        }
        "echo_req" => {
            let text = packet.field("text").cloned().unwrap_or_default();
            state.send(id, response(codec, "echo_res", &[("text", &text[..])]));
        }
        _ => {}
    }
}

fn response(codec: &Codec, command: &str, fields: &[(&str, &[u8])]) -> Bytes {
    codec.encode_as(Magic::Response, command, fields).unwrap()
}

/// A server that accepts connections and never answers.
pub async fn silent_server() -> (ServerAddr, JoinHandle<()>) {
    raw_server(Vec::new()).await
}

/// A server that writes `bytes` to every connection, then only reads.
pub async fn raw_server(bytes: Vec<u8>) -> (ServerAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let bytes = bytes.clone();
            tokio::spawn(drain_after_write(stream, bytes));
        }
    });

    (ServerAddr::new("127.0.0.1", Some(port)).unwrap(), task)
}

async fn drain_after_write(mut stream: TcpStream, bytes: Vec<u8>) {
    if !bytes.is_empty() && stream.write_all(&bytes).await.is_err() {
        return;
    }
    let mut buf = [0u8; 1024];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> ServerAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ServerAddr::new("127.0.0.1", Some(port)).unwrap()
}

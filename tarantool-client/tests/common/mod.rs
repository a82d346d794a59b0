//! Common test utilities for integration tests.
//!
//! [`MockServer`] speaks the client's frame format over a real TCP listener.
//! Requests are answered by function name:
//!
//! | Request | Response |
//! |---------|----------|
//! | ping | empty ok |
//! | call `echo` | the arguments |
//! | call `sleep` | the arguments, after the number of milliseconds they encode (u64 LE) |
//! | call `fail` | error response, code 32 |
//! | call `silent` | nothing |
//! | eval | the arguments |

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures::{SinkExt, StreamExt};
use tarantool_client::core::protocol::{REQUEST_CALL, REQUEST_EVAL, REQUEST_PING};
use tarantool_client::core::PacketCodec;
use tarantool_client::{ClientConfig, Packet};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::codec::Framed;

/// Error code returned for the `fail` function and unknown functions.
pub const SERVER_ERROR_CODE: u32 = 32;

/// In-process server answering client requests.
#[derive(Debug)]
pub struct MockServer {
    address: SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    sessions: Arc<Mutex<Vec<AbortHandle>>>,
    acceptor: AbortHandle,
}

impl MockServer {
    /// Starts a server on an ephemeral local port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let address = listener.local_addr().expect("listener has no address");

        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let sessions = Arc::new(Mutex::new(Vec::new()));

        let acceptor = tokio::spawn({
            let accepted = Arc::clone(&accepted);
            let requests = Arc::clone(&requests);
            let sessions = Arc::clone(&sessions);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let session = tokio::spawn(serve(stream, Arc::clone(&requests)));
                    sessions.lock().unwrap().push(session.abort_handle());
                    // Counted after registration so a counted session can be killed.
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .abort_handle();

        Self {
            address,
            accepted,
            requests,
            sessions,
            acceptor,
        }
    }

    /// Returns the listening address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns how many connections were accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` connections were accepted.
    ///
    /// The client finishes connecting as soon as the kernel completes the
    /// handshake, which can be before the acceptor task has run.
    pub async fn wait_accepted(&self, count: usize) {
        let waiting = async {
            while self.accepted() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), waiting).await.is_err() {
            panic!(
                "mock server accepted {} connections, expected {}",
                self.accepted(),
                count
            );
        }
    }

    /// Returns how many requests were received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Drops every accepted connection while keeping the listener open.
    pub fn kill_connections(&self) {
        for session in self.sessions.lock().unwrap().drain(..) {
            session.abort();
        }
    }

    /// Stops listening and drops every accepted connection.
    pub fn shutdown(&self) {
        self.acceptor.abort();
        self.kill_connections();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(stream: TcpStream, requests: Arc<AtomicUsize>) {
    let (mut sink, mut source) = Framed::new(stream, PacketCodec::new()).split();
    let (responses, mut outbound) = mpsc::unbounded_channel::<Packet>();

    let writer = async move {
        while let Some(response) = outbound.recv().await {
            if sink.send(response).await.is_err() {
                break;
            }
        }
    };

    let reader = async move {
        while let Some(Ok(request)) = source.next().await {
            requests.fetch_add(1, Ordering::SeqCst);
            let responses = responses.clone();
            tokio::spawn(async move {
                if let Some(response) = respond(request).await {
                    let _ = responses.send(response);
                }
            });
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }
}

async fn respond(request: Packet) -> Option<Packet> {
    let sync_id = request.sync_id();
    match request.code() {
        REQUEST_PING => Some(Packet::ok_response(sync_id, Bytes::new())),
        REQUEST_EVAL => {
            let (_, args) = split_named_body(request.into_body());
            Some(Packet::ok_response(sync_id, args))
        }
        REQUEST_CALL => {
            let (function, args) = split_named_body(request.into_body());
            match function.as_str() {
                "echo" => Some(Packet::ok_response(sync_id, args)),
                "sleep" => {
                    let mut millis = args.clone();
                    tokio::time::sleep(Duration::from_millis(millis.get_u64_le())).await;
                    Some(Packet::ok_response(sync_id, args))
                }
                "fail" => Some(Packet::error_response(sync_id, SERVER_ERROR_CODE, "boom")),
                "silent" => None,
                other => Some(Packet::error_response(
                    sync_id,
                    SERVER_ERROR_CODE,
                    &format!("function '{other}' not found"),
                )),
            }
        }
        code => Some(Packet::error_response(
            sync_id,
            SERVER_ERROR_CODE,
            &format!("unsupported request code {code}"),
        )),
    }
}

fn split_named_body(mut body: Bytes) -> (String, Bytes) {
    let length = body.get_u32_le() as usize;
    let name = body.split_to(length);
    (String::from_utf8_lossy(&name).into_owned(), body)
}

/// Encodes a `sleep` argument.
pub fn sleep_args(duration: Duration) -> Bytes {
    Bytes::copy_from_slice(&(duration.as_millis() as u64).to_le_bytes())
}

/// Builds a configuration pointing at the given servers.
pub fn config_for(servers: &[&MockServer], connections_per_node: usize) -> ClientConfig {
    ClientConfig::builder()
        .addresses(servers.iter().map(|server| server.address()))
        .connections_per_node(connections_per_node)
        .connect_timeout(Duration::from_millis(500))
        .request_timeout(Duration::from_secs(2))
        .build()
        .expect("failed to build config")
}

//! Shared utilities for integration testing: a scriptable fake projector.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::Instant;

use pjlink_resilient::protocol::{compute_auth_prefix, parse_request, DecodedRequest};
use pjlink_resilient::Endpoint;

/// First line the device sends.
#[derive(Clone)]
pub enum Greeting {
    NoAuth,
    Auth {
        seed: &'static str,
        password: &'static str,
    },
}

/// What the device does with one request.
pub enum Reply {
    /// Send this line (terminator added).
    Line(String),
    /// Wait, then send this line.
    After(Duration, String),
    /// Never answer; keep the socket open.
    Hang,
    /// Close the socket without answering.
    Close,
}

/// `%{class}{OP}={value}` for the request's own class.
pub fn answer(request: &DecodedRequest, value: &str) -> Reply {
    Reply::Line(format!("%{}{}={}", request.class, request.operation, value))
}

#[derive(Default)]
struct Counters {
    connections: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
    requests: Mutex<Vec<String>>,
    arrivals: Mutex<Vec<Instant>>,
}

/// A fake projector on 127.0.0.1 with an ephemeral port.
pub struct FakeDevice {
    pub endpoint: Endpoint,
    counters: Arc<Counters>,
}

impl FakeDevice {
    pub async fn start<F>(greeting: Greeting, handler: F) -> Self
    where
        F: Fn(&DecodedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let counters = Arc::new(Counters::default());
        let handler = Arc::new(handler);

        let shared = counters.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let counters = shared.clone();
                let handler = handler.clone();
                let greeting = greeting.clone();

                counters.connections.fetch_add(1, Ordering::SeqCst);
                let open = counters.open.fetch_add(1, Ordering::SeqCst) + 1;
                counters.max_open.fetch_max(open, Ordering::SeqCst);

                tokio::spawn(async move {
                    session(socket, greeting, handler.as_ref(), &counters).await;
                    counters.open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            counters,
        }
    }

    /// A device that answers every request with `value`.
    pub async fn answering(value: &'static str) -> Self {
        Self::start(Greeting::NoAuth, move |req| answer(req, value)).await
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// Most connections open at the same time.
    pub fn max_open(&self) -> usize {
        self.counters.max_open.load(Ordering::SeqCst)
    }

    /// Request lines received, terminator stripped, auth prefix included.
    pub fn requests(&self) -> Vec<String> {
        self.counters.requests.lock().unwrap().clone()
    }

    /// Time between consecutive requests, in arrival order.
    pub fn request_gaps(&self) -> Vec<Duration> {
        let arrivals = self.counters.arrivals.lock().unwrap();
        arrivals.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

async fn session<F>(socket: tokio::net::TcpStream, greeting: Greeting, handler: &F, counters: &Counters)
where
    F: Fn(&DecodedRequest) -> Reply,
{
    let mut stream = BufReader::new(socket);
    let expected_prefix = match &greeting {
        Greeting::NoAuth => {
            if stream.get_mut().write_all(b"PJLINK 0\r").await.is_err() {
                return;
            }
            None
        }
        Greeting::Auth { seed, password } => {
            let line = format!("PJLINK 1 {seed}\r");
            if stream.get_mut().write_all(line.as_bytes()).await.is_err() {
                return;
            }
            Some(compute_auth_prefix(seed, password).unwrap())
        }
    };
    let mut authenticated = expected_prefix.is_none();

    let mut line = Vec::new();
    loop {
        line.clear();
        match stream.read_until(b'\r', &mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let text = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
        counters.requests.lock().unwrap().push(text);
        counters.arrivals.lock().unwrap().push(Instant::now());

        let Ok(request) = parse_request(&line) else {
            return;
        };
        if !authenticated {
            if request.auth_prefix.is_some() && request.auth_prefix == expected_prefix {
                authenticated = true;
            } else {
                let _ = stream.get_mut().write_all(b"PJLINK ERRA\r").await;
                return;
            }
        }

        let reply = match handler(&request) {
            Reply::Line(line) => line,
            Reply::After(delay, line) => {
                tokio::time::sleep(delay).await;
                line
            }
            Reply::Hang => {
                std::future::pending::<()>().await;
                return;
            }
            Reply::Close => return,
        };
        if stream
            .get_mut()
            .write_all(format!("{reply}\r").as_bytes())
            .await
            .is_err()
        {
            return;
        }
    }
}

/// An endpoint nothing listens on.
pub async fn closed_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Endpoint::new("127.0.0.1", port)
}

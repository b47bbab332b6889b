//! An in-process HTTP server for tests that talk to bidders or collectors.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

/// A request as seen by the mock server.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct MockResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn json(status: StatusCode, body: &[u8]) -> Self {
        Self {
            status,
            body: Bytes::copy_from_slice(body),
            delay: None,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: Bytes::new(),
            delay: None,
        }
    }

    /// Holds the response back for `delay` after the request is recorded.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

pub struct MockServer {
    port: u16,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    notify: Arc<Notify>,
}

impl MockServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub async fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().await.clone()
    }

    /// Waits until at least `count` requests arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<ReceivedRequest> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.received.lock().await.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.received().await
    }
}

/// Start a mock HTTP server that records every request and answers with
/// whatever `handler` returns for it.
pub async fn start_mock_server<F>(handler: F) -> MockServer
where
    F: Fn(&ReceivedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);
    let received = Arc::new(Mutex::new(Vec::new()));
    let notify = Arc::new(Notify::new());
    let server_received = received.clone();
    let server_notify = notify.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let handler = handler.clone();
            let received = server_received.clone();
            let notify = server_notify.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    let received = received.clone();
                    let notify = notify.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body
                            .collect()
                            .await
                            .map(|collected| collected.to_bytes())
                            .unwrap_or_default();
                        let request = ReceivedRequest {
                            method: parts.method,
                            path: parts.uri.path().to_string(),
                            headers: parts.headers,
                            body,
                        };

                        let response = handler(&request);
                        received.lock().await.push(request);
                        notify.notify_waiters();

                        if let Some(delay) = response.delay {
                            tokio::time::sleep(delay).await;
                        }

                        let mut builder = Response::builder().status(response.status);
                        if !response.body.is_empty() {
                            builder = builder.header("content-type", "application/json");
                        }
                        Ok::<_, Infallible>(builder.body(Full::new(response.body)).unwrap())
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    MockServer {
        port,
        received,
        notify,
    }
}

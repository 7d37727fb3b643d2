//! Local HTTP servers backing the dispatcher tests.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// One request as observed by a mock backend
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: String,
    pub body: Bytes,
}

/// A running mock backend plus everything it has seen so far
pub struct MockBackend {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Starts a mock backend on an ephemeral port. Every request is recorded,
/// then answered by `respond`.
pub async fn start_mock_backend<F>(respond: F) -> MockBackend
where
    F: Fn(&RecordedRequest) -> Response<Full<Bytes>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = hyper_util::rt::TokioIo::new(stream);
            let recorded = recorded.clone();
            let respond = respond.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let recorded = recorded.clone();
                    let respond = respond.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await.unwrap().to_bytes();
                        let request = RecordedRequest {
                            method: parts.method,
                            uri: parts.uri.to_string(),
                            body,
                        };
                        let response = respond(&request);
                        recorded.lock().unwrap().push(request);
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    MockBackend { port, requests }
}

/// Starts a backend that mirrors each request: the response carries the
/// request's headers and body. Returns the port and a slot holding the most
/// recently seen URI (path and query).
pub async fn start_echo_server() -> (u16, Arc<Mutex<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen_uri = Arc::new(Mutex::new(String::new()));

    let seen = seen_uri.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = hyper_util::rt::TokioIo::new(stream);
            let seen = seen.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let seen = seen.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        *seen.lock().unwrap() = parts.uri.to_string();
                        let body = body.collect().await.unwrap().to_bytes();

                        let mut response = Response::new(Full::new(body));
                        *response.headers_mut() = parts.headers;
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (port, seen_uri)
}

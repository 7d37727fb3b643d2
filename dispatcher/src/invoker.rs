use crate::config::BackendSettings;
use crate::errors::GatewayError;
use crate::metrics_defs::BACKEND_CALL_DURATION;
use http::header::{CONTENT_TYPE, HOST, HeaderMap};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::headers::{add_via_header, filter_hop_by_hop};
use shared::histogram;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// A fully collected backend response
#[derive(Clone, Debug)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Issues one HTTP request to a resolved backend URL and collects the whole
/// response. Stateless; shared by the composite orchestrator and the
/// response cache engine.
///
/// Hop-by-hop headers are filtered and a Via header appended in both
/// directions. The timeout covers the entire cycle including body
/// collection, so this is not suitable for SSE or other long-lived streams.
#[derive(Clone)]
pub struct BackendInvoker {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl BackendInvoker {
    pub fn new(settings: &BackendSettings) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        BackendInvoker {
            client,
            timeout: settings.timeout(),
        }
    }

    /// Sends `method` to `base_url` joined with `sub_path`/`query`, with the
    /// given headers and body. Transport failures and timeouts surface as
    /// distinct errors with no status code.
    pub async fn invoke(
        &self,
        base_url: &Url,
        sub_path: &str,
        query: Option<&str>,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<BackendResponse, GatewayError> {
        // Host identifies the backend in error messages
        let backend_identifier = base_url.host_str().unwrap_or(base_url.as_str()).to_string();

        let mut url = base_url.clone();
        if !sub_path.is_empty() {
            let joined = format!(
                "{}/{}",
                url.path().trim_end_matches('/'),
                sub_path.trim_start_matches('/')
            );
            url.set_path(&joined);
        }
        url.set_query(query);

        let mut req_builder = Request::builder().method(method).uri(url.as_str());

        let mut forwarded = headers.clone();
        // The client derives Host from the URI; a stale one must not leak through
        forwarded.remove(HOST);
        filter_hop_by_hop(&mut forwarded, http::Version::HTTP_11);
        add_via_header(&mut forwarded, http::Version::HTTP_11);
        for (name, value) in forwarded.iter() {
            req_builder = req_builder.header(name, value);
        }

        let request = req_builder.body(Full::new(body)).map_err(|e| {
            GatewayError::InternalError(format!("Failed to build backend request: {e}"))
        })?;

        let started = tokio::time::Instant::now();
        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| GatewayError::BackendTimeout(backend_identifier.clone()))?
            .map_err(|e| GatewayError::BackendRequestFailed(backend_identifier, e.to_string()))?;

        let collected = self.collect(response).await;
        histogram!(BACKEND_CALL_DURATION).record(started.elapsed().as_secs_f64());
        collected
    }

    async fn collect(
        &self,
        response: Response<hyper::body::Incoming>,
    ) -> Result<BackendResponse, GatewayError> {
        let (mut parts, body) = response.into_parts();
        filter_hop_by_hop(&mut parts.headers, parts.version);
        add_via_header(&mut parts.headers, parts.version);

        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| GatewayError::ResponseBodyError(e.to_string()))?;

        Ok(BackendResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::start_echo_server;

    fn test_invoker(timeout_secs: u64) -> BackendInvoker {
        BackendInvoker::new(&BackendSettings { timeout_secs })
    }

    #[tokio::test]
    async fn test_invoke_joins_sub_path_and_query() {
        let (port, seen) = start_echo_server().await;
        let base = Url::parse(&format!("http://127.0.0.1:{port}/crm")).unwrap();

        let response = test_invoker(5)
            .invoke(
                &base,
                "customers/42",
                Some("expand=orders"),
                Method::GET,
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let uri = seen.lock().unwrap().clone();
        assert_eq!(uri, "/crm/customers/42?expand=orders");
    }

    #[tokio::test]
    async fn test_invoke_filters_hop_by_hop_and_adds_via() {
        let (port, _seen) = start_echo_server().await;
        let base = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("x-custom", "value".parse().unwrap());

        let body = Bytes::from_static(b"hello");
        let response = test_invoker(5)
            .invoke(&base, "", None, Method::POST, &headers, body.clone())
            .await
            .unwrap();

        // echo server reflects the request body and headers
        assert_eq!(response.body, body);
        assert!(response.headers.contains_key("via"));
        assert!(!response.headers.contains_key("connection"));
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        // A backend that accepts the connection but never responds
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let base = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();

        let result = test_invoker(1)
            .invoke(&base, "", None, Method::GET, &HeaderMap::new(), Bytes::new())
            .await;

        assert!(matches!(result, Err(GatewayError::BackendTimeout(_))));
    }

    #[tokio::test]
    async fn test_invoke_connection_refused_is_transport_error() {
        let base = Url::parse("http://127.0.0.1:1").unwrap();

        let result = test_invoker(5)
            .invoke(&base, "", None, Method::GET, &HeaderMap::new(), Bytes::new())
            .await;

        assert!(matches!(
            result,
            Err(GatewayError::BackendRequestFailed(_, _))
        ));
    }
}

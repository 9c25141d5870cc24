//! Elasticsearch-compatible REST backend.
//!
//! Uses a blocking `reqwest` client. Hosts are tried in order; a request only
//! fails with [`BackendError::NoNodes`] once every host refused the connection.

use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, trace};

use super::{Backend, BackendError, SearchRequest};

/// Default connect timeout for ordinary requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default overall timeout for ordinary requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URLs, e.g. `http://localhost:9200`.
    pub hosts: Vec<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["http://localhost:9200".to_string()],
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            username: None,
            password: None,
        }
    }
}

pub struct HttpBackend {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = build_client(config.connect_timeout, config.request_timeout)?;
        Ok(Self { config, client })
    }

    pub fn hosts(&self) -> &[String] {
        &self.config.hosts
    }

    fn url(host: &str, path: &str) -> String {
        format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => req.basic_auth(user, self.config.password.as_ref()),
            None => req,
        }
    }

    /// Send a request to the first host that accepts a connection.
    fn send_with(
        &self,
        client: &Client,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, BackendError> {
        if self.config.hosts.is_empty() {
            return Err(BackendError::NoNodes("no hosts configured".to_string()));
        }
        let mut last_error = String::new();
        for host in &self.config.hosts {
            let url = Self::url(host, path);
            trace!(method = %method, url = %url, "backend request");
            let mut req = self.authorize(client.request(method.clone(), &url));
            if let Some(body) = body {
                req = req.json(body);
            }
            match req.send() {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    debug!(host = %host, error = %e, "host unreachable, trying next");
                    last_error = e.to_string();
                }
                Err(e) => return Err(BackendError::Transport(e.to_string())),
            }
        }
        Err(BackendError::NoNodes(last_error))
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, BackendError> {
        self.send_with(&self.client, method, path, body)
    }

    /// Send and require a 2xx response, decoding its JSON body.
    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, BackendError> {
        let resp = self.send(method, path, body)?;
        decode(resp)
    }

    /// Send a HEAD request: 2xx is `true`, 404 is `false`.
    fn head(&self, client: &Client, path: &str) -> Result<bool, BackendError> {
        let resp = self.send_with(client, Method::HEAD, path, None)?;
        let status = resp.status().as_u16();
        match status {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(BackendError::from_status(status, None)),
        }
    }
}

fn build_client(connect: Duration, total: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .connect_timeout(connect)
        .timeout(total)
        .build()
        .map_err(|e| BackendError::Transport(e.to_string()))
}

fn decode(resp: Response) -> Result<Value, BackendError> {
    let status = resp.status().as_u16();
    let text = resp
        .text()
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    let body = if text.trim().is_empty() {
        None
    } else {
        serde_json::from_str::<Value>(&text).ok()
    };
    if (200..300).contains(&status) {
        return match body {
            Some(v) => Ok(v),
            None if text.trim().is_empty() => Ok(Value::Null),
            None => Err(BackendError::Decode(text)),
        };
    }
    let body = body.or_else(|| {
        (!text.trim().is_empty()).then(|| serde_json::json!({ "error": text.trim() }))
    });
    Err(BackendError::from_status(status, body))
}

fn enc(segment: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(segment)
}

impl Backend for HttpBackend {
    fn create_index(&self, name: &str, body: &Value) -> Result<(), BackendError> {
        self.call(Method::PUT, &enc(name), Some(body)).map(|_| ())
    }

    fn delete_index(&self, name: &str) -> Result<(), BackendError> {
        self.call(Method::DELETE, &enc(name), None).map(|_| ())
    }

    fn index_exists(&self, name: &str) -> Result<bool, BackendError> {
        self.head(&self.client, &enc(name))
    }

    fn index_document(&self, index: &str, id: &str, body: &Value) -> Result<(), BackendError> {
        let path = format!("{}/_doc/{}", enc(index), enc(id));
        self.call(Method::PUT, &path, Some(body)).map(|_| ())
    }

    fn delete_document(&self, index: &str, id: &str) -> Result<(), BackendError> {
        let path = format!("{}/_doc/{}", enc(index), enc(id));
        self.call(Method::DELETE, &path, None).map(|_| ())
    }

    fn document_exists(
        &self,
        index: &str,
        id: &str,
        timeout: Duration,
    ) -> Result<bool, BackendError> {
        // Dedicated client so the probe timeout covers connect and read alike.
        let client = build_client(timeout, timeout)?;
        let path = format!("{}/_doc/{}", enc(index), enc(id));
        self.head(&client, &path)
    }

    fn search(&self, request: &SearchRequest) -> Result<Value, BackendError> {
        let path = format!("{}/_search", enc(&request.index).replace("%2C", ","));
        self.call(Method::POST, &path, Some(&request.body))
    }

    fn cluster_stats(&self) -> Result<Value, BackendError> {
        self.call(Method::GET, "_cluster/stats", None)
    }

    fn put_pipeline(&self, id: &str, body: &Value) -> Result<(), BackendError> {
        let path = format!("_ingest/pipeline/{}", enc(id));
        self.call(Method::PUT, &path, Some(body)).map(|_| ())
    }

    fn delete_pipeline(&self, id: &str) -> Result<(), BackendError> {
        let path = format!("_ingest/pipeline/{}", enc(id));
        self.call(Method::DELETE, &path, None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(
            HttpBackend::url("http://es:9200/", "/listing/_doc/1"),
            "http://es:9200/listing/_doc/1"
        );
    }

    #[test]
    fn config_defaults() {
        let config = HttpBackendConfig::default();
        assert_eq!(config.hosts, vec!["http://localhost:9200".to_string()]);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert!(config.username.is_none());
    }

    #[test]
    fn empty_host_list_is_no_nodes() {
        let backend = HttpBackend::new(HttpBackendConfig {
            hosts: Vec::new(),
            ..Default::default()
        })
        .unwrap();
        let err = backend.cluster_stats().unwrap_err();
        assert!(err.is_no_nodes());
    }

    #[test]
    fn refused_connection_is_no_nodes() {
        // Port 9 (discard) on loopback is closed in test environments.
        let backend = HttpBackend::new(HttpBackendConfig {
            hosts: vec!["http://127.0.0.1:9".to_string()],
            ..Default::default()
        })
        .unwrap();
        let err = backend
            .document_exists("test", "test", Duration::from_millis(500))
            .unwrap_err();
        assert!(err.is_no_nodes(), "unexpected error: {err:?}");
    }
}

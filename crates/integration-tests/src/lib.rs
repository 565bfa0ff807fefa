use std::{net::SocketAddr, time::Duration};

use config::Config;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use server::ServeConfig;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Key configured by [`TestServer::with_admin_key`].
pub const ADMIN_KEY: &str = "integration-tests-admin-key-0123456789";

/// Test client for making HTTP requests to the test server
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
    custom_headers: HeaderMap,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            custom_headers: HeaderMap::new(),
        }
    }

    /// Add a custom header to be included in all requests
    pub fn push_header(&mut self, key: &str, value: impl AsRef<str>) {
        let header_name = HeaderName::from_bytes(key.as_bytes()).unwrap();
        let header_value = HeaderValue::from_str(value.as_ref()).unwrap();
        self.custom_headers.insert(header_name, header_value);
    }

    /// A copy of this client sending the admin key with every request.
    pub fn with_admin_key(&self) -> Self {
        let mut client = self.clone();
        client.push_header("x-admin-key", ADMIN_KEY);
        client
    }

    /// Create a request with the given method and path
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));

        for (key, value) in &self.custom_headers {
            req = req.header(key.clone(), value.clone());
        }

        req
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path).send().await.unwrap()
    }

    /// Send a POST request without a body
    pub async fn post(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::POST, path).send().await.unwrap()
    }

    /// Send a POST request with a JSON body
    pub async fn post_json<T: serde::Serialize>(&self, path: &str, body: &T) -> reqwest::Response {
        self.request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// Send a PATCH request with a JSON body
    pub async fn patch_json<T: serde::Serialize>(&self, path: &str, body: &T) -> reqwest::Response {
        self.request(reqwest::Method::PATCH, path)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// Send a DELETE request to the given path
    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::DELETE, path).send().await.unwrap()
    }

    /// Status and parsed JSON body of a response
    pub async fn json(&self, response: reqwest::Response) -> (u16, Value) {
        let status = response.status().as_u16();
        let body = response.json().await.unwrap();

        (status, body)
    }

    /// Record one call for `client_id` and return the usage snapshot.
    pub async fn record(&self, client_id: &str) -> Value {
        let response = self.post(&format!("/api/usage?clientId={client_id}")).await;
        let (status, body) = self.json(response).await;

        assert_eq!(status, 200, "{body}");
        body["data"].clone()
    }

    /// Read the usage snapshot of `client_id`.
    pub async fn usage(&self, client_id: &str) -> Value {
        let response = self.get(&format!("/api/usage?clientId={client_id}")).await;
        let (status, body) = self.json(response).await;

        assert_eq!(status, 200, "{body}");
        body["data"].clone()
    }

    /// Get the base URL of this test client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    /// Configuration used by this test server
    pub config: Config,
    /// Handle to the server task
    server_task: Option<tokio::task::JoinHandle<()>>,
    /// Shutdown signal for the server
    shutdown_signal: CancellationToken,
    /// Keeps the configuration file alive
    _config_dir: TempDir,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration
    pub async fn start(config_toml: &str) -> Self {
        // Write config to a temporary file and use the proper loader to ensure validation
        let config_dir = tempfile::tempdir().unwrap();
        let config_path = config_dir.path().join("meter.toml");
        std::fs::write(&config_path, config_toml).unwrap();

        let config = Config::load(&config_path).unwrap();

        // Find an available port
        let mut listener = TcpListener::bind("127.0.0.1:0").await;

        #[allow(clippy::panic)]
        while let Err(e) = listener {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                listener = TcpListener::bind("127.0.0.1:0").await;
            } else {
                panic!("Failed to bind to address: {e}");
            }
        }

        let listener = listener.unwrap();
        let address = listener.local_addr().unwrap();

        let shutdown_signal = CancellationToken::new();

        let serve_config = ServeConfig {
            listen_address: address,
            config: config.clone(),
            shutdown_signal: shutdown_signal.clone(),
            log_filter: "server=debug,quota=debug,config=debug".to_string(),
        };

        // Start the server in a background task
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let server_task = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            let _ = tx.send(server::serve(serve_config).await);
        });

        let client = TestClient::new(format!("http://{address}"));

        // Any answer from the router means the server is up
        let mut retries = 50;

        loop {
            #[allow(clippy::panic)]
            if let Ok(Err(e)) = rx.try_recv() {
                panic!("Server failed to start: {e}");
            }

            if client.request(reqwest::Method::GET, "/api/usage").send().await.is_ok() {
                break;
            }

            retries -= 1;

            #[allow(clippy::panic)]
            if retries == 0 {
                panic!("Server failed to become ready after 50 retries");
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestServer {
            client,
            address,
            config,
            server_task: Some(server_task),
            shutdown_signal,
            _config_dir: config_dir,
        }
    }

    /// Start a server using the given configuration plus [`ADMIN_KEY`].
    pub async fn with_admin_key(config_toml: &str) -> Self {
        let config = format!("{config_toml}\n[server]\nadmin_key = \"{ADMIN_KEY}\"\n");
        Self::start(&config).await
    }

    /// Stop the server and wait until it released its resources.
    pub async fn shutdown(mut self) {
        self.shutdown_signal.cancel();

        if let Some(task) = self.server_task.take() {
            task.await.unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // We can't wait for the task to complete in Drop, the cancellation
        // signal triggers a graceful shutdown.
        self.shutdown_signal.cancel();
    }
}

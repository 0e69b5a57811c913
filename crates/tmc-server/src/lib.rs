//! REST server publishing a tmc catalog.
//!
//! Serves the inventory, thing-model, attachment, completion and health
//! routes over `tiny_http`, backed by a [`Catalog`] that either targets one
//! repository or federates every enabled one. Errors are returned as
//! `application/problem+json`.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

pub mod api;
pub mod problem;

pub use api::{Api, ApiRequest, ApiResponse};

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tmc_core::{Catalog, Config, RepoConfig};
use tmc_model::{CancelToken, RepoSpec};
use tracing::{debug, error, info};

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn to_api_request(req: &mut Request) -> std::io::Result<ApiRequest> {
    let mut api_req = ApiRequest::new(req.method().clone(), req.url());
    api_req.content_type = req
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_owned());
    if matches!(req.method(), Method::Post | Method::Put) {
        req.as_reader().read_to_end(&mut api_req.body)?;
    }
    Ok(api_req)
}

/// Handle a single HTTP request.
pub fn handle_request(api: &Api, mut req: Request) {
    let api_req = match to_api_request(&mut req) {
        Ok(r) => r,
        Err(e) => {
            error!("{} {}: read error: {e}", req.method(), req.url());
            let _ = req.respond(Response::empty(StatusCode(400)));
            return;
        }
    };
    let resp = api.handle(&api_req);
    debug!("{} {} -> {}", api_req.method, req.url(), resp.status);

    let mut out = Response::from_data(resp.body).with_status_code(StatusCode(resp.status));
    if let Some(h) = resp.content_type.as_deref().and_then(|ct| header("Content-Type", ct)) {
        out.add_header(h);
    }
    if api_req.method == Method::Get {
        if let Some(h) = header("Access-Control-Allow-Origin", "*") {
            out.add_header(h);
        }
    }
    let _ = req.respond(out);
}

/// A bound listener with its request workers.
pub struct Listener {
    server: Arc<Server>,
    workers: Vec<JoinHandle<()>>,
}

impl Listener {
    /// Bind `addr` and serve with `workers` threads.
    pub fn start(api: Api, addr: &str, workers: usize) -> Result<Self, String> {
        let server = Arc::new(Server::http(addr).map_err(|e| format!("cannot bind {addr}: {e}"))?);
        let api = Arc::new(api);
        let workers = (0..workers.max(1))
            .map(|_| {
                let server = Arc::clone(&server);
                let api = Arc::clone(&api);
                std::thread::spawn(move || {
                    for request in server.incoming_requests() {
                        handle_request(&api, request);
                    }
                })
            })
            .collect();
        Ok(Self { server, workers })
    }

    pub fn port(&self) -> Option<u16> {
        self.server.server_addr().to_ip().map(|a| a.port())
    }

    /// A handle that stops the listener from another thread.
    pub fn stopper(&self) -> Stopper {
        Stopper {
            server: Arc::clone(&self.server),
            workers: self.workers.len(),
        }
    }

    /// Block until every worker has exited.
    pub fn join(self) {
        for w in self.workers {
            let _ = w.join();
        }
        info!("server stopped");
    }
}

#[derive(Clone)]
pub struct Stopper {
    server: Arc<Server>,
    workers: usize,
}

impl Stopper {
    pub fn stop(&self) {
        for _ in 0..self.workers {
            self.server.unblock();
        }
    }
}

/// A test helper that serves a single file repository named `local` on a random port.
///
/// The server listens on `127.0.0.1:{port}`. Drop the `TestServer` to stop it.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    stopper: Stopper,
}

impl TestServer {
    pub fn start(data_dir: PathBuf) -> Self {
        let mut config = Config::default();
        config
            .add("local", RepoConfig::file(data_dir.to_string_lossy()))
            .expect("valid test repository");
        let api = Api::new(
            Arc::new(Catalog::new(config)),
            RepoSpec::Empty,
            "",
            CancelToken::new(),
        );
        let listener = Listener::start(api, "127.0.0.1:0", 2).expect("failed to bind test HTTP server");
        let port = listener.port().expect("not an IP addr");
        let stopper = listener.stopper();
        std::thread::spawn(move || listener.join());
        Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            data_dir,
            stopper,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stopper.stop();
    }
}

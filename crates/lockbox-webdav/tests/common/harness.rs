//! Server harness for integration tests.
//!
//! `run` blocks its thread, so [`serve`] drives the HTTP client from a worker
//! thread spawned by the startup callback and stops the server once the
//! client is done, even if it panicked.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lockbox_fs::testing::{CountingFs, ResourceLedger};
use lockbox_fs::{DynamicFs, FsIo, NativeFs, OpsFsIo};
use lockbox_webdav::{ServerHandle, WebDavRuntime};
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A temporary directory exposed through a counted native filesystem.
pub struct TempShare {
    pub dir: TempDir,
    pub fs: Arc<dyn FsIo>,
    pub ledger: ResourceLedger,
}

impl TempShare {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = ResourceLedger::new();
        let backend = DynamicFs::owned(CountingFs::new(NativeFs::new(), &ledger));
        let fs: Arc<dyn FsIo> =
            Arc::new(OpsFsIo::new(backend).expect("Failed to bridge native fs"));
        Self { dir, fs, ledger }
    }

    pub fn root(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    /// Sorted names directly inside the temporary directory.
    pub fn host_listing(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .expect("Failed to list temp dir")
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Blocking HTTP client bound to one server.
pub struct DavClient {
    client: Client,
    pub base_url: String,
}

impl DavClient {
    /// HTTP/1.1 client for the server's loopback address.
    pub fn loopback(handle: &ServerHandle) -> Self {
        Self::at(&format!("http://127.0.0.1:{}", handle.local_addr().port()))
    }

    /// Client addressing the server through the URI it advertises.
    pub fn public(handle: &ServerHandle) -> Self {
        Self::at(handle.public_uri())
    }

    /// Loopback client that speaks HTTP/2 without upgrade negotiation.
    pub fn http2(handle: &ServerHandle) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .http2_prior_knowledge()
            .build()
            .expect("Failed to create HTTP/2 client");
        Self {
            client,
            base_url: format!("http://127.0.0.1:{}", handle.local_addr().port()),
        }
    }

    fn at(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: &[u8], path: &str) -> reqwest::blocking::RequestBuilder {
        self.client
            .request(Method::from_bytes(method).unwrap(), self.url(path))
    }

    pub fn get(&self, path: &str) -> Response {
        self.request(b"GET", path).send().expect("GET request failed")
    }

    pub fn get_bytes(&self, path: &str) -> Result<Vec<u8>, StatusCode> {
        let resp = self.get(path);
        if resp.status().is_success() {
            Ok(resp.bytes().expect("Failed to read body").to_vec())
        } else {
            Err(resp.status())
        }
    }

    pub fn put(&self, path: &str, body: impl Into<reqwest::blocking::Body>) -> StatusCode {
        self.request(b"PUT", path)
            .body(body)
            .send()
            .expect("PUT request failed")
            .status()
    }

    pub fn put_ok(&self, path: &str, body: impl Into<reqwest::blocking::Body>) {
        let status = self.put(path, body);
        assert!(status.is_success(), "PUT {path} failed with status {status}");
    }

    pub fn mkcol_ok(&self, path: &str) {
        let status = self.request(b"MKCOL", path).send().expect("MKCOL request failed").status();
        assert!(status.is_success(), "MKCOL {path} failed with status {status}");
    }

    pub fn delete(&self, path: &str) -> StatusCode {
        self.request(b"DELETE", path)
            .send()
            .expect("DELETE request failed")
            .status()
    }

    pub fn move_ok(&self, from: &str, to: &str) {
        let status = self
            .request(b"MOVE", from)
            .header("Destination", self.url(to))
            .send()
            .expect("MOVE request failed")
            .status();
        assert!(status.is_success(), "MOVE {from} -> {to} failed with status {status}");
    }

    pub fn copy_ok(&self, from: &str, to: &str) {
        let status = self
            .request(b"COPY", from)
            .header("Destination", self.url(to))
            .send()
            .expect("COPY request failed")
            .status();
        assert!(status.is_success(), "COPY {from} -> {to} failed with status {status}");
    }

    /// PROPFIND with the given depth; returns status and body.
    pub fn propfind(&self, path: &str, depth: &str) -> (StatusCode, String) {
        let resp = self
            .request(b"PROPFIND", path)
            .header("Depth", depth)
            .send()
            .expect("PROPFIND request failed");
        let status = resp.status();
        (status, resp.text().unwrap_or_default())
    }
}

/// Serve `fs` below `root` on an ephemeral port, run `client` against it from
/// another thread, then stop the server and return what `client` returned.
pub fn serve<R: Send + 'static>(
    runtime: &WebDavRuntime,
    fs: &Arc<dyn FsIo>,
    root: &str,
    client: impl FnOnce(&DavClient) -> R + Send + 'static,
) -> R {
    serve_with(runtime, fs, root, DavClient::loopback, client)
}

/// Like [`serve`], with the client built by `connect` from the running
/// server's handle.
pub fn serve_with<R: Send + 'static>(
    runtime: &WebDavRuntime,
    fs: &Arc<dyn FsIo>,
    root: &str,
    connect: impl FnOnce(&ServerHandle) -> DavClient + Send + 'static,
    client: impl FnOnce(&DavClient) -> R + Send + 'static,
) -> R {
    let mut worker = None;
    runtime
        .run(fs, root, 0, |handle| {
            worker = Some(thread::spawn(move || {
                let dav = connect(&handle);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| client(&dav)));
                handle.stop();
                outcome
            }));
        })
        .expect("Server failed");

    let outcome = worker
        .expect("Startup callback never ran")
        .join()
        .expect("Client thread crashed");
    match outcome {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

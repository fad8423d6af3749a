//! Custom assertions for server integration tests.

use reqwest::StatusCode;

use crate::common::DavClient;

/// Assert that a file exists and has the expected content.
pub fn assert_file_content(client: &DavClient, path: &str, expected: &[u8]) {
    match client.get_bytes(path) {
        Ok(actual) => assert_eq!(
            actual,
            expected,
            "File content mismatch at {}: expected {} bytes, got {} bytes",
            path,
            expected.len(),
            actual.len()
        ),
        Err(status) => panic!("Failed to read file {path}: status={status}"),
    }
}

/// Assert that GET on a path returns 404.
pub fn assert_not_found(client: &DavClient, path: &str) {
    assert_eq!(
        client.get(path).status(),
        StatusCode::NOT_FOUND,
        "Expected {path} to be missing"
    );
}

#![allow(dead_code)]

pub mod flaky_store;
pub mod test_client;
pub mod test_server;

pub use flaky_store::FlakyStore;
pub use test_client::TestClient;
pub use test_server::{TestServer, TestServerBuilder};

/// Macro to wrap test functions with a timeout to prevent hanging tests
#[macro_export]
macro_rules! timeout_test {
    ($duration:expr, $body:expr) => {
        tokio::time::timeout($duration, $body)
            .await
            .map_err(|_| anyhow::anyhow!("Test timed out after {:?}", $duration))?
    };
}

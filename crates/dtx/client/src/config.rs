use dtx_core::ResourceConfig;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for an [`crate::XaClient`].
#[derive(Debug, Clone)]
pub struct XaClientConfig {
    /// Coordinator base URL, e.g. `http://localhost:36789/api/dtmsvr`.
    pub server: String,
    /// Callback URL registered for each local branch; the coordinator posts its
    /// commit/rollback decision there.
    pub notify_url: String,
    pub request_timeout: Duration,
    /// Local resource the branches run against.
    pub resource: ResourceConfig,
}

impl XaClientConfig {
    pub fn new(
        server: impl Into<String>,
        notify_url: impl Into<String>,
        resource: ResourceConfig,
    ) -> Self {
        Self {
            server: server.into(),
            notify_url: notify_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resource,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

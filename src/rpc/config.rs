use std::time::Duration;

use super::socket::DEFAULT_REQUEST_TIMEOUT;

#[derive(Debug, Clone)]
/// Dht node configuration.
pub struct Config {
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where the node will try the default port (7881)
    /// and fall back to a random port.
    pub port: Option<u16>,
    /// UDP request timeout duration.
    ///
    /// The longer this duration is, the longer lookups take to give up on
    /// unresponsive nodes. The shorter it is, the more replies from busy
    /// nodes are missed, which costs accuracy and triggers spurious
    /// retransmissions.
    ///
    /// Defaults to 2 seconds.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

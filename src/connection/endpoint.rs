use std::fmt;

pub const SANDBOX_GATEWAY_HOST: &str = "gateway.sandbox.push.apple.com";
pub const PRODUCTION_GATEWAY_HOST: &str = "gateway.push.apple.com";
pub const GATEWAY_PORT: u16 = 2195;

/// The feedback service always listens here, whatever port the gateway uses.
pub const FEEDBACK_PORT: u16 = 2196;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Feedback endpoint paired with this push gateway.
    ///
    /// Apple names its feedback hosts by swapping `gateway` for `feedback` in
    /// the push host (`gateway.push.apple.com` -> `feedback.push.apple.com`).
    /// Hosts without that segment are used unchanged.
    pub fn feedback_for(&self) -> Self {
        Self::new(self.host.replace("gateway", "feedback"), FEEDBACK_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

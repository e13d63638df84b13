//! Client for Apple's legacy binary push gateway and its feedback service.
//!
//! Notifications are encoded into "simple notification" frames and written
//! over a client-certificate TLS session. The feedback service is drained over
//! a separate, short-lived session.

pub mod common;
pub mod connection;
pub mod context;
pub mod error;
pub mod feedback;
pub mod notifications;
pub mod settings;

pub use common::device_token::DeviceToken;
pub use connection::{ConnectionManager, Connector, Endpoint, tls::TlsConnector};
pub use error::GatewayError;
pub use feedback::{entities::FeedbackEntry, service::FeedbackService};
pub use notifications::{
    entities::Notification, retry::RetryPolicy, service::NotificationService,
};
pub use settings::{GatewayConfig, Settings};

use std::sync::Arc;

use crate::{
    connection::{ConnectionManager, tls::TlsConnector},
    feedback::service::FeedbackService,
    notifications::service::NotificationService,
    settings::Settings,
};

pub struct AppContext {
    pub notification_service: NotificationService<TlsConnector>,
    pub feedback_service: FeedbackService<TlsConnector>,
}

impl AppContext {
    /// Wires the push and feedback services to one TLS identity. Nothing is
    /// dialed until the first send or feedback fetch.
    pub fn from_settings(settings: &Settings) -> Self {
        let gateway = &settings.gateway;
        let connector = Arc::new(TlsConnector::from_config(gateway));

        let connection = ConnectionManager::new(connector.clone(), gateway.endpoint())
            .with_persistence(gateway.persistent);
        let notification_service = NotificationService::new(connection, gateway.retry_policy());

        let feedback_service = FeedbackService::new(connector, gateway.feedback_endpoint());

        Self {
            notification_service,
            feedback_service,
        }
    }
}

pub mod endpoint;
mod private_key;
pub mod tls;

use async_trait::async_trait;
use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use crate::error::GatewayError;
pub use endpoint::Endpoint;

/// Opens authenticated byte streams to a gateway endpoint.
#[cfg_attr(test, mockall::automock(type Stream = tokio_test::io::Mock;))]
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream, GatewayError>;
}

#[derive(Debug)]
pub enum ConnectionState<S> {
    Closed,
    Open(S),
}

/// Owns the single session to one gateway endpoint.
///
/// Callers that share a manager must serialize access themselves; the push
/// path keeps it behind a mutex.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    endpoint: Endpoint,
    state: ConnectionState<C::Stream>,
    persistent: bool,
    batch_in_flight: bool,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: Arc<C>, endpoint: Endpoint) -> Self {
        Self {
            connector,
            endpoint,
            state: ConnectionState::Closed,
            persistent: false,
            batch_in_flight: false,
        }
    }

    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open(_))
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    /// Connects unless a session is already open.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn ensure_open(&mut self) -> Result<(), GatewayError> {
        if self.is_open() {
            return Ok(());
        }

        debug!("opening gateway connection");
        let stream = self.connector.connect(&self.endpoint).await?;
        self.state = ConnectionState::Open(stream);
        Ok(())
    }

    /// Writes and flushes `bytes`. A failed write leaves the manager closed.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), GatewayError> {
        let ConnectionState::Open(stream) = &mut self.state else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "gateway connection is not open",
            )
            .into());
        };

        let result = match stream.write_all(bytes).await {
            Ok(()) => stream.flush().await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            self.state = ConnectionState::Closed;
            return Err(err.into());
        }
        Ok(())
    }

    /// Shuts the session down. Safe to call when nothing is open.
    pub async fn close(&mut self) {
        self.batch_in_flight = false;

        let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
        if let ConnectionState::Open(mut stream) = state {
            if let Err(err) = stream.shutdown().await {
                debug!(endpoint = %self.endpoint, "error while closing connection: {}", err);
            }
            debug!(endpoint = %self.endpoint, "gateway connection closed");
        }
    }

    /// Marks the start of a batch. A batch that never reached
    /// [`end_batch`](Self::end_batch) may have left a partial frame on the
    /// wire, so that connection is discarded first.
    pub(crate) async fn begin_batch(&mut self) {
        if self.batch_in_flight {
            warn!(endpoint = %self.endpoint, "previous batch was interrupted, reconnecting");
            self.close().await;
        }
        self.batch_in_flight = true;
    }

    pub(crate) fn end_batch(&mut self) {
        self.batch_in_flight = false;
    }
}

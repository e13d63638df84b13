use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use super::{
    entities::FeedbackEntry,
    parser::{FEEDBACK_RECORD_LEN, parse_record},
};
use crate::{
    connection::{Connector, Endpoint},
    error::GatewayError,
};

/// Drains the feedback service. Each call opens and closes its own
/// connection, independent of any push connection.
pub struct FeedbackService<C: Connector> {
    connector: Arc<C>,
    endpoint: Endpoint,
}

impl<C: Connector> FeedbackService<C> {
    pub fn new(connector: Arc<C>, endpoint: Endpoint) -> Self {
        Self {
            connector,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Reads every record the service has queued, in stream order.
    ///
    /// A read or decode failure discards everything read so far.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn fetch_feedback(&self) -> Result<Vec<FeedbackEntry>, GatewayError> {
        let mut stream = self.connector.connect(&self.endpoint).await?;

        let result = drain_records(&mut stream).await;

        if let Err(err) = stream.shutdown().await {
            debug!("error while closing feedback connection: {}", err);
        }

        match &result {
            Ok(entries) => info!(count = entries.len(), "feedback drained"),
            Err(err) => warn!("feedback read failed: {}", err),
        }
        result
    }
}

async fn drain_records<S>(stream: &mut S) -> Result<Vec<FeedbackEntry>, GatewayError>
where
    S: AsyncRead + Unpin,
{
    let mut entries = Vec::new();
    let mut record = [0u8; FEEDBACK_RECORD_LEN];

    loop {
        let filled = read_record(stream, &mut record).await?;
        if filled < FEEDBACK_RECORD_LEN {
            if filled > 0 {
                debug!(filled, "dropping trailing partial feedback record");
            }
            return Ok(entries);
        }
        entries.push(parse_record(&record)?);
    }
}

/// Fills `record` until it is full or the peer stops sending. Returns how
/// many bytes were read.
async fn read_record<S>(stream: &mut S, record: &mut [u8]) -> io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < record.len() {
        match stream.read(&mut record[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            // peers that drop TCP without a TLS close_notify
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

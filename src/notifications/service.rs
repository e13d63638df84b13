use bytes::Bytes;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use super::{entities::Notification, retry::RetryPolicy};
use crate::{
    connection::{ConnectionManager, Connector},
    error::GatewayError,
};

/// Sends notification batches over one shared gateway connection.
///
/// Every batch runs inside a critical section on the connection, so frames
/// from concurrent callers never interleave on the wire. The gateway does not
/// acknowledge frames: a failed batch is resent whole after reconnecting and
/// devices may receive a notification more than once.
pub struct NotificationService<C: Connector> {
    connection: Mutex<ConnectionManager<C>>,
    retry_policy: RetryPolicy,
}

impl<C: Connector> NotificationService<C> {
    pub fn new(connection: ConnectionManager<C>, retry_policy: RetryPolicy) -> Self {
        Self {
            connection: Mutex::new(connection),
            retry_policy,
        }
    }

    /// Keeps the connection open between batches.
    pub async fn start_persistence(&self) {
        self.connection.lock().await.set_persistent(true);
    }

    /// Goes back to one connection per batch and closes the current one.
    pub async fn stop_persistence(&self) {
        let mut connection = self.connection.lock().await;
        connection.set_persistent(false);
        connection.close().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_open()
    }

    #[instrument(skip(self, message))]
    pub async fn send_notification(
        &self,
        device_token: &str,
        message: Value,
    ) -> Result<(), GatewayError> {
        let notification = Notification::from_hex(device_token, message)?;
        self.send_notifications(&[notification]).await
    }

    /// Writes `notifications` in order over a single session.
    ///
    /// Every frame is encoded before the connection is touched; one bad
    /// notification fails the whole batch without any network I/O.
    #[instrument(skip_all, fields(count = notifications.len()))]
    pub async fn send_notifications(
        &self,
        notifications: &[Notification],
    ) -> Result<(), GatewayError> {
        let frames = notifications
            .iter()
            .map(Notification::packaged_notification)
            .collect::<Result<Vec<_>, _>>()?;

        let mut connection = self.connection.lock().await;
        connection.begin_batch().await;

        let mut attempt = 1;
        loop {
            match Self::write_batch(&mut connection, &frames).await {
                Ok(()) => break,
                Err(err) if err.is_retryable() && self.retry_policy.should_retry(attempt) => {
                    warn!(attempt, "notification batch failed, reconnecting: {}", err);
                    connection.close().await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        "giving up on notification batch: {}",
                        err
                    );
                    connection.close().await;
                    return Err(err);
                }
            }
        }

        connection.end_batch();
        if !connection.is_persistent() {
            connection.close().await;
        }

        debug!(attempts = attempt, "notification batch delivered");
        Ok(())
    }

    async fn write_batch(
        connection: &mut ConnectionManager<C>,
        frames: &[Bytes],
    ) -> Result<(), GatewayError> {
        connection.ensure_open().await?;
        for frame in frames {
            connection.write(frame).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::device_token::DeviceToken,
        connection::{Endpoint, MockConnector},
        notifications::codec::decode_frame,
    };
    use mockall::Sequence;
    use serde_json::json;
    use std::{io, sync::Arc, time::Duration};
    use tokio_test::io::Builder;

    fn notification(id: u8) -> Notification {
        Notification::new(
            DeviceToken::from_bytes([id; 32]),
            json!({"aps": {"alert": format!("message {id}"), "badge": id}}),
        )
    }

    fn frame(notification: &Notification) -> Bytes {
        notification.packaged_notification().unwrap()
    }

    fn service(connector: MockConnector, retries: u32) -> NotificationService<MockConnector> {
        let connection =
            ConnectionManager::new(Arc::new(connector), Endpoint::new("localhost", 2195));
        NotificationService::new(connection, RetryPolicy::new(retries))
    }

    fn refused(endpoint: &Endpoint) -> Result<tokio_test::io::Mock, GatewayError> {
        Err(GatewayError::connection(endpoint, "connection refused"))
    }

    #[tokio::test]
    async fn test_send_notifications_writes_frames_in_order() {
        let batch = [notification(1), notification(2), notification(3)];
        let (a, b, c) = (frame(&batch[0]), frame(&batch[1]), frame(&batch[2]));

        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .once()
            .return_once(move |_| Ok(Builder::new().write(&a).write(&b).write(&c).build()));

        let service = service(connector, 3);
        service.send_notifications(&batch).await.unwrap();

        assert!(!service.is_connected().await);
    }

    #[tokio::test]
    async fn test_empty_batch_still_cycles_connection() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .once()
            .returning(|_| Ok(Builder::new().build()));

        let service = service(connector, 3);
        service.send_notifications(&[]).await.unwrap();

        assert!(!service.is_connected().await);
    }

    #[tokio::test]
    async fn test_write_failure_resends_whole_batch() {
        let batch = [notification(1), notification(2)];
        let (a, b) = (frame(&batch[0]), frame(&batch[1]));
        let first_a = a.clone();

        let mut seq = Sequence::new();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .return_once(move |_| {
                Ok(Builder::new()
                    .write(&first_a)
                    .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
                    .build())
            });
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Builder::new().write(&a).write(&b).build()));

        let service = service(connector, 2);
        service.send_notifications(&batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_retried() {
        let batch = [notification(7)];
        let only = frame(&batch[0]);

        let mut seq = Sequence::new();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .returning(refused);
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Builder::new().write(&only).build()));

        let service = service(connector, 2);
        service.send_notifications(&batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let mut connector = MockConnector::new();
        // first attempt plus `retries - 1` reconnects
        connector.expect_connect().times(3).returning(refused);

        let service = service(connector, 3);
        let result = service.send_notifications(&[notification(1)]).await;

        assert!(matches!(result, Err(GatewayError::Connection { .. })));
        assert!(!service.is_connected().await);
    }

    #[tokio::test]
    async fn test_single_retry_budget_attempts_once() {
        let mut connector = MockConnector::new();
        connector.expect_connect().once().returning(refused);

        let service = service(connector, 1);
        let result = service.send_notifications(&[notification(1)]).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connects_match_policy_max_attempts() {
        for retries in [0, 2, 4] {
            let expected = RetryPolicy::new(retries).max_attempts() as usize;
            let mut connector = MockConnector::new();
            connector.expect_connect().times(expected).returning(refused);

            let result = service(connector, retries)
                .send_notifications(&[notification(1)])
                .await;

            assert!(result.is_err(), "retries = {retries}");
        }
    }

    #[tokio::test]
    async fn test_configuration_error_is_not_retried() {
        let mut connector = MockConnector::new();
        connector.expect_connect().once().returning(|_| {
            Err(GatewayError::Configuration(
                "no client certificate path configured".to_string(),
            ))
        });

        let service = service(connector, 3);
        let result = service.send_notifications(&[notification(1)]).await;

        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalid_token_aborts_before_connecting() {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();

        let service = service(connector, 3);
        let result = service
            .send_notification("abc", json!({"aps": {"alert": "hi"}}))
            .await;

        assert!(matches!(result, Err(GatewayError::Encoding(_))));
    }

    #[tokio::test]
    async fn test_oversized_payload_aborts_batch() {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();

        let oversized = Notification::new(
            DeviceToken::from_bytes([1; 32]),
            json!({"aps": {"alert": "x".repeat(70_000)}}),
        );

        let service = service(connector, 3);
        let result = service
            .send_notifications(&[notification(1), oversized])
            .await;

        assert!(matches!(result, Err(GatewayError::Encoding(_))));
    }

    #[tokio::test]
    async fn test_persistent_mode_reuses_connection() {
        let (first, second) = (notification(1), notification(2));
        let (a, b) = (frame(&first), frame(&second));

        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .once()
            .return_once(move |_| Ok(Builder::new().write(&a).write(&b).build()));

        let service = service(connector, 3);
        service.start_persistence().await;

        service.send_notifications(&[first]).await.unwrap();
        assert!(service.is_connected().await);
        service.send_notifications(&[second]).await.unwrap();
        assert!(service.is_connected().await);

        service.stop_persistence().await;
        assert!(!service.is_connected().await);
    }

    #[tokio::test]
    async fn test_ephemeral_mode_reconnects_every_batch() {
        let (first, second) = (notification(1), notification(2));
        let (a, b) = (frame(&first), frame(&second));

        let mut seq = Sequence::new();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Builder::new().write(&a).build()));
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Builder::new().write(&b).build()));

        let service = service(connector, 3);

        service.send_notifications(&[first]).await.unwrap();
        assert!(!service.is_connected().await);
        service.send_notifications(&[second]).await.unwrap();
        assert!(!service.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_send_does_not_reuse_half_written_connection() {
        let batch = [notification(1), notification(2)];
        let (a, b) = (frame(&batch[0]), frame(&batch[1]));
        let stalled_a = a.clone();

        let mut seq = Sequence::new();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .return_once(move |_| {
                Ok(Builder::new()
                    .write(&stalled_a)
                    .wait(Duration::from_secs(3600))
                    .build())
            });
        connector
            .expect_connect()
            .once()
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Builder::new().write(&a).write(&b).build()));

        let service = service(connector, 3);
        service.start_persistence().await;

        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), service.send_notifications(&batch)).await;
        assert!(cancelled.is_err());

        service.send_notifications(&batch).await.unwrap();
    }

    mod concurrency {
        use super::*;
        use crate::connection::{ConnectionManager, Connector, Endpoint};
        use async_trait::async_trait;
        use bytes::BytesMut;
        use parking_lot::Mutex as SyncMutex;
        use std::{
            pin::Pin,
            sync::atomic::{AtomicUsize, Ordering},
            task::{Context, Poll},
        };
        use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

        /// Accepts a few bytes per write and yields between writes, giving
        /// other tasks every chance to interleave.
        struct RecordingStream {
            wire: Arc<SyncMutex<BytesMut>>,
            yield_next: bool,
        }

        impl AsyncWrite for RecordingStream {
            fn poll_write(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &[u8],
            ) -> Poll<io::Result<usize>> {
                if self.yield_next {
                    self.yield_next = false;
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                self.yield_next = true;
                let n = buf.len().min(7);
                self.wire.lock().extend_from_slice(&buf[..n]);
                Poll::Ready(Ok(n))
            }

            fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
                Poll::Ready(Ok(()))
            }

            fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
                Poll::Ready(Ok(()))
            }
        }

        impl AsyncRead for RecordingStream {
            fn poll_read(
                self: Pin<&mut Self>,
                _: &mut Context<'_>,
                _: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Poll::Ready(Ok(()))
            }
        }

        #[derive(Default)]
        struct RecordingConnector {
            wire: Arc<SyncMutex<BytesMut>>,
            connects: AtomicUsize,
        }

        #[async_trait]
        impl Connector for RecordingConnector {
            type Stream = RecordingStream;

            async fn connect(&self, _: &Endpoint) -> Result<Self::Stream, GatewayError> {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(RecordingStream {
                    wire: self.wire.clone(),
                    yield_next: false,
                })
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_batches_never_interleave() {
            const CALLERS: u8 = 8;
            const BATCH: usize = 5;

            let connector = Arc::new(RecordingConnector::default());
            let connection =
                ConnectionManager::new(connector.clone(), Endpoint::new("localhost", 2195))
                    .with_persistence(true);
            let service = Arc::new(NotificationService::new(connection, RetryPolicy::default()));

            let mut handles = Vec::new();
            for caller in 1..=CALLERS {
                let service = service.clone();
                handles.push(tokio::spawn(async move {
                    let batch: Vec<_> = (0..BATCH).map(|_| notification(caller)).collect();
                    service.send_notifications(&batch).await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let mut wire = connector.wire.lock().clone().freeze();
            let mut callers = Vec::new();
            while let Some(frame) = decode_frame(&mut wire).unwrap() {
                callers.push(frame.device_token.as_bytes()[0]);
            }

            assert!(wire.is_empty());
            assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
            assert_eq!(callers.len(), CALLERS as usize * BATCH);

            let mut seen = Vec::new();
            for run in callers.chunks(BATCH) {
                assert!(run.iter().all(|caller| *caller == run[0]));
                assert!(!seen.contains(&run[0]));
                seen.push(run[0]);
            }
        }
    }
}

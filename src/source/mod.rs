//! Event sources feeding the ingestion channel
//!
//! A source yields raw `BrokerMessage`s. It knows nothing about categories
//! or validation; that all happens downstream in the ingestion pipeline.

pub mod backoff;
pub mod jsonl;

use crate::pipeline::types::BrokerMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use backoff::{ExponentialBackoff, MaxRetriesExceeded};
pub use jsonl::JsonlSource;

#[async_trait]
pub trait EventSource: Send {
    /// Next message, or `None` once the source is exhausted
    async fn next_message(&mut self) -> std::io::Result<Option<BrokerMessage>>;

    /// (Re)establish the underlying connection
    ///
    /// Called before the first read and after every I/O error. A source
    /// that tracks its position resumes after the last message it yielded.
    async fn connect(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Pump messages from `source` into the ingestion channel
///
/// Returns the number of messages forwarded when the source is exhausted or
/// the receiving side has gone away. I/O errors are returned to the caller,
/// which decides whether to reconnect.
pub async fn forward_source<S>(
    source: &mut S,
    tx: &mpsc::Sender<BrokerMessage>,
) -> std::io::Result<u64>
where
    S: EventSource + ?Sized,
{
    let mut forwarded = 0u64;
    while let Some(message) = source.next_message().await? {
        if tx.send(message).await.is_err() {
            log::warn!("⚠️  Ingestion channel closed, stopping source {}", source.name());
            break;
        }
        forwarded += 1;
    }
    log::debug!("Source {} forwarded {} messages", source.name(), forwarded);
    Ok(forwarded)
}

/// Keep `source` flowing into the channel, reconnecting on I/O errors
///
/// The same source is reconnected each time, so messages are neither
/// replayed nor skipped across failures. The backoff resets after every
/// successful connect. Returns once the source is exhausted or the
/// channel closes, or with the backoff error when retries run out.
pub async fn supervise_source<S>(
    source: &mut S,
    tx: &mpsc::Sender<BrokerMessage>,
    backoff: &mut ExponentialBackoff,
) -> Result<(), MaxRetriesExceeded>
where
    S: EventSource + ?Sized,
{
    loop {
        match source.connect().await {
            Ok(()) => {
                backoff.reset();
                match forward_source(source, tx).await {
                    Ok(forwarded) => {
                        log::info!("✅ Source {} finished ({} messages since last connect)", source.name(), forwarded);
                        return Ok(());
                    }
                    Err(err) => log::error!("❌ Source {} failed: {}", source.name(), err),
                }
            }
            Err(err) => log::error!("❌ Cannot connect {}: {}", source.name(), err),
        }
        backoff.sleep().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct VecSource {
        messages: VecDeque<BrokerMessage>,
        fail_at_end: bool,
    }

    #[async_trait]
    impl EventSource for VecSource {
        async fn next_message(&mut self) -> std::io::Result<Option<BrokerMessage>> {
            match self.messages.pop_front() {
                Some(message) => Ok(Some(message)),
                None if self.fail_at_end => Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "broker went away",
                )),
                None => Ok(None),
            }
        }

        fn name(&self) -> &str {
            "vec"
        }
    }

    fn source(n: usize, fail_at_end: bool) -> VecSource {
        VecSource {
            messages: (0..n)
                .map(|i| BrokerMessage::new(Some("order.placed".into()), format!("{{\"n\":{}}}", i)))
                .collect(),
            fail_at_end,
        }
    }

    #[tokio::test]
    async fn test_forwards_in_order() {
        let (tx, mut rx) = mpsc::channel(10);
        let forwarded = forward_source(&mut source(3, false), &tx).await.unwrap();
        assert_eq!(forwarded, 3);

        for i in 0..3 {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.payload, format!("{{\"n\":{}}}", i).into_bytes());
        }
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(10);
        drop(rx);
        assert_eq!(forward_source(&mut source(3, false), &tx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_io_error_is_returned() {
        let (tx, _rx) = mpsc::channel(10);
        let err = forward_source(&mut source(1, true), &tx).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }

    /// Fails once after `fail_after` messages, then carries on from where it was
    struct FlakySource {
        messages: VecDeque<BrokerMessage>,
        yielded: usize,
        fail_after: Option<usize>,
        connects: usize,
        refuse_connect: bool,
    }

    #[async_trait]
    impl EventSource for FlakySource {
        async fn next_message(&mut self) -> std::io::Result<Option<BrokerMessage>> {
            if self.fail_after == Some(self.yielded) {
                self.fail_after = None;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "broker went away",
                ));
            }
            self.yielded += 1;
            Ok(self.messages.pop_front())
        }

        async fn connect(&mut self) -> std::io::Result<()> {
            self.connects += 1;
            if self.refuse_connect {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "broker down",
                ));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn quick_backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(1), 2)
    }

    #[tokio::test]
    async fn test_supervisor_reconnects_without_losing_messages() {
        let mut flaky = FlakySource {
            messages: source(5, false).messages,
            yielded: 0,
            fail_after: Some(2),
            connects: 0,
            refuse_connect: false,
        };
        let (tx, mut rx) = mpsc::channel(10);

        supervise_source(&mut flaky, &tx, &mut quick_backoff())
            .await
            .unwrap();
        drop(tx);

        assert_eq!(flaky.connects, 2);
        let mut received = Vec::new();
        while let Some(message) = rx.recv().await {
            received.push(String::from_utf8(message.payload).unwrap());
        }
        let expected: Vec<String> = (0..5).map(|i| format!("{{\"n\":{}}}", i)).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_supervisor_gives_up_after_retry_limit() {
        let mut flaky = FlakySource {
            messages: VecDeque::new(),
            yielded: 0,
            fail_after: None,
            connects: 0,
            refuse_connect: true,
        };
        let (tx, _rx) = mpsc::channel(10);

        assert!(supervise_source(&mut flaky, &tx, &mut quick_backoff())
            .await
            .is_err());
        assert_eq!(flaky.connects, 3);
    }
}

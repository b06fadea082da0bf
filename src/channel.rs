//! Serialized command/response exchange with the adapter.
//!
//! The ELM327 processes one command at a time and its replies carry no
//! request identifier, so at most one command may be outstanding. A second
//! caller is rejected with [`Error::ChannelBusy`] instead of being queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{Command, RawResponse, ResponseAssembler};
use crate::transport::{BleBackend, Transport};

/// Sends one command at a time and assembles the reply.
pub struct CommandChannel<B: BleBackend> {
    transport: Arc<Transport<B>>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the exchange ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<B: BleBackend> CommandChannel<B> {
    /// Creates a channel over `transport`.
    #[must_use]
    pub const fn new(transport: Arc<Transport<B>>) -> Self {
        Self {
            transport,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Returns true while a command is awaiting its reply.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Sends `command` and waits up to `timeout` for the prompt.
    ///
    /// Stale bytes left over from an earlier exchange are discarded before
    /// writing. Fails with `ChannelBusy` if another command is in flight,
    /// `LinkLost` if the link is down or drops mid-exchange, and
    /// `ResponseTimeout` if the prompt does not arrive in time.
    pub async fn send(&self, command: &Command, timeout: Duration) -> Result<RawResponse> {
        let _guard = self.acquire()?;
        if !self.transport.state().has_link() {
            return Err(Error::LinkLost);
        }

        self.transport.discard_pending().await;
        tracing::debug!("> {}", command);
        self.transport.write(command.to_wire()).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut assembler = ResponseAssembler::new();
        let text = loop {
            let chunk = tokio::time::timeout_at(deadline, self.transport.read())
                .await
                .map_err(|_| {
                    tracing::warn!(
                        "no reply to {} within {:?} ({} bytes buffered)",
                        command,
                        timeout,
                        assembler.buffered()
                    );
                    Error::response_timeout(timeout)
                })??;
            assembler.feed(&chunk);
            if let Some(text) = assembler.take() {
                break text;
            }
        };

        let response = RawResponse::from_text(&text, command);
        tracing::debug!("< {}", response.text().replace('\n', " | "));
        Ok(response)
    }

    fn acquire(&self) -> Result<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.in_flight))
            .map_err(|_| Error::ChannelBusy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventDispatcher;
    use crate::transport::MockBackend;
    use crate::transport::mock::MOCK_DEVICE_ID;
    use crate::types::AdapterDevice;

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn ready(backend: &MockBackend) -> (Arc<Transport<MockBackend>>, CommandChannel<MockBackend>) {
        let transport = Arc::new(Transport::new(
            backend.clone(),
            vec!["OBD".into()],
            EventDispatcher::new(16),
        ));
        transport
            .connect(&AdapterDevice::new(MOCK_DEVICE_ID), TIMEOUT)
            .await
            .unwrap();
        transport.finish_initialization(Ok(())).await.unwrap();
        let channel = CommandChannel::new(Arc::clone(&transport));
        (transport, channel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_strips_echo() {
        let backend = MockBackend::new();
        let (_transport, channel) = ready(&backend).await;

        let response = channel.send(&Command::new("atz"), TIMEOUT).await.unwrap();
        assert_eq!(response.lines(), ["ELM327 v1.5"]);
        assert_eq!(backend.writes(), ["ATZ"]);
        assert!(!channel.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_assembles_chunks() {
        let backend = MockBackend::new();
        backend.set_chunk_size(Some(3));
        let (_transport, channel) = ready(&backend).await;

        channel.send(&Command::new("ATE0"), TIMEOUT).await.unwrap();
        let response = channel.send(&Command::new("010C"), TIMEOUT).await.unwrap();
        assert_eq!(response.lines(), ["41 0C 1A F8"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout() {
        let backend = MockBackend::new();
        backend.set_silent("0100");
        let (_transport, channel) = ready(&backend).await;

        let result = channel.send(&Command::new("0100"), TIMEOUT).await;
        assert!(matches!(
            result,
            Err(Error::ResponseTimeout { timeout_ms: 2000 })
        ));
        assert!(!channel.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_send_is_rejected() {
        let backend = MockBackend::new();
        backend.set_response_delay(Duration::from_millis(200));
        let (_transport, channel) = ready(&backend).await;
        channel.send(&Command::new("ATE0"), TIMEOUT).await.unwrap();

        let rpm = Command::new("010C");
        let speed = Command::new("010D");
        let (first, second) = tokio::join!(channel.send(&rpm, TIMEOUT), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            channel.send(&speed, TIMEOUT).await
        });

        assert_eq!(first.unwrap().lines(), ["41 0C 1A F8"]);
        assert!(matches!(second, Err(Error::ChannelBusy)));
        assert_eq!(backend.writes(), ["ATE0", "010C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_send() {
        let backend = MockBackend::new();
        backend.set_silent("03");
        let (transport, channel) = ready(&backend).await;
        let command = Command::read_codes();

        let (result, ()) = tokio::join!(channel.send(&command, TIMEOUT), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            transport.disconnect().await;
        });

        assert!(matches!(result, Err(Error::LinkLost)));
        assert!(!channel.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_link() {
        let backend = MockBackend::new();
        let (transport, channel) = ready(&backend).await;
        transport.disconnect().await;

        let result = channel.send(&Command::new("010C"), TIMEOUT).await;
        assert!(matches!(result, Err(Error::LinkLost)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_bytes_are_discarded() {
        let backend = MockBackend::new();
        let (_transport, channel) = ready(&backend).await;
        channel.send(&Command::new("ATE0"), TIMEOUT).await.unwrap();

        backend.push_unsolicited(b"41 0D 50\r\r>");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let response = channel.send(&Command::new("010C"), TIMEOUT).await.unwrap();
        assert_eq!(response.lines(), ["41 0C 1A F8"]);
    }
}

//! ELM327 setup handshake.
//!
//! Runs once per connection, right after the link comes up. Replies vary by
//! firmware, so a step succeeds as long as the adapter answered at all.

use std::fmt;
use std::time::Duration;

use crate::channel::CommandChannel;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{Command, ObdProtocol, at};
use crate::transport::BleBackend;

/// One step of the setup handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Reset,
    EchoOff,
    LinefeedsOff,
    SpacesOff,
    SelectProtocol(ObdProtocol),
}

impl InitStep {
    /// The AT command sent for this step.
    #[must_use]
    pub const fn command_text(self) -> &'static str {
        match self {
            Self::Reset => at::RESET,
            Self::EchoOff => at::ECHO_OFF,
            Self::LinefeedsOff => at::LINEFEEDS_OFF,
            Self::SpacesOff => at::SPACES_OFF,
            Self::SelectProtocol(protocol) => protocol.to_elm_command(),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::EchoOff => "echo off",
            Self::LinefeedsOff => "linefeeds off",
            Self::SpacesOff => "spaces off",
            Self::SelectProtocol(_) => "protocol select",
        }
    }
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.command_text())
    }
}

/// The handshake in execution order.
#[must_use]
pub fn sequence(protocol: ObdProtocol) -> [InitStep; 5] {
    [
        InitStep::Reset,
        InitStep::EchoOff,
        InitStep::LinefeedsOff,
        InitStep::SpacesOff,
        InitStep::SelectProtocol(protocol),
    ]
}

/// Runs the handshake, pausing `settle_delay` after every step.
///
/// The reset waits up to `reset_timeout` for the banner; every other step
/// uses `response_timeout`.
pub async fn run<B: BleBackend>(channel: &CommandChannel<B>, config: &ClientConfig) -> Result<()> {
    for step in sequence(config.protocol) {
        let timeout = step_timeout(step, config);
        tracing::debug!("init step {}", step);

        match channel.send(&Command::new(step.command_text()), timeout).await {
            Ok(response) => {
                tracing::trace!("{} answered {:?}", step, response.text());
            }
            Err(e) => {
                tracing::warn!("initialization failed at {}: {}", step, e);
                return Err(Error::InitializationFailed {
                    step,
                    source: Box::new(e),
                });
            }
        }
        tokio::time::sleep(config.settle_delay).await;
    }
    tracing::info!("adapter initialized");
    Ok(())
}

const fn step_timeout(step: InitStep, config: &ClientConfig) -> Duration {
    match step {
        InitStep::Reset => config.reset_timeout,
        _ => config.response_timeout,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::EventDispatcher;
    use crate::transport::mock::MOCK_DEVICE_ID;
    use crate::transport::{MockBackend, Transport};
    use crate::types::AdapterDevice;

    async fn channel(backend: &MockBackend) -> CommandChannel<MockBackend> {
        let transport = Arc::new(Transport::new(
            backend.clone(),
            vec!["OBD".into()],
            EventDispatcher::new(16),
        ));
        transport
            .connect(&AdapterDevice::new(MOCK_DEVICE_ID), Duration::from_secs(1))
            .await
            .unwrap();
        CommandChannel::new(transport)
    }

    #[test]
    fn test_step_display() {
        assert_eq!(InitStep::Reset.to_string(), "reset (ATZ)");
        assert_eq!(
            InitStep::SelectProtocol(ObdProtocol::Auto).to_string(),
            "protocol select (ATSP0)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sends_fixed_sequence() {
        let backend = MockBackend::new();
        let channel = channel(&backend).await;

        run(&channel, &ClientConfig::new()).await.unwrap();
        assert_eq!(backend.writes(), ["ATZ", "ATE0", "ATL0", "ATS0", "ATSP0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_honours_settle_delay() {
        let backend = MockBackend::new();
        backend.set_response_delay(Duration::ZERO);
        let channel = channel(&backend).await;
        let config = ClientConfig::new().settle_delay(Duration::from_millis(300));

        let started = tokio::time::Instant::now();
        run(&channel, &config).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_failing_step() {
        let backend = MockBackend::new();
        backend.set_silent("ATL0");
        let channel = channel(&backend).await;

        let err = run(&channel, &ClientConfig::new()).await.unwrap_err();
        match err {
            Error::InitializationFailed { step, source } => {
                assert_eq!(step, InitStep::LinefeedsOff);
                assert!(matches!(*source, Error::ResponseTimeout { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.writes(), ["ATZ", "ATE0", "ATL0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_selects_configured_protocol() {
        let backend = MockBackend::new();
        let channel = channel(&backend).await;
        let config = ClientConfig::new().protocol(ObdProtocol::Iso15765_4Can11bit500);

        run(&channel, &config).await.unwrap();
        assert_eq!(backend.writes().last().map(String::as_str), Some("ATSP6"));
    }
}

//! Transport seam to the isolated execution host.
//!
//! The [`Transport`] trait decouples the session from how messages
//! actually reach the host (an iframe bridge, a test harness, a recording
//! channel). Tests use channel transports and assert on the receiver end.

use std::sync::mpsc::{Receiver, Sender, channel};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::io::protocol::OutboundMessage;

/// Abstraction over the outbound half of the message channel.
pub trait Transport {
    /// Deliver one message to the host. Failures are transport-level
    /// (peer gone), not protocol-level.
    fn send(&mut self, message: &OutboundMessage) -> Result<()>;
}

/// Transport over an in-process channel carrying encoded wire payloads.
pub struct ChannelTransport {
    tx: Sender<Value>,
}

impl ChannelTransport {
    pub fn new(tx: Sender<Value>) -> Self {
        Self { tx }
    }

    /// A connected transport plus the receiving end, for embedders that
    /// pump the channel themselves (and for tests).
    pub fn pair() -> (Self, Receiver<Value>) {
        let (tx, rx) = channel();
        (Self::new(tx), rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        self.tx
            .send(message.encode())
            .context("sandbox channel closed")
    }
}

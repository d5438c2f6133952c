use std::sync::mpsc::{self, Receiver, SyncSender};

use crate::error::BridgeError;

/// Hands encoded call strings to native code.
pub trait NativeTransport: Send + Sync {
    fn send(&self, call: String) -> Result<(), BridgeError>;
}

/// In-process transport: a bounded channel drained by a native-side consumer.
pub struct ChannelTransport {
    tx: SyncSender<String>,
}

impl ChannelTransport {
    pub fn bounded(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NativeTransport for ChannelTransport {
    fn send(&self, call: String) -> Result<(), BridgeError> {
        self.tx
            .send(call)
            .map_err(|_| BridgeError::Transport("native side disconnected".to_string()))
    }
}

//! Handles to running listeners.

use std::net::SocketAddr;

use tokio::sync::oneshot;

/// Handle to a running listener.
///
/// The listener stops when the handle is stopped or dropped.
#[derive(Debug)]
pub struct ListenerHandle {
    /// Unique identifier for this listener.
    pub id: String,
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ListenerHandle {
    /// Creates a new listener handle.
    pub fn new(
        id: impl Into<String>,
        local_addr: SocketAddr,
        shutdown_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id: id.into(),
            local_addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the listener.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_and_drop_signal_shutdown() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let (tx, mut rx) = oneshot::channel();
        ListenerHandle::new("a", addr, tx).stop();
        assert!(rx.try_recv().is_ok());

        let (tx, mut rx) = oneshot::channel();
        drop(ListenerHandle::new("b", addr, tx));
        assert!(rx.try_recv().is_ok());
    }
}

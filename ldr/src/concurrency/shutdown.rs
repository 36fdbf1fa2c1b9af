use tokio::sync::watch;

/// Type alias to abstract a watch channel of `()`.
pub type SignalTx = watch::Sender<()>;

/// Type alias to abstract a watch channel of `()`.
pub type SignalRx = watch::Receiver<()>;

/// Sending side of a shutdown signal, shared by everything that may stop a job or a flow.
#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub type ShutdownRx = SignalRx;

/// Result of an operation interrupted by a shutdown signal.
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx::wrap(tx), rx)
}

/// Resolves once `rx` observes a shutdown or its sender is gone.
pub async fn wait_for_shutdown(rx: &mut ShutdownRx) {
    // An error means that every sender was dropped, which also stops the receiver's owner.
    let _ = rx.changed().await;
}

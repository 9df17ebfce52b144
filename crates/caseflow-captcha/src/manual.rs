//! Manual code entry port.
//!
//! When every recognition strategy fails, the code must still be obtainable
//! from the operator. Instead of blocking on terminal input, the resolver
//! awaits a pending-input slot that the control surface fills
//! asynchronously.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Source of operator-supplied codes.
#[async_trait::async_trait]
pub trait ManualCodeProvider: Send + Sync {
    /// Wait up to `timeout` for a code. `None` means nothing arrived.
    async fn provide(&self, timeout: Duration) -> Option<String>;
}

/// One-value pending-input slot.
///
/// The control surface calls [`CodeSlot::offer`] when the operator submits
/// a code; the resolver consumes it through [`ManualCodeProvider::provide`].
/// Offering replaces any unconsumed previous code.
#[derive(Default)]
pub struct CodeSlot {
    pending: Mutex<Option<String>>,
    arrived: Notify,
}

impl CodeSlot {
    /// Empty shared slot.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deposit an operator-supplied code.
    pub async fn offer(&self, code: impl Into<String>) {
        *self.pending.lock().await = Some(code.into());
        self.arrived.notify_one();
    }

    /// Drop any unconsumed code.
    pub async fn clear(&self) {
        *self.pending.lock().await = None;
    }
}

#[async_trait::async_trait]
impl ManualCodeProvider for CodeSlot {
    async fn provide(&self, timeout: Duration) -> Option<String> {
        let wait = async {
            loop {
                let notified = self.arrived.notified();
                if let Some(code) = self.pending.lock().await.take() {
                    return code;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }
}

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Interrupts a cycle that is waiting on its calc-config futures.
///
/// Only the outer polling loop observes this; jobs already running are
/// stopped through their own cancel flags.
#[derive(Clone, Debug, Default)]
pub struct CycleInterrupt {
    token: CancellationToken,
}

impl CycleInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn triggered(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A child token cancelled together with this interrupt.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

use crate::backoff::ErrorBackoff;
use crate::cancel::CancellationSignal;
use crate::model::Message;
use crate::subscription::{ReceiveOutcome, Subscription};
use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Serial receive-then-process loop over a single subscription.
#[derive(Debug, Clone, Default)]
pub struct ConsumptionLoop {
    backoff: ErrorBackoff,
}

impl ConsumptionLoop {
    pub fn new(backoff: ErrorBackoff) -> Self {
        Self { backoff }
    }

    /// Consumes until `cancel` fires or the client reports a fatal error.
    ///
    /// `on_message` runs for every received record and `on_error` for every
    /// recoverable receive error, both in arrival order. The subscription is
    /// closed exactly once before this returns, and also if the returned
    /// future is dropped early. A fatal error is returned after the close.
    pub async fn run<S, M, E>(
        &self,
        subscription: S,
        cancel: &CancellationSignal,
        mut on_message: M,
        mut on_error: E,
    ) -> Result<()>
    where
        S: Subscription,
        M: FnMut(&Message),
        E: FnMut(&str),
    {
        let mut guard = SubscriptionGuard::new(subscription);
        let mut consecutive_failures = 0u32;

        let outcome = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            match guard.subscription.receive(cancel).await {
                ReceiveOutcome::Message(message) => {
                    consecutive_failures = 0;
                    on_message(&message);
                }
                ReceiveOutcome::Recoverable(reason) => {
                    on_error(&reason);
                    consecutive_failures = consecutive_failures.saturating_add(1);

                    let delay = self.backoff.delay(consecutive_failures);
                    if !delay.is_zero() {
                        debug!(
                            consecutive_failures,
                            ?delay,
                            "backing off after receive error"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {}
                            _ = sleep(delay) => {}
                        }
                    }
                }
                ReceiveOutcome::Cancelled => break Ok(()),
                ReceiveOutcome::Fatal(error) => break Err(error),
            }
        };

        let closed = guard.close();
        match (outcome, closed) {
            (Ok(()), closed) => closed,
            (Err(fatal), Ok(())) => Err(fatal),
            (Err(fatal), Err(close_error)) => {
                warn!(error = %close_error, "failed to close subscription after fatal error");
                Err(fatal)
            }
        }
    }
}

/// Owns the subscription for the loop's lifetime and guarantees a single
/// close, falling back to `Drop` when the loop never reaches its own close.
struct SubscriptionGuard<S: Subscription> {
    subscription: S,
    closed: bool,
}

impl<S: Subscription> SubscriptionGuard<S> {
    fn new(subscription: S) -> Self {
        Self {
            subscription,
            closed: false,
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.subscription.close()
    }
}

impl<S: Subscription> Drop for SubscriptionGuard<S> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(error = %error, "failed to close subscription on drop");
        }
    }
}

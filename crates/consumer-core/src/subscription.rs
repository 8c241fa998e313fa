use crate::cancel::CancellationSignal;
use crate::model::Message;
use anyhow::Result;
use std::future::Future;

/// Result of a single receive attempt.
#[derive(Debug)]
pub enum ReceiveOutcome {
    Message(Message),
    /// Transient broker fault; the loop reports it and keeps going.
    Recoverable(String),
    Cancelled,
    /// Anything the client cannot recover from. Ends the loop after close.
    Fatal(anyhow::Error),
}

/// The narrow surface the consumption loop needs from a broker client: an
/// already-open subscription to one topic under one group identity.
pub trait Subscription {
    /// Waits for the next record, a receive error, or `cancel` firing.
    fn receive(
        &mut self,
        cancel: &CancellationSignal,
    ) -> impl Future<Output = ReceiveOutcome> + Send;

    /// Flushes pending commit state and releases the subscription.
    fn close(&mut self) -> Result<()>;
}

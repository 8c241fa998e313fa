//! Shutdown token shared between the consumption loop and whatever requests
//! shutdown. Clones observe the same state and once cancelled it stays
//! cancelled, so a cancel that lands mid-receive is seen on the next check.

pub use tokio_util::sync::CancellationToken as CancellationSignal;

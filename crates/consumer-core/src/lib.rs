pub mod backoff;
pub mod cancel;
pub mod consumption;
pub mod model;
pub mod subscription;

pub use backoff::ErrorBackoff;
pub use cancel::CancellationSignal;
pub use consumption::ConsumptionLoop;
pub use model::{Message, OffsetReset, PartitionOffset};
pub use subscription::{ReceiveOutcome, Subscription};

//! Ports - trait definitions for the collaborators of the limiter.
//! Infrastructure implements these; tests fake them.

mod clock;
mod counter_store;
mod credit_lookup;
mod denial_sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter_store::{CounterStore, WindowCount};
pub use credit_lookup::CreditLookup;
pub use denial_sink::{DenialSink, NoopSink};

//! Signal versioning core.
//!
//! Model-derived observations about a user are stored as immutable,
//! confidence-scored signals. Each (user, entry, key) partition carries a
//! gapless version history starting at 1; a newer observation supersedes an
//! older one by becoming the next version, never by overwriting it.

pub mod batch;
pub mod clock;
pub mod query;
pub mod record;
pub mod store;
pub mod versioning;

pub use clock::{Clock, FixedClock, IdGenerator, SequentialIds, SystemClock, UuidIds};
pub use record::{Observation, Partition, Provenance, Signal, ValidationPolicy};
pub use store::{MemoryStore, QueryOrder, SignalQuery, SignalStore};
pub use versioning::{BatchMode, SignalEngine};

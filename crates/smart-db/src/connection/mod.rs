//! Connection Management
//!
//! Lazily created, slot-keyed connections and the master/replica router
//! that picks slots for the drivers.

pub mod pool;
pub mod router;
pub mod statistics;

pub use pool::*;
pub use router::*;
pub use statistics::*;

//! Domain control modules.
//!
//! Each module owns its state behind a mutex and publishes it on its own
//! endpoint through [`StoreBuilder`](crate::com::store::StoreBuilder)
//! getters and setters. The control thread calls `run()` periodically and
//! raises update flags for whatever changed.

pub mod flyback;
pub mod vacuum;

use crate::com::compound::CompoundKind;

/// Parameters touched by one control cycle, as (kind, index) keys.
pub type Changes = heapless::Vec<(CompoundKind, u8), 8>;

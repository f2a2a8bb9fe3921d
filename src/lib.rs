//! # DDAS Hit Sorter
//!
//! Merges the hit streams of independent digitizer modules into one
//! time-ordered stream. Each module's hits arrive in time order, but modules
//! are not ordered relative to each other; the sorter holds hits back until
//! one newer by more than a configurable window has been seen.
//!
//! ## Crate Structure
//!
//! - **`layout`**: bit layout of hit words and module-type words, decode and
//!   encode in one place.
//! - **`hit`**: `RawChannel`, the parsed view over one hit.
//! - **`zero_copy`**: `ZeroCopyHit`, a hit viewing a shared arena buffer.
//! - **`merge`**: `HitManager`, the windowed merge queue.
//! - **`record`**: framing of protocol records and single-hit output.
//! - **`orchestrator`**: `Orchestrator`, which threads chunks through parse,
//!   merge and output.
//! - **`reader`**: `ModuleReader`, the direct-hardware FIFO readout path.
//! - **`io`**: chunk sources and record sinks.
//! - **`config`**: Figment-based configuration.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: `SortError` and `HitError`.
//!
//! The buffer arena lives in the `daq-arena` crate.

pub mod config;
pub mod error;
pub mod hit;
pub mod io;
pub mod layout;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod reader;
pub mod record;
pub mod zero_copy;

pub use daq_arena::{Arena, SharedBuffer};
pub use error::{HitError, SortError, SortResult};
pub use hit::RawChannel;
pub use merge::{HitManager, Timed};
pub use orchestrator::{Orchestrator, SortStats};
pub use zero_copy::ZeroCopyHit;

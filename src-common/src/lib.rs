//! Blackbox Common Library
//!
//! Chunk naming and the shared evidence data model used by the recording
//! service and the command-line tools.

pub mod logging;
pub mod naming;
pub mod types;

pub use naming::{Clock, SystemClock};
pub use types::*;

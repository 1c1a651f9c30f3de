//! hostshim shared code
//!
//! Types and constants used on both sides of the exec boundary: by the
//! parent-side library (`hostshim`) and by the helper that runs inside the
//! child container (`hostshim-helper`).

pub mod constants;
pub mod errors;
pub mod protocol;

pub use errors::{ShimError, ShimResult};
pub use protocol::{FileEvent, FileEventKind};

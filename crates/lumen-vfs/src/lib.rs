//! Content access for Lumen.
//!
//! The indexer never reads the file system directly; everything goes through
//! [`ContentProvider`] so in-memory edited snapshots win over what is on
//! disk.

mod change;
mod content;

pub use change::*;
pub use content::*;

//! The Lumen source indexer: incremental two-pass extraction of declarative
//! constructs, dependency tracking across files, and the debounced
//! per-project reconcile scheduler.

mod deps;
mod extract;
mod indexer;
mod publish;
mod reconcile;

pub use deps::*;
pub use extract::*;
pub use indexer::*;
pub use publish::*;
pub use reconcile::*;

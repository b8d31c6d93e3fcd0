//! Database module for uptrail.
//!
//! Append-only storage of check results and the bucketed health read path.

mod buckets;
mod models;
mod store;

pub use buckets::*;
pub use models::*;
pub use store::*;

//! Declarative monitor model.
//!
//! Monitor → Service → Check → Expectation, loaded from a TOML document and
//! validated atomically.

mod loader;
mod model;

pub use loader::*;
pub use model::*;

//! Append-log orchestration core: records, capability rules, the lease state
//! machine and the board projector. Everything here is pure; storage and
//! request handling live in the sibling crates.

pub mod board;
pub mod capability;
pub mod clock;
pub mod commands;
pub mod error;
pub mod idempotency;
pub mod ids;
pub mod lease;
pub mod model;
pub mod outcomes;
pub mod path;
pub mod snapshot;
pub mod types;

pub use board::*;
pub use capability::*;
pub use clock::*;
pub use commands::*;
pub use error::*;
pub use idempotency::*;
pub use ids::*;
pub use lease::*;
pub use model::*;
pub use outcomes::*;
pub use path::*;
pub use snapshot::*;
pub use types::*;

pub mod config;
pub mod engine;
pub mod receipts;
pub mod sinks;

pub use config::*;
pub use engine::*;
pub use receipts::*;
pub use sinks::*;

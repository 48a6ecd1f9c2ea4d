pub mod decide;
pub mod error;
pub mod memory;
pub mod traits;

pub use decide::*;
pub use error::StorageError;
pub use memory::InMemoryStorage;
pub use traits::Storage;

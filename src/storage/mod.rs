//! Storage layer: persistence for the credit manager's owned state.
//!
//! - `traits` — the `CreditStore` abstraction.
//! - `memory` — in-memory implementation, for tests and ephemeral runs.
//! - `sqlite` — durable implementation, connection-pooled via `r2d2`.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryCreditStore;
pub use sqlite::SqliteCreditStore;
pub use traits::{CreditStore, StorageError, StorageResult};

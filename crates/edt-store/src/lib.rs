//! Relational persistence for the timetable sync: the transactional store
//! contract, its PostgreSQL implementation and an in-memory twin.

mod error;
mod memory;
mod postgres;
mod store;

pub use error::StoreError;
pub use memory::{MemoryState, MemoryStore, MemoryTx, StoredCourse, StoredGroup, StoredModule};
pub use postgres::{PgStore, PgTx, MIGRATOR};
pub use store::{ScheduleStore, StoreTx};

pub const CRATE_NAME: &str = "edt-store";

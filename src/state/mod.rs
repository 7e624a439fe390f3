//! StateStore: the backing store for rooms, users, online registry, and
//! socket registry (spec §4.2). Two reference implementations are provided:
//! [`memory::MemoryStateStore`] for single-instance deployments and
//! [`sqlite::SqliteStateStore`] for shared, multi-instance deployments. Both
//! implement [`StateStore`] and must present identical semantics.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{
    DirectList, RoomList, RoomRecord, StateStore, StoreError, StoreResult, UserRecord,
};
</content>

//! Shared services layered over the database.

mod locks;
mod store;

pub use locks::KeyedLocks;
pub use store::StoreService;

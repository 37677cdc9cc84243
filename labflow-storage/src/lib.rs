//! ABOUTME: Persistence gateways: Postgres record store, HTTP object store
//! ABOUTME: In-memory implementations back the integration suite and local dev

pub mod memory;
pub mod object_store;
pub mod postgres;

pub use memory::{MemoryObjectStore, MemoryRecordStore};
pub use object_store::{HttpObjectStore, ObjectStoreConfig};
pub use postgres::{PostgresConfig, PostgresRecordStore};

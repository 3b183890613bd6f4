//! # Sync Storage
//!
//! Durable state for the ERP synchronization engine: tenant records,
//! entity mappings and per-tenant sync status. Two backends share the
//! [`SyncStore`] trait, PostgreSQL for deployments and an in-memory map
//! for tests and embedded use.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::{StoreError, StoreResult, SyncStore};
pub use types::{EntityMapping, SyncState, SyncStatus, TenantRecord, TenantStatus};

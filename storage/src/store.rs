use crate::types::{EntityMapping, SyncStatus, TenantRecord};
use async_trait::async_trait;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error)
}

/// Durable sync state, scoped by tenant on every operation.
///
/// Mapping upserts are last-writer-wins on `(tenant, entity_id)`; the
/// uniqueness invariant is enforced by the backend, not by callers.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<TenantRecord>>;

    async fn upsert_tenant(&self, record: &TenantRecord) -> StoreResult<()>;

    /// Removes the record entirely. Decommissioned tenants do not leave a
    /// terminal "deleted" row behind.
    async fn delete_tenant(&self, tenant_id: &str) -> StoreResult<()>;

    async fn get_mapping(
        &self,
        tenant_id: &str,
        entity_id: &str
    ) -> StoreResult<Option<EntityMapping>>;

    async fn list_mappings(
        &self,
        tenant_id: &str,
        entity_type: Option<&str>
    ) -> StoreResult<Vec<EntityMapping>>;

    async fn upsert_mapping(&self, tenant_id: &str, mapping: &EntityMapping) -> StoreResult<()>;

    async fn get_sync_status(&self, tenant_id: &str) -> StoreResult<Option<SyncStatus>>;

    /// Overwrites the tenant's status wholesale; runs never accumulate.
    async fn put_sync_status(&self, tenant_id: &str, status: &SyncStatus) -> StoreResult<()>;
}

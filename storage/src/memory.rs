use crate::store::{StoreResult, SyncStore};
use crate::types::{EntityMapping, SyncStatus, TenantRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory backend. Used by tests and single-process deployments; the
/// `(tenant, entity_id)` map key carries the same uniqueness invariant the
/// Postgres backend enforces with its unique constraint.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>
}

#[derive(Default)]
struct Inner {
    tenants: HashMap<String, TenantRecord>,
    mappings: HashMap<(String, String), EntityMapping>,
    statuses: HashMap<String, SyncStatus>
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<TenantRecord>> {
        Ok(self.inner.read().tenants.get(tenant_id).cloned())
    }

    async fn upsert_tenant(&self, record: &TenantRecord) -> StoreResult<()> {
        self.inner
            .write()
            .tenants
            .insert(record.tenant_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> StoreResult<()> {
        self.inner.write().tenants.remove(tenant_id);
        Ok(())
    }

    async fn get_mapping(
        &self,
        tenant_id: &str,
        entity_id: &str
    ) -> StoreResult<Option<EntityMapping>> {
        let key = (tenant_id.to_string(), entity_id.to_string());
        Ok(self.inner.read().mappings.get(&key).cloned())
    }

    async fn list_mappings(
        &self,
        tenant_id: &str,
        entity_type: Option<&str>
    ) -> StoreResult<Vec<EntityMapping>> {
        let inner = self.inner.read();
        let mut mappings: Vec<EntityMapping> = inner
            .mappings
            .iter()
            .filter(|((tenant, _), mapping)| {
                tenant == tenant_id
                    && entity_type.is_none_or(|filter| mapping.entity_type == filter)
            })
            .map(|(_, mapping)| mapping.clone())
            .collect();
        mappings.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(mappings)
    }

    async fn upsert_mapping(&self, tenant_id: &str, mapping: &EntityMapping) -> StoreResult<()> {
        let key = (tenant_id.to_string(), mapping.entity_id.clone());
        self.inner.write().mappings.insert(key, mapping.clone());
        Ok(())
    }

    async fn get_sync_status(&self, tenant_id: &str) -> StoreResult<Option<SyncStatus>> {
        Ok(self.inner.read().statuses.get(tenant_id).cloned())
    }

    async fn put_sync_status(&self, tenant_id: &str, status: &SyncStatus) -> StoreResult<()> {
        self.inner
            .write()
            .statuses
            .insert(tenant_id.to_string(), status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SyncState, TenantStatus};
    use chrono::Utc;

    fn mapping(entity_id: &str, record_id: i64) -> EntityMapping {
        EntityMapping {
            entity_id: entity_id.to_string(),
            entity_type: "AgriParcel".to_string(),
            record_id,
            record_kind: "product".to_string(),
            record_name: entity_id.to_string(),
            last_sync: Utc::now()
        }
    }

    #[tokio::test]
    async fn test_mapping_upsert_is_last_writer_wins() {
        let store = MemoryStore::new();

        store
            .upsert_mapping("t1", &mapping("urn:x:1", 10))
            .await
            .unwrap();
        store
            .upsert_mapping("t1", &mapping("urn:x:1", 11))
            .await
            .unwrap();

        let found = store.get_mapping("t1", "urn:x:1").await.unwrap().unwrap();
        assert_eq!(found.record_id, 11);

        let all = store.list_mappings("t1", None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_mappings_are_tenant_isolated() {
        let store = MemoryStore::new();

        store
            .upsert_mapping("tenant-a", &mapping("urn:x:1", 1))
            .await
            .unwrap();
        store
            .upsert_mapping("tenant-b", &mapping("urn:x:1", 2))
            .await
            .unwrap();

        let a = store.list_mappings("tenant-a", None).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].record_id, 1);

        let b = store.list_mappings("tenant-b", None).await.unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].record_id, 2);
    }

    #[tokio::test]
    async fn test_list_mappings_type_filter() {
        let store = MemoryStore::new();

        store
            .upsert_mapping("t1", &mapping("urn:x:1", 1))
            .await
            .unwrap();
        let mut device = mapping("urn:x:2", 2);
        device.entity_type = "Device".to_string();
        device.record_kind = "equipment".to_string();
        store.upsert_mapping("t1", &device).await.unwrap();

        let parcels = store.list_mappings("t1", Some("AgriParcel")).await.unwrap();
        assert_eq!(parcels.len(), 1);
        assert_eq!(parcels[0].entity_id, "urn:x:1");
    }

    #[tokio::test]
    async fn test_sync_status_is_overwritten_wholesale() {
        let store = MemoryStore::new();

        let mut status = SyncStatus::never_synced();
        status.errors = vec!["stale".to_string()];
        store.put_sync_status("t1", &status).await.unwrap();

        let fresh = SyncStatus {
            state: SyncState::Synced,
            last_sync: Some(Utc::now()),
            entities_synced: 4,
            errors: Vec::new(),
            updated_at: Utc::now()
        };
        store.put_sync_status("t1", &fresh).await.unwrap();

        let found = store.get_sync_status("t1").await.unwrap().unwrap();
        assert_eq!(found.state, SyncState::Synced);
        assert!(found.errors.is_empty());
        assert_eq!(found.entities_synced, 4);
    }

    #[tokio::test]
    async fn test_tenant_delete_removes_record() {
        let store = MemoryStore::new();

        let mut record = TenantRecord::provisioning("t1", "erp_t1");
        record.status = TenantStatus::Active;
        store.upsert_tenant(&record).await.unwrap();
        assert!(store.get_tenant("t1").await.unwrap().is_some());

        store.delete_tenant("t1").await.unwrap();
        assert!(store.get_tenant("t1").await.unwrap().is_none());
    }
}

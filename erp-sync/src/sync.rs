use crate::broker::ContextBroker;
use crate::error::{SyncError, SyncResult};
use crate::odoo::ErpGateway;
use crate::transform::{self, EntitySnapshot, RecordKind, SYNCED_TYPES};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{EntityMapping, SyncState, SyncStatus, SyncStore, TenantStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Coordinates the transform registry, the mapping store and the ERP
/// gateway. All collaborators are injected; the engine holds no ambient
/// global state.
pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    broker: Arc<dyn ContextBroker>,
    gateway: Arc<dyn ErpGateway>,
    page_limit: usize,
    // Serializes concurrent upserts of the same (tenant, entity) so a
    // notification racing a full sweep cannot create two ERP records.
    entity_locks: DashMap<(String, String), Arc<Mutex<()>>>
}

/// Result of a single-entity upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub record_id: i64,
    pub record_kind: RecordKind,
    pub record_name: String
}

/// Result of a full sweep. The run returns normally even when individual
/// entities failed; per-entity failures live in `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub synced: u32,
    pub errors: Vec<String>
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn SyncStore>,
        broker: Arc<dyn ContextBroker>,
        gateway: Arc<dyn ErpGateway>,
        page_limit: usize
    ) -> Self {
        Self {
            store,
            broker,
            gateway,
            page_limit,
            entity_locks: DashMap::new()
        }
    }

    pub(crate) async fn resolve_database(&self, tenant_id: &str) -> SyncResult<String> {
        let record = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| SyncError::TenantNotProvisioned(tenant_id.to_string()))?;

        if record.status != TenantStatus::Active {
            return Err(SyncError::TenantNotProvisioned(tenant_id.to_string()));
        }

        Ok(record.database)
    }

    fn entity_lock(&self, tenant_id: &str, entity_id: &str) -> Arc<Mutex<()>> {
        self.entity_locks
            .entry((tenant_id.to_string(), entity_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Idempotent create-or-update of the ERP record for one entity.
    ///
    /// Replaying the same snapshot converges to exactly one ERP record per
    /// `(tenant, entity_id)` because the mapping lookup precedes every
    /// create/update decision, and same-key upserts are serialized.
    pub async fn upsert_entity(
        &self,
        tenant_id: &str,
        snapshot: &EntitySnapshot
    ) -> SyncResult<SyncedRecord> {
        let kind = transform::classify(&snapshot.entity_type)
            .ok_or_else(|| SyncError::UnsupportedType(snapshot.entity_type.clone()))?;

        let database = self.resolve_database(tenant_id).await?;

        let lock = self.entity_lock(tenant_id, &snapshot.id);
        let _guard = lock.lock().await;

        let existing = self.store.get_mapping(tenant_id, &snapshot.id).await?;
        let fields = transform::transform(snapshot, kind);
        let record_name = fields
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&snapshot.id)
            .to_string();

        let record_id = match &existing {
            Some(mapping) if mapping.record_kind == kind.as_str() => {
                self.gateway
                    .update_record(&database, kind.as_str(), mapping.record_id, &fields)
                    .await?;
                debug!(
                    tenant_id = %tenant_id,
                    entity_id = %snapshot.id,
                    record_id = mapping.record_id,
                    "Updated ERP record"
                );
                mapping.record_id
            }
            Some(mapping) => {
                // A kind change orphans the old record; the mapping moves to
                // the newly created one.
                warn!(
                    tenant_id = %tenant_id,
                    entity_id = %snapshot.id,
                    old_kind = %mapping.record_kind,
                    new_kind = %kind.as_str(),
                    "Record kind changed, creating replacement record"
                );
                self.gateway
                    .create_record(&database, kind.as_str(), &fields)
                    .await?
            }
            None => {
                let record_id = self
                    .gateway
                    .create_record(&database, kind.as_str(), &fields)
                    .await?;
                debug!(
                    tenant_id = %tenant_id,
                    entity_id = %snapshot.id,
                    record_id,
                    "Created ERP record"
                );
                record_id
            }
        };

        let mapping = EntityMapping {
            entity_id: snapshot.id.clone(),
            entity_type: snapshot.entity_type.clone(),
            record_id,
            record_kind: kind.as_str().to_string(),
            record_name: record_name.clone(),
            last_sync: Utc::now()
        };
        self.store.upsert_mapping(tenant_id, &mapping).await?;

        Ok(SyncedRecord {
            record_id,
            record_kind: kind,
            record_name
        })
    }

    /// Sweeps every routed entity type for one tenant. A failure on one
    /// entity or one type is recorded and does not stop the rest of the
    /// run; nothing is retried within a run.
    pub async fn full_sync(&self, tenant_id: &str) -> SyncResult<SyncOutcome> {
        // Fail fast before touching status: a sweep for an unprovisioned
        // tenant is a caller error, not a sync run.
        self.resolve_database(tenant_id).await?;

        info!(tenant_id = %tenant_id, "Starting full sync");
        self.store
            .put_sync_status(tenant_id, &SyncStatus::syncing())
            .await?;

        let mut outcome = SyncOutcome::default();

        for entity_type in SYNCED_TYPES {
            let entities = match self
                .broker
                .list_entities(tenant_id, entity_type, self.page_limit)
                .await
            {
                Ok(entities) => entities,
                Err(e) => {
                    warn!(tenant_id = %tenant_id, entity_type = %entity_type, error = %e, "Failed to fetch entities");
                    outcome
                        .errors
                        .push(format!("Failed to fetch {entity_type}: {e}"));
                    continue;
                }
            };

            debug!(
                tenant_id = %tenant_id,
                entity_type = %entity_type,
                count = entities.len(),
                "Fetched entities"
            );

            for entity in &entities {
                match self.upsert_entity(tenant_id, entity).await {
                    Ok(_) => outcome.synced += 1,
                    Err(e) => {
                        warn!(tenant_id = %tenant_id, entity_id = %entity.id, error = %e, "Failed to sync entity");
                        outcome.errors.push(format!("Failed to sync {}: {e}", entity.id));
                    }
                }
            }
        }

        let state = if outcome.errors.is_empty() {
            SyncState::Synced
        } else {
            SyncState::SyncedWithErrors
        };
        self.store
            .put_sync_status(
                tenant_id,
                &SyncStatus {
                    state,
                    last_sync: Some(Utc::now()),
                    entities_synced: outcome.synced as i32,
                    errors: outcome.errors.clone(),
                    updated_at: Utc::now()
                }
            )
            .await?;

        info!(
            tenant_id = %tenant_id,
            synced = outcome.synced,
            errors = outcome.errors.len(),
            "Full sync completed"
        );

        Ok(outcome)
    }

    /// Fetches one entity from the broker and upserts it.
    pub async fn sync_entity_by_id(
        &self,
        tenant_id: &str,
        entity_id: &str
    ) -> SyncResult<Option<SyncedRecord>> {
        match self.broker.get_entity(tenant_id, entity_id).await? {
            Some(snapshot) => Ok(Some(self.upsert_entity(tenant_id, &snapshot).await?)),
            None => Ok(None)
        }
    }

    pub async fn get_sync_status(&self, tenant_id: &str) -> SyncResult<SyncStatus> {
        Ok(self
            .store
            .get_sync_status(tenant_id)
            .await?
            .unwrap_or_else(SyncStatus::never_synced))
    }

    pub async fn list_mappings(
        &self,
        tenant_id: &str,
        entity_type: Option<&str>
    ) -> SyncResult<Vec<EntityMapping>> {
        Ok(self.store.list_mappings(tenant_id, entity_type).await?)
    }

    pub async fn get_mapping(
        &self,
        tenant_id: &str,
        entity_id: &str
    ) -> SyncResult<Option<EntityMapping>> {
        Ok(self.store.get_mapping(tenant_id, entity_id).await?)
    }
}

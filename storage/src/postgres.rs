use crate::store::{StoreResult, SyncStore};
use crate::types::{EntityMapping, SyncState, SyncStatus, TenantRecord, TenantStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

pub struct PostgresStore {
    pool: PgPool
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent schema bootstrap. Safe to run from multiple instances
    /// starting simultaneously.
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenant_records (
                tenant_id VARCHAR(255) PRIMARY KEY,
                database VARCHAR(255) NOT NULL,
                status VARCHAR(50) NOT NULL DEFAULT 'pending',
                energy_capabilities_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                installed_capabilities JSONB NOT NULL DEFAULT '[]'::jsonb,
                admin_email VARCHAR(255),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                error TEXT
            )
            "#
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_mappings (
                id BIGSERIAL PRIMARY KEY,
                tenant_id VARCHAR(255) NOT NULL,
                entity_id VARCHAR(512) NOT NULL,
                entity_type VARCHAR(255) NOT NULL,
                record_id BIGINT NOT NULL,
                record_kind VARCHAR(255) NOT NULL,
                record_name VARCHAR(512) NOT NULL,
                last_sync TIMESTAMP WITH TIME ZONE NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                UNIQUE (tenant_id, entity_id)
            )
            "#
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entity_mappings_tenant ON entity_mappings(tenant_id)"
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_status (
                tenant_id VARCHAR(255) PRIMARY KEY,
                status VARCHAR(50) NOT NULL DEFAULT 'never_synced',
                last_sync TIMESTAMP WITH TIME ZONE,
                entities_synced INTEGER NOT NULL DEFAULT 0,
                errors JSONB NOT NULL DEFAULT '[]'::jsonb,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#
        )
        .execute(&self.pool)
        .await?;

        info!("Sync storage schema initialized");
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    tenant_id: String,
    database: String,
    status: String,
    energy_capabilities_enabled: bool,
    installed_capabilities: serde_json::Value,
    admin_email: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error: Option<String>
}

impl From<TenantRow> for TenantRecord {
    fn from(row: TenantRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            database: row.database,
            status: TenantStatus::parse(&row.status),
            energy_capabilities_enabled: row.energy_capabilities_enabled,
            installed_capabilities: serde_json::from_value(row.installed_capabilities)
                .unwrap_or_default(),
            admin_email: row.admin_email,
            created_at: row.created_at,
            updated_at: row.updated_at,
            error: row.error
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MappingRow {
    entity_id: String,
    entity_type: String,
    record_id: i64,
    record_kind: String,
    record_name: String,
    last_sync: DateTime<Utc>
}

impl From<MappingRow> for EntityMapping {
    fn from(row: MappingRow) -> Self {
        Self {
            entity_id: row.entity_id,
            entity_type: row.entity_type,
            record_id: row.record_id,
            record_kind: row.record_kind,
            record_name: row.record_name,
            last_sync: row.last_sync
        }
    }
}

#[async_trait]
impl SyncStore for PostgresStore {
    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT tenant_id, database, status, energy_capabilities_enabled,
                   installed_capabilities, admin_email, created_at, updated_at, error
            FROM tenant_records
            WHERE tenant_id = $1
            "#
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TenantRecord::from))
    }

    async fn upsert_tenant(&self, record: &TenantRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_records (tenant_id, database, status, energy_capabilities_enabled,
                installed_capabilities, admin_email, created_at, updated_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), $8)
            ON CONFLICT (tenant_id) DO UPDATE SET
                database = EXCLUDED.database,
                status = EXCLUDED.status,
                energy_capabilities_enabled = EXCLUDED.energy_capabilities_enabled,
                installed_capabilities = EXCLUDED.installed_capabilities,
                admin_email = EXCLUDED.admin_email,
                updated_at = NOW(),
                error = EXCLUDED.error
            "#
        )
        .bind(&record.tenant_id)
        .bind(&record.database)
        .bind(record.status.as_str())
        .bind(record.energy_capabilities_enabled)
        .bind(serde_json::to_value(&record.installed_capabilities)?)
        .bind(&record.admin_email)
        .bind(record.created_at)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM tenant_records WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_mapping(
        &self,
        tenant_id: &str,
        entity_id: &str
    ) -> StoreResult<Option<EntityMapping>> {
        let row = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT entity_id, entity_type, record_id, record_kind, record_name, last_sync
            FROM entity_mappings
            WHERE tenant_id = $1 AND entity_id = $2
            "#
        )
        .bind(tenant_id)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EntityMapping::from))
    }

    async fn list_mappings(
        &self,
        tenant_id: &str,
        entity_type: Option<&str>
    ) -> StoreResult<Vec<EntityMapping>> {
        let rows = match entity_type {
            Some(entity_type) => {
                sqlx::query_as::<_, MappingRow>(
                    r#"
                    SELECT entity_id, entity_type, record_id, record_kind, record_name, last_sync
                    FROM entity_mappings
                    WHERE tenant_id = $1 AND entity_type = $2
                    ORDER BY entity_id
                    "#
                )
                .bind(tenant_id)
                .bind(entity_type)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MappingRow>(
                    r#"
                    SELECT entity_id, entity_type, record_id, record_kind, record_name, last_sync
                    FROM entity_mappings
                    WHERE tenant_id = $1
                    ORDER BY entity_id
                    "#
                )
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(EntityMapping::from).collect())
    }

    async fn upsert_mapping(&self, tenant_id: &str, mapping: &EntityMapping) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_mappings
                (tenant_id, entity_id, entity_type, record_id, record_kind, record_name, last_sync)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, entity_id) DO UPDATE SET
                entity_type = EXCLUDED.entity_type,
                record_id = EXCLUDED.record_id,
                record_kind = EXCLUDED.record_kind,
                record_name = EXCLUDED.record_name,
                last_sync = EXCLUDED.last_sync
            "#
        )
        .bind(tenant_id)
        .bind(&mapping.entity_id)
        .bind(&mapping.entity_type)
        .bind(mapping.record_id)
        .bind(&mapping.record_kind)
        .bind(&mapping.record_name)
        .bind(mapping.last_sync)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_sync_status(&self, tenant_id: &str) -> StoreResult<Option<SyncStatus>> {
        let row = sqlx::query(
            r#"
            SELECT status, last_sync, entities_synced, errors, updated_at
            FROM sync_status
            WHERE tenant_id = $1
            "#
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        let errors: serde_json::Value = row.try_get("errors")?;

        Ok(Some(SyncStatus {
            state: SyncState::parse(&status),
            last_sync: row.try_get("last_sync")?,
            entities_synced: row.try_get("entities_synced")?,
            errors: serde_json::from_value(errors).unwrap_or_default(),
            updated_at: row.try_get("updated_at")?
        }))
    }

    async fn put_sync_status(&self, tenant_id: &str, status: &SyncStatus) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (tenant_id, status, last_sync, entities_synced, errors, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (tenant_id) DO UPDATE SET
                status = EXCLUDED.status,
                last_sync = EXCLUDED.last_sync,
                entities_synced = EXCLUDED.entities_synced,
                errors = EXCLUDED.errors,
                updated_at = NOW()
            "#
        )
        .bind(tenant_id)
        .bind(status.state.as_str())
        .bind(status.last_sync)
        .bind(status.entities_synced)
        .bind(serde_json::to_value(&status.errors)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

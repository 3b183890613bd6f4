use crate::broker::ContextBroker;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::odoo::ErpGateway;
use crate::transform::SYNCED_TYPES;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{SyncStore, TenantRecord, TenantStatus};
use tracing::{info, warn};

const SUBSCRIPTION_URN_PREFIX: &str = "urn:ngsi-ld:Subscription:";
const SUBSCRIPTION_NAME_PREFIX: &str = "erp-sync";

/// Deterministic subscription identifier for a (tenant, entity type) pair.
/// The tenant can be parsed back out of an inbound notification's
/// subscription id without a lookup table.
pub fn subscription_id(tenant_id: &str, entity_type: &str) -> String {
    format!(
        "{SUBSCRIPTION_URN_PREFIX}{SUBSCRIPTION_NAME_PREFIX}-{tenant_id}-{}",
        entity_type.to_lowercase()
    )
}

/// Inverse of [`subscription_id`]. Identifiers that don't match the naming
/// convention yield `None`; callers treat those notifications as ignored,
/// not failed.
pub fn tenant_from_subscription_id(subscription_id: &str) -> Option<String> {
    let name = subscription_id.rsplit(':').next()?;
    let parts: Vec<&str> = name.split('-').collect();

    // erp-sync-{tenant…}-{type}; tenant ids may themselves contain dashes.
    if parts.len() >= 4 && parts[0] == "erp" && parts[1] == "sync" {
        Some(parts[2..parts.len() - 1].join("-"))
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    #[serde(default = "default_true")]
    pub enable_energy_capabilities: bool,
    #[serde(default)]
    pub additional_capabilities: Vec<String>,
    pub admin_email: Option<String>,
    pub admin_name: Option<String>
}

fn default_true() -> bool {
    true
}

impl Default for ProvisionRequest {
    fn default() -> Self {
        Self {
            enable_energy_capabilities: true,
            additional_capabilities: Vec::new(),
            admin_email: None,
            admin_name: None
        }
    }
}

/// Provisions and decommissions per-tenant ERP databases and keeps the
/// broker subscriptions that drive incremental sync in step.
pub struct TenantService {
    store: Arc<dyn SyncStore>,
    broker: Arc<dyn ContextBroker>,
    gateway: Arc<dyn ErpGateway>,
    config: SyncConfig
}

impl TenantService {
    pub fn new(
        store: Arc<dyn SyncStore>,
        broker: Arc<dyn ContextBroker>,
        gateway: Arc<dyn ErpGateway>,
        config: SyncConfig
    ) -> Self {
        Self {
            store,
            broker,
            gateway,
            config
        }
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> SyncResult<Option<TenantRecord>> {
        Ok(self.store.get_tenant(tenant_id).await?)
    }

    /// Provisions the tenant's ERP database: duplicate the template,
    /// install the capability set, create the admin user, register
    /// subscriptions. An already-active tenant is a conflict; a tenant in
    /// `error` may be retried by calling provision again.
    pub async fn provision(
        &self,
        tenant_id: &str,
        request: &ProvisionRequest
    ) -> SyncResult<TenantRecord> {
        let existing = self.store.get_tenant(tenant_id).await?;
        if let Some(record) = &existing {
            if record.status == TenantStatus::Active {
                return Err(SyncError::Conflict(format!(
                    "tenant already provisioned: {tenant_id}"
                )));
            }
        }

        info!(tenant_id = %tenant_id, "Provisioning tenant");

        let database = self.config.erp.tenant_database(tenant_id);

        // Durable marker first: a crash mid-provision must leave
        // `provisioning` behind, never silence.
        let mut marker = TenantRecord::provisioning(tenant_id, &database);
        marker.energy_capabilities_enabled = request.enable_energy_capabilities;
        if let Some(previous) = &existing {
            marker.created_at = previous.created_at;
        }
        self.store.upsert_tenant(&marker).await?;

        match self.run_provision_steps(tenant_id, &database, request).await {
            Ok((capabilities, admin_email)) => {
                let record = TenantRecord {
                    tenant_id: tenant_id.to_string(),
                    database,
                    status: TenantStatus::Active,
                    energy_capabilities_enabled: request.enable_energy_capabilities,
                    installed_capabilities: capabilities,
                    admin_email: Some(admin_email),
                    created_at: marker.created_at,
                    updated_at: Utc::now(),
                    error: None
                };
                self.store.upsert_tenant(&record).await?;
                info!(tenant_id = %tenant_id, database = %record.database, "Tenant provisioned");
                Ok(record)
            }
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Provisioning failed");
                let mut failed = marker.clone();
                failed.status = TenantStatus::Error;
                failed.error = Some(e.to_string());
                failed.updated_at = Utc::now();
                self.store.upsert_tenant(&failed).await?;
                Err(e)
            }
        }
    }

    async fn run_provision_steps(
        &self,
        tenant_id: &str,
        database: &str,
        request: &ProvisionRequest
    ) -> SyncResult<(Vec<String>, String)> {
        self.gateway
            .duplicate_database(&self.config.erp.template_database, database)
            .await?;

        let mut capabilities = self.config.base_capabilities.clone();
        if request.enable_energy_capabilities {
            capabilities.extend(self.config.energy_capabilities.iter().cloned());
        }
        capabilities.extend(request.additional_capabilities.iter().cloned());

        self.gateway
            .install_capabilities(database, &capabilities)
            .await?;

        let admin_email = request
            .admin_email
            .clone()
            .unwrap_or_else(|| format!("admin@{tenant_id}.local"));
        let admin_name = request.admin_name.as_deref().unwrap_or("Admin");
        self.gateway
            .create_user(database, &admin_email, admin_name, true)
            .await?;

        self.register_subscriptions(tenant_id).await?;

        Ok((capabilities, admin_email))
    }

    /// One subscription per routed entity type. Registration is idempotent;
    /// the broker treats an existing subscription as success.
    pub async fn register_subscriptions(&self, tenant_id: &str) -> SyncResult<()> {
        for entity_type in SYNCED_TYPES {
            self.broker
                .create_subscription(tenant_id, &subscription_id(tenant_id, entity_type), entity_type)
                .await?;
        }

        info!(tenant_id = %tenant_id, count = SYNCED_TYPES.len(), "Subscriptions registered");
        Ok(())
    }

    /// Drops the ERP database and removes the tenant record entirely.
    /// Subscription cancellation is best-effort cleanup; its failures are
    /// logged and do not block record removal.
    pub async fn decommission(&self, tenant_id: &str) -> SyncResult<()> {
        let record = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| SyncError::TenantNotProvisioned(tenant_id.to_string()))?;

        warn!(tenant_id = %tenant_id, database = %record.database, "Decommissioning tenant");

        self.gateway.drop_database(&record.database).await?;
        self.store.delete_tenant(tenant_id).await?;

        for entity_type in SYNCED_TYPES {
            let sub_id = subscription_id(tenant_id, entity_type);
            if let Err(e) = self.broker.delete_subscription(tenant_id, &sub_id).await {
                warn!(tenant_id = %tenant_id, subscription_id = %sub_id, error = %e, "Failed to cancel subscription");
            }
        }

        info!(tenant_id = %tenant_id, "Tenant decommissioned");
        Ok(())
    }
}

use crate::error::{SyncError, SyncResult};
use crate::odoo::ErpGateway;
use crate::sync::SyncEngine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a workflow event. Unknown events and absent optional
/// capabilities are outcomes, not errors; malformed payloads are errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkflowOutcome {
    Success { result: Value },
    Ignored { reason: String },
    Skipped { reason: String }
}

/// Handles typed events from the workflow-automation bus. Each event names
/// a tenant explicitly; record operations run against that tenant's ERP
/// database.
pub struct WorkflowService {
    gateway: Arc<dyn ErpGateway>,
    engine: Arc<SyncEngine>
}

impl WorkflowService {
    pub fn new(gateway: Arc<dyn ErpGateway>, engine: Arc<SyncEngine>) -> Self {
        Self { gateway, engine }
    }

    pub async fn handle_event(
        &self,
        tenant_id: &str,
        event: &str,
        data: &Value
    ) -> SyncResult<WorkflowOutcome> {
        info!(tenant_id = %tenant_id, event = %event, "Handling workflow event");

        match event {
            "erp.invoice.create" => self.create_invoice(tenant_id, data).await,
            "erp.order.create" => self.create_order(tenant_id, data).await,
            "erp.energy.log" => self.log_energy_reading(tenant_id, data).await,
            "erp.product.update" => self.update_product(tenant_id, data).await,
            "sync.request" => self.handle_sync_request(tenant_id, data).await,
            _ => {
                warn!(event = %event, "Unknown workflow event");
                Ok(WorkflowOutcome::Ignored {
                    reason: format!("Unknown event: {event}")
                })
            }
        }
    }

    /// Finds the partner by explicit id or email lookup. Events that name
    /// no resolvable partner are payload errors.
    async fn resolve_partner(&self, database: &str, data: &Value) -> SyncResult<i64> {
        if let Some(partner_id) = data.get("partner_id").and_then(Value::as_i64) {
            return Ok(partner_id);
        }

        if let Some(email) = data.get("partner_email").and_then(Value::as_str) {
            let partners = self
                .gateway
                .search_records(
                    database,
                    "partner",
                    json!([["email", "=", email]]),
                    Some(&["id"]),
                    Some(1)
                )
                .await?;

            if let Some(id) = partners.first().and_then(|row| row.get("id")).and_then(Value::as_i64) {
                return Ok(id);
            }
        }

        Err(SyncError::InvalidWebhookPayload(
            "partner not found".to_string()
        ))
    }

    async fn resolve_line_product(&self, database: &str, line: &Value) -> SyncResult<Option<i64>> {
        if let Some(product_id) = line.get("product_id").and_then(Value::as_i64) {
            return Ok(Some(product_id));
        }

        if let Some(name) = line.get("product_name").and_then(Value::as_str) {
            let products = self
                .gateway
                .search_records(
                    database,
                    "product",
                    json!([["name", "=", name]]),
                    Some(&["id"]),
                    Some(1)
                )
                .await?;

            return Ok(products
                .first()
                .and_then(|row| row.get("id"))
                .and_then(Value::as_i64));
        }

        Ok(None)
    }

    async fn assemble_lines(&self, database: &str, data: &Value) -> SyncResult<Vec<Value>> {
        let mut lines = Vec::new();

        for line in data.get("lines").and_then(Value::as_array).unwrap_or(&Vec::new()) {
            let product_id = self.resolve_line_product(database, line).await?;
            let description = line
                .get("description")
                .or_else(|| line.get("product_name"))
                .and_then(Value::as_str)
                .unwrap_or("Service");

            lines.push(json!({
                "product_id": product_id,
                "name": description,
                "quantity": line.get("quantity").and_then(Value::as_f64).unwrap_or(1.0),
                "price_unit": line.get("price").and_then(Value::as_f64).unwrap_or(0.0)
            }));
        }

        Ok(lines)
    }

    async fn create_invoice(&self, tenant_id: &str, data: &Value) -> SyncResult<WorkflowOutcome> {
        let database = self.engine.resolve_database(tenant_id).await?;
        let partner_id = self.resolve_partner(&database, data).await?;
        let lines = self.assemble_lines(&database, data).await?;

        let mut fields = Map::new();
        fields.insert("partner_id".to_string(), json!(partner_id));
        fields.insert("lines".to_string(), json!(lines));
        let invoice_date = data
            .get("date_invoice")
            .and_then(Value::as_str)
            .map_or_else(|| Utc::now().format("%Y-%m-%d").to_string(), String::from);
        fields.insert("invoice_date".to_string(), json!(invoice_date));

        let invoice_id = self.gateway.create_record(&database, "invoice", &fields).await?;
        info!(tenant_id = %tenant_id, invoice_id, "Created invoice");

        Ok(WorkflowOutcome::Success {
            result: json!({"invoice_id": invoice_id})
        })
    }

    async fn create_order(&self, tenant_id: &str, data: &Value) -> SyncResult<WorkflowOutcome> {
        let database = self.engine.resolve_database(tenant_id).await?;
        let partner_id = self.resolve_partner(&database, data).await?;
        let lines = self.assemble_lines(&database, data).await?;

        let mut fields = Map::new();
        fields.insert("partner_id".to_string(), json!(partner_id));
        fields.insert("lines".to_string(), json!(lines));

        let order_id = self.gateway.create_record(&database, "order", &fields).await?;
        info!(tenant_id = %tenant_id, order_id, "Created sales order");

        Ok(WorkflowOutcome::Success {
            result: json!({"order_id": order_id})
        })
    }

    async fn log_energy_reading(&self, tenant_id: &str, data: &Value) -> SyncResult<WorkflowOutcome> {
        let database = self.engine.resolve_database(tenant_id).await?;

        let installation_id = data.get("installation_id").and_then(Value::as_i64);
        let meter_id = data.get("meter_id").and_then(Value::as_i64);
        if installation_id.is_none() && meter_id.is_none() {
            return Err(SyncError::InvalidWebhookPayload(
                "installation_id or meter_id required".to_string()
            ));
        }

        let mut fields = Map::new();
        fields.insert("installation_id".to_string(), json!(installation_id));
        fields.insert("meter_id".to_string(), json!(meter_id));
        fields.insert(
            "value".to_string(),
            json!(data.get("value").and_then(Value::as_f64).unwrap_or(0.0))
        );
        let reading_date = data
            .get("timestamp")
            .and_then(Value::as_str)
            .map_or_else(|| Utc::now().to_rfc3339(), String::from);
        fields.insert("reading_date".to_string(), json!(reading_date));
        let reading_type = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("production");
        fields.insert("reading_type".to_string(), json!(reading_type));

        // Tenants without the energy capability reject the schema; that is
        // a skip, not a failure.
        match self.gateway.create_record(&database, "energy_reading", &fields).await {
            Ok(reading_id) => {
                info!(tenant_id = %tenant_id, reading_id, "Logged energy reading");
                Ok(WorkflowOutcome::Success {
                    result: json!({"reading_id": reading_id})
                })
            }
            Err(SyncError::Rpc { message }) => {
                warn!(tenant_id = %tenant_id, error = %message, "Energy capability not available");
                Ok(WorkflowOutcome::Skipped {
                    reason: "energy capability not installed".to_string()
                })
            }
            Err(e) => Err(e)
        }
    }

    async fn update_product(&self, tenant_id: &str, data: &Value) -> SyncResult<WorkflowOutcome> {
        let database = self.engine.resolve_database(tenant_id).await?;

        let mut product_id = data.get("product_id").and_then(Value::as_i64);

        if product_id.is_none() {
            if let Some(entity_id) = data.get("entity_id").and_then(Value::as_str) {
                let products = self
                    .gateway
                    .search_records(
                        &database,
                        "product",
                        json!([["external_id", "=", entity_id]]),
                        Some(&["id"]),
                        Some(1)
                    )
                    .await?;
                product_id = products
                    .first()
                    .and_then(|row| row.get("id"))
                    .and_then(Value::as_i64);
            }
        }

        let Some(product_id) = product_id else {
            return Err(SyncError::InvalidWebhookPayload(
                "product not found".to_string()
            ));
        };

        let values = data
            .get("values")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        self.gateway
            .update_record(&database, "product", product_id, &values)
            .await?;

        info!(tenant_id = %tenant_id, product_id, "Updated product");
        Ok(WorkflowOutcome::Success {
            result: json!({"product_id": product_id})
        })
    }

    async fn handle_sync_request(&self, tenant_id: &str, data: &Value) -> SyncResult<WorkflowOutcome> {
        if data.get("full").and_then(Value::as_bool).unwrap_or(false) {
            let outcome = self.engine.full_sync(tenant_id).await?;
            return Ok(WorkflowOutcome::Success {
                result: json!({"synced": outcome.synced, "errors": outcome.errors.len()})
            });
        }

        if let Some(entity_id) = data.get("entity_id").and_then(Value::as_str) {
            return match self.engine.sync_entity_by_id(tenant_id, entity_id).await? {
                Some(record) => Ok(WorkflowOutcome::Success {
                    result: json!({"synced": 1, "record_id": record.record_id})
                }),
                None => Ok(WorkflowOutcome::Skipped {
                    reason: format!("entity not found: {entity_id}")
                })
            };
        }

        Ok(WorkflowOutcome::Ignored {
            reason: "no action requested".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ContextBroker;
    use crate::transform::EntitySnapshot;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use storage::{MemoryStore, SyncStore, TenantRecord, TenantStatus};

    struct StubBroker;

    #[async_trait]
    impl ContextBroker for StubBroker {
        async fn get_entity(
            &self,
            _tenant_id: &str,
            _entity_id: &str
        ) -> SyncResult<Option<EntitySnapshot>> {
            Ok(None)
        }

        async fn list_entities(
            &self,
            _tenant_id: &str,
            _entity_type: &str,
            _limit: usize
        ) -> SyncResult<Vec<EntitySnapshot>> {
            Ok(Vec::new())
        }

        async fn create_subscription(
            &self,
            _tenant_id: &str,
            _subscription_id: &str,
            _entity_type: &str
        ) -> SyncResult<()> {
            Ok(())
        }

        async fn delete_subscription(
            &self,
            _tenant_id: &str,
            _subscription_id: &str
        ) -> SyncResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        search_results: HashMap<String, Vec<Map<String, Value>>>,
        creates: Mutex<Vec<(String, Map<String, Value>)>>,
        updates: Mutex<Vec<(String, i64)>>,
        reject_kind: Option<String>
    }

    impl RecordingGateway {
        fn with_search_result(kind: &str, rows: Vec<Value>) -> Self {
            let rows = rows
                .into_iter()
                .filter_map(|row| row.as_object().cloned())
                .collect();
            let mut gateway = Self::default();
            gateway.search_results.insert(kind.to_string(), rows);
            gateway
        }

        fn rejecting(kind: &str) -> Self {
            Self {
                reject_kind: Some(kind.to_string()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ErpGateway for RecordingGateway {
        async fn authenticate(&self, _database: &str) -> SyncResult<i64> {
            Ok(2)
        }

        async fn create_record(
            &self,
            _database: &str,
            record_kind: &str,
            fields: &Map<String, Value>
        ) -> SyncResult<i64> {
            if self.reject_kind.as_deref() == Some(record_kind) {
                return Err(SyncError::Rpc {
                    message: format!("unknown schema: {record_kind}")
                });
            }
            let mut creates = self.creates.lock();
            creates.push((record_kind.to_string(), fields.clone()));
            Ok(creates.len() as i64)
        }

        async fn update_record(
            &self,
            _database: &str,
            record_kind: &str,
            record_id: i64,
            _fields: &Map<String, Value>
        ) -> SyncResult<()> {
            self.updates.lock().push((record_kind.to_string(), record_id));
            Ok(())
        }

        async fn read_record(
            &self,
            _database: &str,
            _record_kind: &str,
            _record_id: i64,
            _fields: Option<&[&str]>
        ) -> SyncResult<Map<String, Value>> {
            Ok(Map::new())
        }

        async fn search_records(
            &self,
            _database: &str,
            record_kind: &str,
            _domain: Value,
            _fields: Option<&[&str]>,
            _limit: Option<usize>
        ) -> SyncResult<Vec<Map<String, Value>>> {
            Ok(self
                .search_results
                .get(record_kind)
                .cloned()
                .unwrap_or_default())
        }

        async fn duplicate_database(&self, _source: &str, _target: &str) -> SyncResult<()> {
            Ok(())
        }

        async fn drop_database(&self, _database: &str) -> SyncResult<()> {
            Ok(())
        }

        async fn list_databases(&self) -> SyncResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn install_capabilities(
            &self,
            _database: &str,
            _capabilities: &[String]
        ) -> SyncResult<()> {
            Ok(())
        }

        async fn create_user(
            &self,
            _database: &str,
            _email: &str,
            _display_name: &str,
            _is_admin: bool
        ) -> SyncResult<i64> {
            Ok(1)
        }
    }

    async fn workflow_service(gateway: Arc<RecordingGateway>) -> WorkflowService {
        let store = Arc::new(MemoryStore::new());
        let mut record = TenantRecord::provisioning("t1", "erp_t1");
        record.status = TenantStatus::Active;
        store.upsert_tenant(&record).await.unwrap();

        let engine = Arc::new(SyncEngine::new(
            store,
            Arc::new(StubBroker),
            gateway.clone(),
            1000
        ));
        WorkflowService::new(gateway, engine)
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let service = workflow_service(Arc::new(RecordingGateway::default())).await;

        let outcome = service
            .handle_event("t1", "erp.mystery.event", &json!({}))
            .await
            .unwrap();

        match outcome {
            WorkflowOutcome::Ignored { reason } => assert!(reason.contains("erp.mystery.event")),
            other => panic!("expected ignored, got {other:?}")
        }
    }

    #[tokio::test]
    async fn test_invoice_create_resolves_partner_by_email() {
        let gateway = Arc::new(RecordingGateway::with_search_result(
            "partner",
            vec![json!({"id": 5})]
        ));
        let service = workflow_service(gateway.clone()).await;

        let outcome = service
            .handle_event(
                "t1",
                "erp.invoice.create",
                &json!({
                    "partner_email": "kate@example.com",
                    "lines": [{"description": "Consulting", "quantity": 2, "price": 40.0}]
                })
            )
            .await
            .unwrap();

        assert!(matches!(outcome, WorkflowOutcome::Success { .. }));

        let creates = gateway.creates.lock();
        assert_eq!(creates.len(), 1);
        let (kind, fields) = &creates[0];
        assert_eq!(kind, "invoice");
        assert_eq!(fields["partner_id"], json!(5));
        assert_eq!(fields["lines"][0]["name"], json!("Consulting"));
    }

    #[tokio::test]
    async fn test_invoice_without_partner_is_payload_error() {
        let service = workflow_service(Arc::new(RecordingGateway::default())).await;

        let err = service
            .handle_event("t1", "erp.invoice.create", &json!({"lines": []}))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidWebhookPayload(_)));
    }

    #[tokio::test]
    async fn test_energy_log_without_capability_is_skipped() {
        let gateway = Arc::new(RecordingGateway::rejecting("energy_reading"));
        let service = workflow_service(gateway).await;

        let outcome = service
            .handle_event(
                "t1",
                "erp.energy.log",
                &json!({"meter_id": 3, "value": 12.5, "type": "consumption"})
            )
            .await
            .unwrap();

        assert!(matches!(outcome, WorkflowOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_product_update_by_external_id() {
        let gateway = Arc::new(RecordingGateway::with_search_result(
            "product",
            vec![json!({"id": 9})]
        ));
        let service = workflow_service(gateway.clone()).await;

        let outcome = service
            .handle_event(
                "t1",
                "erp.product.update",
                &json!({"entity_id": "urn:x:parcel:1", "values": {"crop_type": "rye"}})
            )
            .await
            .unwrap();

        assert!(matches!(outcome, WorkflowOutcome::Success { .. }));
        assert_eq!(*gateway.updates.lock(), vec![("product".to_string(), 9)]);
    }

    #[tokio::test]
    async fn test_outcome_serialization_tags_status() {
        let outcome = WorkflowOutcome::Skipped {
            reason: "nothing to do".to_string()
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "nothing to do");
    }
}

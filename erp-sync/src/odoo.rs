use crate::config::ErpConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Remote procedure surface of a per-tenant ERP database, plus the
/// database lifecycle operations provisioning depends on.
///
/// The trait is the session seam: implementations own how a working
/// session for a database is acquired. The shipped client authenticates
/// per call with the fixed service credential; a cached-session variant
/// can replace it without touching callers, which must still tolerate
/// authentication failing independently on any call.
#[async_trait]
pub trait ErpGateway: Send + Sync {
    async fn authenticate(&self, database: &str) -> SyncResult<i64>;

    async fn create_record(
        &self,
        database: &str,
        record_kind: &str,
        fields: &Map<String, Value>
    ) -> SyncResult<i64>;

    async fn update_record(
        &self,
        database: &str,
        record_kind: &str,
        record_id: i64,
        fields: &Map<String, Value>
    ) -> SyncResult<()>;

    async fn read_record(
        &self,
        database: &str,
        record_kind: &str,
        record_id: i64,
        fields: Option<&[&str]>
    ) -> SyncResult<Map<String, Value>>;

    async fn search_records(
        &self,
        database: &str,
        record_kind: &str,
        domain: Value,
        fields: Option<&[&str]>,
        limit: Option<usize>
    ) -> SyncResult<Vec<Map<String, Value>>>;

    async fn duplicate_database(&self, source: &str, target: &str) -> SyncResult<()>;

    async fn drop_database(&self, database: &str) -> SyncResult<()>;

    async fn list_databases(&self) -> SyncResult<Vec<String>>;

    /// Idempotent: capabilities already active in the database are skipped.
    async fn install_capabilities(&self, database: &str, capabilities: &[String]) -> SyncResult<()>;

    async fn create_user(
        &self,
        database: &str,
        email: &str,
        display_name: &str,
        is_admin: bool
    ) -> SyncResult<i64>;
}

/// JSON-RPC client for an Odoo-style ERP: `common` (authentication),
/// `object` (record operations) and `db` (lifecycle) services behind one
/// `/jsonrpc` endpoint.
pub struct OdooClient {
    record_client: Client,
    lifecycle_client: Client,
    config: ErpConfig,
    next_id: AtomicU64
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
    data: Option<RpcErrorData>
}

#[derive(Debug, Deserialize)]
struct RpcErrorData {
    message: Option<String>
}

impl OdooClient {
    pub fn new(config: ErpConfig) -> SyncResult<Self> {
        let record_client = Client::builder()
            .timeout(config.record_timeout())
            .build()
            .map_err(SyncError::Http)?;

        let lifecycle_client = Client::builder()
            .timeout(config.lifecycle_timeout())
            .build()
            .map_err(SyncError::Http)?;

        Ok(Self {
            record_client,
            lifecycle_client,
            config,
            next_id: AtomicU64::new(1)
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/jsonrpc", self.config.base_url)
    }

    async fn rpc(&self, client: &Client, service: &str, method: &str, args: Value) -> SyncResult<Value> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(service = %service, method = %method, "ERP RPC call");

        let response = client
            .post(self.endpoint())
            .json(&json!({
                "jsonrpc": "2.0",
                "method": "call",
                "params": {
                    "service": service,
                    "method": method,
                    "args": args
                },
                "id": request_id
            }))
            .send()
            .await?
            .json::<RpcResponse>()
            .await?;

        if let Some(error) = response.error {
            let message = error
                .data
                .and_then(|data| data.message)
                .unwrap_or(error.message);
            return Err(SyncError::Rpc { message });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Per-call session acquisition with the fixed service credential.
    async fn session(&self, database: &str) -> SyncResult<i64> {
        let result = self
            .rpc(
                &self.record_client,
                "common",
                "authenticate",
                json!([
                    database,
                    self.config.service_login,
                    self.config.service_password,
                    {}
                ])
            )
            .await?;

        // The remote answers `false` for a rejected database/credential pair.
        match result.as_i64() {
            Some(uid) if uid > 0 => Ok(uid),
            _ => Err(SyncError::Authentication {
                database: database.to_string(),
                message: "credential rejected".to_string()
            })
        }
    }

    async fn execute(
        &self,
        database: &str,
        record_kind: &str,
        method: &str,
        args: Value,
        kwargs: Value
    ) -> SyncResult<Value> {
        let uid = self.session(database).await?;
        self.rpc(
            &self.record_client,
            "object",
            "execute_kw",
            json!([
                database,
                uid,
                self.config.service_password,
                record_kind,
                method,
                args,
                kwargs
            ])
        )
        .await
    }
}

#[async_trait]
impl ErpGateway for OdooClient {
    async fn authenticate(&self, database: &str) -> SyncResult<i64> {
        self.session(database).await
    }

    async fn create_record(
        &self,
        database: &str,
        record_kind: &str,
        fields: &Map<String, Value>
    ) -> SyncResult<i64> {
        let result = self
            .execute(database, record_kind, "create", json!([fields]), json!({}))
            .await?;

        let record_id = result.as_i64().ok_or_else(|| SyncError::Rpc {
            message: format!("create returned non-integer id: {result}")
        })?;

        debug!(record_kind = %record_kind, record_id, "Created ERP record");
        Ok(record_id)
    }

    async fn update_record(
        &self,
        database: &str,
        record_kind: &str,
        record_id: i64,
        fields: &Map<String, Value>
    ) -> SyncResult<()> {
        self.execute(
            database,
            record_kind,
            "write",
            json!([[record_id], fields]),
            json!({})
        )
        .await?;

        debug!(record_kind = %record_kind, record_id, "Updated ERP record");
        Ok(())
    }

    async fn read_record(
        &self,
        database: &str,
        record_kind: &str,
        record_id: i64,
        fields: Option<&[&str]>
    ) -> SyncResult<Map<String, Value>> {
        let kwargs = match fields {
            Some(fields) => json!({"fields": fields}),
            None => json!({})
        };

        let result = self
            .execute(database, record_kind, "read", json!([[record_id]]), kwargs)
            .await?;

        let row = result
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| SyncError::Rpc {
                message: format!("record not found: {record_kind}/{record_id}")
            })?;

        Ok(row)
    }

    async fn search_records(
        &self,
        database: &str,
        record_kind: &str,
        domain: Value,
        fields: Option<&[&str]>,
        limit: Option<usize>
    ) -> SyncResult<Vec<Map<String, Value>>> {
        let mut kwargs = Map::new();
        if let Some(fields) = fields {
            kwargs.insert("fields".to_string(), json!(fields));
        }
        if let Some(limit) = limit {
            kwargs.insert("limit".to_string(), json!(limit));
        }

        let result = self
            .execute(
                database,
                record_kind,
                "search_read",
                json!([domain]),
                Value::Object(kwargs)
            )
            .await?;

        let rows = result
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_object)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(rows)
    }

    async fn duplicate_database(&self, source: &str, target: &str) -> SyncResult<()> {
        info!(source = %source, target = %target, "Duplicating ERP database");

        self.rpc(
            &self.lifecycle_client,
            "db",
            "duplicate_database",
            json!([self.config.master_password, source, target])
        )
        .await?;

        info!(target = %target, "ERP database duplicated");
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> SyncResult<()> {
        warn!(database = %database, "Dropping ERP database");

        self.rpc(
            &self.lifecycle_client,
            "db",
            "drop",
            json!([self.config.master_password, database])
        )
        .await?;

        Ok(())
    }

    async fn list_databases(&self) -> SyncResult<Vec<String>> {
        let result = self
            .rpc(&self.record_client, "db", "list", json!([]))
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    async fn install_capabilities(&self, database: &str, capabilities: &[String]) -> SyncResult<()> {
        info!(database = %database, ?capabilities, "Installing ERP capabilities");

        // Only capabilities not yet active; re-running provisioning must not
        // re-install anything.
        let pending = self
            .execute(
                database,
                "capability",
                "search",
                json!([[["name", "in", capabilities], ["state", "!=", "installed"]]]),
                json!({})
            )
            .await?;

        let pending_ids: Vec<i64> = pending
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();

        if pending_ids.is_empty() {
            debug!(database = %database, "All capabilities already installed");
            return Ok(());
        }

        self.execute(
            database,
            "capability",
            "install",
            json!([pending_ids]),
            json!({})
        )
        .await?;

        info!(database = %database, count = pending_ids.len(), "Capabilities installed");
        Ok(())
    }

    async fn create_user(
        &self,
        database: &str,
        email: &str,
        display_name: &str,
        is_admin: bool
    ) -> SyncResult<i64> {
        info!(database = %database, email = %email, "Creating ERP user");

        let result = self
            .execute(
                database,
                "user",
                "create",
                json!([{
                    "name": display_name,
                    "login": email,
                    "email": email,
                    "is_admin": is_admin
                }]),
                json!({})
            )
            .await?;

        result.as_i64().ok_or_else(|| SyncError::Rpc {
            message: format!("user create returned non-integer id: {result}")
        })
    }
}

pub fn create_erp_gateway(config: ErpConfig) -> SyncResult<Arc<dyn ErpGateway>> {
    Ok(Arc::new(OdooClient::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> ErpConfig {
        ErpConfig {
            base_url: base_url.to_string(),
            master_password: "master".to_string(),
            service_login: "svc".to_string(),
            service_password: "secret".to_string(),
            template_database: "erp_template".to_string(),
            database_prefix: "erp".to_string(),
            record_timeout_seconds: 5,
            lifecycle_timeout_seconds: 5
        }
    }

    async fn mount_authenticate(server: &MockServer, uid: Value) {
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(
                serde_json::json!({"params": {"service": "common", "method": "authenticate"}})
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": uid})
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_authenticate_returns_uid() {
        let server = MockServer::start().await;
        mount_authenticate(&server, serde_json::json!(7)).await;

        let client = OdooClient::new(test_config(&server.uri())).unwrap();
        let uid = client.authenticate("erp_t1").await.unwrap();
        assert_eq!(uid, 7);
    }

    #[tokio::test]
    async fn test_rejected_credential_is_authentication_error() {
        let server = MockServer::start().await;
        // Odoo answers `false`, not an error object, for bad credentials.
        mount_authenticate(&server, serde_json::json!(false)).await;

        let client = OdooClient::new(test_config(&server.uri())).unwrap();
        let err = client.authenticate("erp_t1").await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_create_record_round_trip() {
        let server = MockServer::start().await;
        mount_authenticate(&server, serde_json::json!(2)).await;

        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(
                serde_json::json!({"params": {"service": "object", "method": "execute_kw"}})
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"jsonrpc": "2.0", "id": 2, "result": 41})
            ))
            .mount(&server)
            .await;

        let client = OdooClient::new(test_config(&server.uri())).unwrap();
        let mut fields = Map::new();
        fields.insert("name".to_string(), serde_json::json!("North field"));

        let record_id = client.create_record("erp_t1", "product", &fields).await.unwrap();
        assert_eq!(record_id, 41);
    }

    #[tokio::test]
    async fn test_remote_rejection_is_rpc_error() {
        let server = MockServer::start().await;
        mount_authenticate(&server, serde_json::json!(2)).await;

        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(
                serde_json::json!({"params": {"service": "object"}})
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 2,
                "error": {
                    "message": "Odoo Server Error",
                    "data": {"message": "Invalid field 'bogus' on record"}
                }
            })))
            .mount(&server)
            .await;

        let client = OdooClient::new(test_config(&server.uri())).unwrap();
        let mut fields = Map::new();
        fields.insert("bogus".to_string(), serde_json::json!(1));

        let err = client.create_record("erp_t1", "product", &fields).await.unwrap_err();
        match err {
            SyncError::Rpc { message } => assert!(message.contains("Invalid field")),
            other => panic!("expected Rpc error, got {other:?}")
        }
    }

    #[tokio::test]
    async fn test_list_databases() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(
                serde_json::json!({"params": {"service": "db", "method": "list"}})
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": ["erp_template", "erp_t1"]})
            ))
            .mount(&server)
            .await;

        let client = OdooClient::new(test_config(&server.uri())).unwrap();
        let databases = client.list_databases().await.unwrap();
        assert_eq!(databases, vec!["erp_template", "erp_t1"]);
    }
}

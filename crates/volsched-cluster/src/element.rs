//! JSON-RPC client for the Element cluster API
//!
//! Every call is a `POST {endpoint}/json-rpc/{version}` carrying
//! `{"method", "params", "id"}`. The cluster answers with either a `result`
//! or an `error` object; API errors usually arrive with HTTP 200.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use volsched_core::{
    AsyncHandle, AsyncJobStatus, BackupTarget, ClusterConfig, ClusterLimits, RemoteJobState,
    Secret, ServiceId, TopologyReport, VolschedError, VolschedResult, VolumeId, VolumeStats,
};

use crate::traits::{AsyncJobApi, ClusterLimitsApi, ReportFetcher, VolumeStatsFetcher};

/// Name of the report carrying service and slice placement
const SLICES_REPORT: &str = "slices.json";

/// HTTP client for one cluster management endpoint
pub struct ElementClient {
    client: reqwest::Client,
    url: String,
    username: String,
    password: Secret,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    method: &'a str,
    params: &'a P,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RpcError {
    code: i64,
    name: String,
    message: String,
}

#[derive(Serialize)]
struct NoParams {}

#[derive(Serialize)]
struct GetReportParams<'a> {
    #[serde(rename = "reportName")]
    report_name: &'a str,
}

#[derive(Serialize)]
struct VolumeParams {
    #[serde(rename = "volumeID")]
    volume_id: VolumeId,
}

#[derive(Deserialize)]
struct GetVolumeStatsResult {
    #[serde(rename = "volumeStats")]
    volume_stats: RawVolumeStats,
}

#[derive(Deserialize)]
struct RawVolumeStats {
    #[serde(rename = "metadataHosts")]
    metadata_hosts: MetadataHosts,
}

#[derive(Deserialize)]
struct MetadataHosts {
    primary: ServiceId,
}

#[derive(Serialize)]
struct StartBulkVolumeReadParams<'a> {
    #[serde(rename = "volumeID")]
    volume_id: VolumeId,
    format: &'a str,
    script: &'a str,
    #[serde(rename = "scriptParameters")]
    script_parameters: ScriptParameters<'a>,
}

#[derive(Serialize)]
struct ScriptParameters<'a> {
    s3_url: &'a str,
}

#[derive(Deserialize)]
struct StartBulkVolumeReadResult {
    #[serde(rename = "asyncHandle")]
    async_handle: AsyncHandle,
}

#[derive(Serialize)]
struct GetAsyncResultParams {
    #[serde(rename = "asyncHandle")]
    async_handle: AsyncHandle,
    #[serde(rename = "keepResult")]
    keep_result: bool,
}

#[derive(Deserialize)]
struct GetAsyncResultResult {
    status: RemoteJobState,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl ElementClient {
    /// Create a client from the cluster section of the config
    pub fn new(config: &ClusterConfig) -> VolschedResult<Self> {
        if config.accept_invalid_certs {
            warn!(endpoint = %config.endpoint, "Accepting invalid TLS certificates");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| VolschedError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/json-rpc/{}",
                config.endpoint.trim_end_matches('/'),
                config.api_version
            ),
            username: config.username.clone(),
            password: config.password.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Full JSON-RPC URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and decode its result
    pub async fn call<P, R>(&self, method: &str, params: &P) -> VolschedResult<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method = method, id = id, "Calling cluster API");

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(self.password.expose()))
            .json(&RpcRequest { method, params, id })
            .send()
            .await
            .map_err(|e| VolschedError::Transport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VolschedError::Transport(format!("{} response read failed: {}", method, e)))?;

        let envelope: RpcResponse<R> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(VolschedError::Transport(format!(
                    "{} returned HTTP {}",
                    method, status
                )));
            }
            Err(e) => {
                return Err(VolschedError::Decode(format!("{}: {}", method, e)));
            }
        };

        if let Some(err) = envelope.error {
            return Err(VolschedError::Remote {
                code: err.code,
                name: err.name,
                message: err.message,
            });
        }
        if !status.is_success() {
            return Err(VolschedError::Transport(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        envelope.result.ok_or_else(|| {
            VolschedError::Decode(format!("{} response has neither result nor error", method))
        })
    }
}

#[async_trait]
impl ClusterLimitsApi for ElementClient {
    async fn get_limits(&self) -> VolschedResult<ClusterLimits> {
        self.call("GetLimits", &NoParams {}).await
    }
}

#[async_trait]
impl ReportFetcher for ElementClient {
    async fn get_topology_report(&self) -> VolschedResult<TopologyReport> {
        self.call(
            "GetReport",
            &GetReportParams {
                report_name: SLICES_REPORT,
            },
        )
        .await
    }
}

#[async_trait]
impl VolumeStatsFetcher for ElementClient {
    async fn get_volume_stats(&self, volume_id: VolumeId) -> VolschedResult<VolumeStats> {
        let result: GetVolumeStatsResult = self
            .call("GetVolumeStats", &VolumeParams { volume_id })
            .await?;
        Ok(VolumeStats {
            primary_service_id: result.volume_stats.metadata_hosts.primary,
        })
    }
}

#[async_trait]
impl AsyncJobApi for ElementClient {
    async fn start_job(
        &self,
        volume_id: VolumeId,
        target: &BackupTarget,
    ) -> VolschedResult<AsyncHandle> {
        let params = StartBulkVolumeReadParams {
            volume_id,
            format: &target.format,
            script: &target.script,
            script_parameters: ScriptParameters {
                s3_url: &target.destination,
            },
        };
        let result: StartBulkVolumeReadResult = self.call("StartBulkVolumeRead", &params).await?;
        Ok(result.async_handle)
    }

    async fn get_job_status(&self, handle: AsyncHandle) -> VolschedResult<AsyncJobStatus> {
        let result: GetAsyncResultResult = self
            .call(
                "GetAsyncResult",
                &GetAsyncResultParams {
                    async_handle: handle,
                    keep_result: true,
                },
            )
            .await?;

        let detail = match (result.error, result.result) {
            (Some(err), _) if !err.message.is_empty() => Some(err.message),
            (Some(err), _) if !err.name.is_empty() => Some(err.name),
            (_, Some(value)) if !value.is_null() => Some(value.to_string()),
            _ => None,
        };

        Ok(AsyncJobStatus {
            state: result.status,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn rpc(headers: HeaderMap, Json(req): Json<Value>) -> Response {
        // admin:s3cret
        let auth = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Basic YWRtaW46czNjcmV0" {
            return StatusCode::UNAUTHORIZED.into_response();
        }

        let id = req["id"].clone();
        let params = &req["params"];
        let body = match req["method"].as_str().unwrap_or_default() {
            "GetLimits" => json!({"id": id, "result": {
                "bulkVolumeJobsPerNodeMax": 8,
                "volumesPerAccountCountMax": 2000
            }}),
            "GetReport" => {
                assert_eq!(params["reportName"], "slices.json");
                json!({"id": id, "result": {
                    "services": [{"serviceID": 20, "nodeID": 2}],
                    "slices": [{"volumeID": 5, "primary": 20}]
                }})
            }
            "GetVolumeStats" => json!({"id": id, "result": {
                "volumeStats": {"volumeID": params["volumeID"], "metadataHosts": {"primary": 20}}
            }}),
            "StartBulkVolumeRead" => {
                assert_eq!(params["format"], "native");
                assert_eq!(params["script"], "backup_to_s3.py");
                assert_eq!(params["scriptParameters"]["s3_url"], "s3://bucket");
                if params["volumeID"] == 13 {
                    json!({"id": id, "error": {
                        "code": 500, "name": "xBulkVolumeJobLimit", "message": "too many jobs"
                    }})
                } else {
                    json!({"id": id, "result": {"asyncHandle": 4242, "key": "k", "url": "u"}})
                }
            }
            "GetAsyncResult" => match params["asyncHandle"].as_i64() {
                Some(1) => json!({"id": id, "result": {"status": "running"}}),
                Some(2) => json!({"id": id, "result": {"status": "complete", "result": {"done": true}}}),
                Some(3) => json!({"id": id, "result": {
                    "status": "error",
                    "error": {"name": "xBulkVolumeScriptFailure", "message": "disk full"}
                }}),
                _ => json!({"id": id, "result": {"status": "unheard-of"}}),
            },
            _ => json!({"id": id, "error": {"code": 500, "name": "xUnknownAPIMethod", "message": "no"}}),
        };
        Json(body).into_response()
    }

    async fn broken(Json(_req): Json<Value>) -> Response {
        (StatusCode::BAD_GATEWAY, "upstream gone").into_response()
    }

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route("/json-rpc/12.5", post(rpc))
            .route("/json-rpc/broken", post(broken));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(endpoint: &str, api_version: &str) -> ElementClient {
        let config = ClusterConfig {
            endpoint: endpoint.to_string(),
            api_version: api_version.to_string(),
            username: "admin".to_string(),
            password: Secret::new("s3cret"),
            timeout_secs: 5,
            accept_invalid_certs: false,
        };
        ElementClient::new(&config).unwrap()
    }

    #[test]
    fn test_url_building() {
        let client = client_for("https://10.0.0.10/", "12.5");
        assert_eq!(client.url(), "https://10.0.0.10/json-rpc/12.5");
    }

    #[tokio::test]
    async fn test_limits_and_report() {
        let endpoint = spawn_stub().await;
        let client = client_for(&endpoint, "12.5");

        let limits = client.get_limits().await.unwrap();
        assert_eq!(limits.bulk_volume_jobs_per_node_max, 8);

        let report = client.get_topology_report().await.unwrap();
        assert_eq!(report.services[0].node_id, 2);
        assert_eq!(report.slices[0].volume_id, 5);

        let stats = client.get_volume_stats(5).await.unwrap();
        assert_eq!(stats.primary_service_id, 20);
    }

    #[tokio::test]
    async fn test_start_job() {
        let endpoint = spawn_stub().await;
        let client = client_for(&endpoint, "12.5");
        let target = BackupTarget::new("s3://bucket");

        assert_eq!(client.start_job(7, &target).await.unwrap(), 4242);

        let err = client.start_job(13, &target).await.unwrap_err();
        match err {
            VolschedError::Remote { code, name, message } => {
                assert_eq!(code, 500);
                assert_eq!(name, "xBulkVolumeJobLimit");
                assert_eq!(message, "too many jobs");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_job_status() {
        let endpoint = spawn_stub().await;
        let client = client_for(&endpoint, "12.5");

        let running = client.get_job_status(1).await.unwrap();
        assert_eq!(running, AsyncJobStatus::running());

        let complete = client.get_job_status(2).await.unwrap();
        assert_eq!(complete.state, RemoteJobState::Complete);

        let failed = client.get_job_status(3).await.unwrap();
        assert_eq!(failed, AsyncJobStatus::error("disk full"));

        let unknown = client.get_job_status(4).await.unwrap_err();
        assert!(matches!(unknown, VolschedError::Decode(_)));
        assert!(unknown.is_transient());
    }

    #[tokio::test]
    async fn test_http_failures_are_transport_errors() {
        let endpoint = spawn_stub().await;

        let broken = client_for(&endpoint, "broken");
        let err = broken.get_limits().await.unwrap_err();
        assert!(matches!(err, VolschedError::Transport(_)));

        let mut unauthorized = client_for(&endpoint, "12.5");
        unauthorized.password = Secret::new("wrong");
        let err = unauthorized.get_limits().await.unwrap_err();
        assert!(matches!(err, VolschedError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(&format!("http://{}", addr), "12.5");
        let err = client.get_topology_report().await.unwrap_err();
        assert!(matches!(err, VolschedError::Transport(_)));
        assert!(err.is_transient());
    }
}

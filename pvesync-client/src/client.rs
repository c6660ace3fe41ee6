//! REST client for `/api2/json`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use pvesync_engine::{
    ApiError, CloneRequest, DiskSize, IdGenerator, SlotKey, UpdateRequest, VmApi, VmRef, VmStatus,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, classify, transport};

/// Every response wraps its payload in `data`.
#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    errors: Option<BTreeMap<String, Value>>,
}

#[derive(Deserialize)]
struct TaskStatus {
    status: String,
    exitstatus: Option<String>,
}

fn error_message(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let mut message = parsed
        .as_ref()
        .and_then(|b| b.message.as_deref())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() || parsed.is_some() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                trimmed.to_string()
            }
        });
    if let Some(errors) = parsed.and_then(|b| b.errors) {
        for (field, err) in errors {
            let err = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
            message.push_str(&format!("; {field}: {}", err.trim()));
        }
    }
    message
}

/// Flattens a config value to the property-string form the engine decodes.
fn stringify(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(flag(b).to_string()),
        other => Some(other.to_string()),
    }
}

fn flag(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

fn vm_path(vm: &VmRef) -> String {
    format!("/nodes/{}/qemu/{}", vm.node, vm.vmid)
}

/// Platform client authenticated with a pre-issued API token.
pub struct PveClient {
    http: reqwest::Client,
    base: String,
    task_poll_interval: Duration,
}

impl PveClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let endpoint = config.endpoint.trim_end_matches('/');
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ClientError::InvalidEndpoint(config.endpoint.clone()));
        }

        let mut auth = HeaderValue::from_str(&format!("PVEAPIToken={}", config.api_token))
            .map_err(|_| ClientError::InvalidToken)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;

        Ok(Self {
            http,
            base: format!("{endpoint}/api2/json"),
            task_poll_interval: config.task_poll_interval,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base, path))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, ApiError> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status.as_u16(), error_message(status, &body)));
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    /// Sends a request that may start a task and waits for the task.
    async fn run_task(&self, node: &str, request: RequestBuilder) -> Result<(), ApiError> {
        match self.send::<String>(request).await? {
            Some(upid) => self.wait_task(node, &upid).await,
            None => Ok(()),
        }
    }

    async fn wait_task(&self, node: &str, upid: &str) -> Result<(), ApiError> {
        debug!(node, upid, "waiting for task");
        let path = format!("/nodes/{node}/tasks/{upid}/status");
        loop {
            let task: TaskStatus = self
                .send(self.request(Method::GET, &path))
                .await?
                .ok_or_else(|| ApiError::Decode(format!("task {upid} reported no status")))?;
            if task.status == "stopped" {
                let exit = task.exitstatus.unwrap_or_default();
                if exit == "OK" || exit.starts_with("WARNINGS") {
                    debug!(upid, exit = %exit, "task finished");
                    return Ok(());
                }
                return Err(ApiError::TaskFailed {
                    upid: upid.to_string(),
                    exit_status: exit,
                });
            }
            tokio::time::sleep(self.task_poll_interval).await;
        }
    }
}

#[async_trait]
impl VmApi for PveClient {
    async fn fetch_config(
        &self,
        vm: &VmRef,
    ) -> Result<Option<BTreeMap<String, String>>, ApiError> {
        let request = self.request(Method::GET, &format!("{}/config", vm_path(vm)));
        match self.send::<BTreeMap<String, Value>>(request).await {
            Ok(data) => Ok(Some(
                data.unwrap_or_default()
                    .into_iter()
                    .filter_map(|(k, v)| stringify(v).map(|v| (k, v)))
                    .collect(),
            )),
            Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn apply_update(&self, vm: &VmRef, update: &UpdateRequest) -> Result<(), ApiError> {
        let mut form: Vec<(&str, String)> = update
            .set
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        if !update.delete.is_empty() {
            form.push(("delete", update.delete.join(",")));
        }
        debug!(vm = %vm, fields = form.len(), "PUT config");
        let request = self
            .request(Method::PUT, &format!("{}/config", vm_path(vm)))
            .form(&form);
        self.run_task(&vm.node, request).await
    }

    async fn grow_volume(&self, vm: &VmRef, slot: SlotKey, size: DiskSize) -> Result<(), ApiError> {
        let form = [("disk", slot.to_string()), ("size", size.to_string())];
        debug!(vm = %vm, slot = %slot, size = %size, "PUT resize");
        let request = self
            .request(Method::PUT, &format!("{}/resize", vm_path(vm)))
            .form(&form);
        self.run_task(&vm.node, request).await
    }

    async fn clone_vm(&self, request: &CloneRequest) -> Result<(), ApiError> {
        let mut form: Vec<(&str, String)> = vec![
            ("newid", request.new_id.to_string()),
            ("target", request.target_node.clone()),
            ("full", flag(request.full).to_string()),
        ];
        let optional = [
            ("name", request.name.clone()),
            ("description", request.description.clone()),
            ("storage", request.target_datastore.clone()),
            ("format", request.target_format.clone()),
            ("snapname", request.snapshot_name.clone()),
            ("pool", request.pool_id.clone()),
            ("bwlimit", request.bandwidth_limit.map(|l| l.to_string())),
        ];
        form.extend(optional.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))));

        debug!(source = %request.source, new_id = request.new_id, "POST clone");
        let call = self
            .request(Method::POST, &format!("{}/clone", vm_path(&request.source)))
            .form(&form);
        self.run_task(&request.source.node, call).await
    }

    async fn status(&self, vm: &VmRef) -> Result<Option<VmStatus>, ApiError> {
        let request = self.request(Method::GET, &format!("{}/status/current", vm_path(vm)));
        match self.send::<VmStatus>(request).await {
            Ok(status) => Ok(status),
            Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn shutdown(&self, vm: &VmRef, timeout: Duration) -> Result<(), ApiError> {
        let form = [
            ("forceStop", "1".to_string()),
            ("timeout", timeout.as_secs().to_string()),
        ];
        let request = self
            .request(Method::POST, &format!("{}/status/shutdown", vm_path(vm)))
            .form(&form);
        self.run_task(&vm.node, request).await
    }

    async fn stop(&self, vm: &VmRef) -> Result<(), ApiError> {
        let request = self.request(Method::POST, &format!("{}/status/stop", vm_path(vm)));
        self.run_task(&vm.node, request).await
    }

    async fn delete(
        &self,
        vm: &VmRef,
        purge: bool,
        destroy_unreferenced_disks: bool,
    ) -> Result<(), ApiError> {
        let query = [
            ("purge", flag(purge)),
            ("destroy-unreferenced-disks", flag(destroy_unreferenced_disks)),
        ];
        let request = self.request(Method::DELETE, &vm_path(vm)).query(&query);
        self.run_task(&vm.node, request).await
    }
}

#[async_trait]
impl IdGenerator for PveClient {
    async fn next_id(&self) -> Result<u32, ApiError> {
        let data: Value = self
            .send(self.request(Method::GET, "/cluster/nextid"))
            .await?
            .ok_or_else(|| ApiError::Decode("next id missing from response".to_string()))?;
        let parsed = match &data {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        };
        parsed.ok_or_else(|| ApiError::Decode(format!("next id {data} is not a VM id")))
    }
}

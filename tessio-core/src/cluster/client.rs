use crate::cluster::types::{
    ActivateResponse, DeactivateResponse, HeartbeatPing, PrepareResponse, RecoveryRequest,
    RecoveryResponse, WorkerStatusResponse,
};
use crate::error::{Result, TessioError};
use crate::store::inventory::{FingerprintEntry, InventoryItem};
use crate::store::servers::ServerRecord;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for node-to-node calls. Addresses are `host:port` strings
/// taken from the server map.
#[derive(Clone)]
pub struct PeerClient {
    client: Client,
}

impl PeerClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| TessioError::Http(error.to_string()))?;
        Ok(Self { client })
    }

    fn url(&self, address: &str, path: &str) -> Result<Url> {
        Url::parse(&format!("http://{}{}", address, path))
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn heartbeat(&self, address: &str, server_id: i64) -> Result<()> {
        let url = self.url(address, "/heartbeat")?;
        let ping = HeartbeatPing {
            server_id,
            sent_at: Utc::now(),
        };

        let response = self
            .client
            .put(url)
            .json(&ping)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "heartbeat rejected: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }

    pub async fn set_partner(&self, address: &str, partner_id: Option<i64>) -> Result<()> {
        let mut url = self.url(address, "/partner")?;
        if let Some(partner) = partner_id {
            url.query_pairs_mut()
                .append_pair("partner_id", &partner.to_string());
        }

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "failed to set partner: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }

    pub async fn set_orchestrator(&self, address: &str, host: &str, port: u16) -> Result<()> {
        let mut url = self.url(address, "/orchestrator")?;
        url.query_pairs_mut()
            .append_pair("ip_address", host)
            .append_pair("port", &port.to_string());

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "failed to set orchestrator: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }

    pub async fn push_servers(&self, address: &str, records: &[ServerRecord]) -> Result<()> {
        let url = self.url(address, "/servers/sync")?;

        let response = self
            .client
            .put(url)
            .json(records)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "failed to push server map: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }

    pub async fn fetch_status(&self, address: &str) -> Result<WorkerStatusResponse> {
        let url = self.url(address, "/status")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "failed to fetch status: address={} status={}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn deactivate(
        &self,
        address: &str,
        ids: &[i64],
        new_location: i64,
        send_data: bool,
    ) -> Result<DeactivateResponse> {
        let mut url = self.url(address, "/inventory/deactivate")?;
        url.query_pairs_mut()
            .append_pair("ids", &join_ids(ids))
            .append_pair("new_location", &new_location.to_string())
            .append_pair("send_data", if send_data { "true" } else { "false" });

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "deactivate failed: address={} status={}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn activate(&self, address: &str, ids: &[i64]) -> Result<Vec<i64>> {
        let url = self.url(address, "/inventory/activate")?;

        let response = self
            .client
            .put(url)
            .json(&ids)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "activate failed: address={} status={}",
                address,
                response.status()
            )));
        }

        let body: ActivateResponse = response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;
        Ok(body.activated)
    }

    pub async fn push_rows(&self, address: &str, rows: &[InventoryItem]) -> Result<()> {
        let url = self.url(address, "/inventory/update")?;

        let response = self
            .client
            .put(url)
            .json(rows)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "row update failed: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }

    pub async fn fetch_fingerprints(
        &self,
        address: &str,
        ids: &[i64],
    ) -> Result<Vec<FingerprintEntry>> {
        let url = self.url(address, "/inventory/fingerprints")?;

        let response = self
            .client
            .post(url)
            .json(&ids)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "fingerprint fetch failed: address={} status={}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn prepare(&self, address: &str, rows: &[InventoryItem]) -> Result<Vec<i64>> {
        let url = self.url(address, "/inventory/prepare")?;

        let response = self
            .client
            .put(url)
            .json(rows)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "prepare rejected: address={} status={}",
                address,
                response.status()
            )));
        }

        let body: PrepareResponse = response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;
        Ok(body.accepted)
    }

    pub async fn apply(&self, address: &str, ids: &[i64]) -> Result<()> {
        let url = self.url(address, "/inventory/apply")?;

        let response = self
            .client
            .put(url)
            .json(&ids)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "apply rejected: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }

    pub async fn abort(&self, address: &str, ids: &[i64]) -> Result<()> {
        let url = self.url(address, "/inventory/abort")?;

        let response = self
            .client
            .put(url)
            .json(&ids)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "abort rejected: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }

    /// Reports a suspected partner failure to the orchestrator. A 401 means
    /// the orchestrator refused to hand this node the failed partner's
    /// items and the caller must stand down.
    pub async fn report_failure(
        &self,
        address: &str,
        failed_server_id: i64,
        backup_server_id: i64,
    ) -> Result<()> {
        let mut url = self.url(address, "/failure")?;
        url.query_pairs_mut()
            .append_pair("failed_server_id", &failed_server_id.to_string())
            .append_pair("backup_server_id", &backup_server_id.to_string());

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let reason = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => "failover authority denied".to_string(),
            };
            return Err(TessioError::AuthorityDenied(reason));
        }

        if !status.is_success() {
            return Err(TessioError::Http(format!(
                "failure report rejected: address={} status={}",
                address, status
            )));
        }

        Ok(())
    }

    pub async fn initiate_recovery(
        &self,
        address: &str,
        server_id: i64,
        relinquished_ids: &[i64],
    ) -> Result<RecoveryResponse> {
        let url = self.url(address, "/initiate-recovery")?;
        let request = RecoveryRequest {
            server_id,
            relinquished_ids: relinquished_ids.to_vec(),
        };

        let response = self
            .client
            .put(url)
            .json(&request)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "recovery rejected: address={} status={}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn autoregister(
        &self,
        address: &str,
        hostname: &str,
        port: u16,
    ) -> Result<ServerRecord> {
        let mut url = self.url(address, "/autoregister")?;
        url.query_pairs_mut()
            .append_pair("hostname", hostname)
            .append_pair("port", &port.to_string());

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "registration rejected: address={} status={}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn fetch_servers(&self, address: &str) -> Result<Vec<ServerRecord>> {
        let url = self.url(address, "/servers")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "failed to fetch servers: address={} status={}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn fetch_inventory(&self, address: &str) -> Result<Vec<InventoryItem>> {
        let url = self.url(address, "/inventory")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "failed to fetch inventory: address={} status={}",
                address,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))
    }

    pub async fn reset(&self, address: &str) -> Result<()> {
        let url = self.url(address, "/reset")?;

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|error| TessioError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TessioError::Http(format!(
                "reset rejected: address={} status={}",
                address,
                response.status()
            )));
        }

        Ok(())
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

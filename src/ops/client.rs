//! Client for a running node's HTTP API

use crate::common::{client_timestamp, Error, Result};
use crate::zab::messages::{routes, ElectionRequest, SyncReport, WriteRequest, WriteResponse};
use crate::zab::NodeStatus;
use crate::ztree::Metadata;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Election outcome as a client sees it
#[derive(Debug, Clone, Deserialize)]
pub struct ElectionReply {
    pub outcome: String,
    #[serde(default)]
    pub candidate: Option<String>,
}

pub struct NodeClient {
    base: String,
    client: reqwest::Client,
}

impl NodeClient {
    /// `node` is `host:port` or a full `http://` URL
    pub fn new(node: &str, timeout: Duration) -> Result<Self> {
        let base = if node.starts_with("http://") || node.starts_with("https://") {
            node.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", node)
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build client: {}", e)))?;
        Ok(Self { base, client })
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status == reqwest::StatusCode::MISDIRECTED_REQUEST {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let leader = body["leader"].as_str().unwrap_or_default().to_string();
            return Err(Error::NotLeader(leader));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{}: {}", status, text)));
        }
        Ok(resp.json().await?)
    }

    /// Submit a write; the timestamp defaults to now
    pub async fn put(&self, payload: String, timestamp: Option<String>) -> Result<WriteResponse> {
        let request = WriteRequest {
            payload,
            timestamp: timestamp.unwrap_or_else(client_timestamp),
        };
        let resp = self
            .client
            .post(format!("{}{}", self.base, routes::WRITE))
            .json(&request)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let resp = self
            .client
            .get(format!("{}{}", self.base, routes::ADMIN_STATUS))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn records(&self) -> Result<Vec<Metadata>> {
        let resp = self
            .client
            .get(format!("{}{}", self.base, routes::METADATA))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn sync(&self) -> Result<SyncReport> {
        let resp = self
            .client
            .post(format!("{}{}", self.base, routes::ADMIN_SYNC))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn elect(&self) -> Result<ElectionReply> {
        let resp = self
            .client
            .post(format!("{}{}", self.base, routes::ELECT_LEADER))
            .json(&ElectionRequest::default())
            .send()
            .await?;
        Self::decode(resp).await
    }
}

/// Render a status document the way `minizab status` prints it
pub fn describe_status(status: &NodeStatus) -> String {
    format!(
        "{} ({}), leader {}\n  proposal: round {} {}\n  sync: round {} {}\n  log: {} records, highest id {}\n  queue depth: {} (admitted {})",
        status.id,
        status.role,
        status.leader,
        status.proposal.id,
        status.proposal.state,
        status.sync.id,
        status.sync.state,
        status.records,
        status.highest_id,
        status.queue_depth,
        status.admitted.as_deref().unwrap_or("none"),
    )
}

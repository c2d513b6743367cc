//! HTTP client for ensemble peers

use crate::common::{Error, Result};
use crate::zab::messages::{routes, FORWARDED_HEADER, SENDER_HEADER};
use axum::http::{header, HeaderMap, Method, StatusCode};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Raw response relayed back to a client
#[derive(Debug)]
pub struct RelayedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Headers that belong to one hop and are never copied across a relay
pub fn is_hop_header(name: &header::HeaderName) -> bool {
    *name == header::HOST
        || *name == header::CONTENT_LENGTH
        || *name == header::CONNECTION
        || *name == header::TRANSFER_ENCODING
}

#[derive(Clone)]
pub struct PeerClient {
    me: String,
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new(me: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build peer client: {}", e)))?;
        Ok(Self {
            me: me.into(),
            client,
        })
    }

    fn url(peer: &str, route: &str) -> String {
        format!("http://{}{}", peer, route)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        peer: &str,
        route: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(Self::url(peer, route))
            .header(SENDER_HEADER, &self.me)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Peer {
                peer: peer.to_string(),
                reason: format!("{} on {}: {}", status, route, text),
            });
        }
        Ok(resp)
    }

    /// One-way peer RPC; only the status is checked
    pub async fn send<T: Serialize + ?Sized>(&self, peer: &str, route: &str, body: &T) -> Result<()> {
        self.post(peer, route, body).await?;
        Ok(())
    }

    /// Peer RPC with a JSON reply
    pub async fn call<T, R>(&self, peer: &str, route: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self.post(peer, route, body).await?;
        Ok(resp.json().await?)
    }

    /// Is the peer's HTTP listener answering?
    pub async fn probe(&self, peer: &str) -> bool {
        match self
            .client
            .get(Self::url(peer, routes::HEALTH_LIVE))
            .header(SENDER_HEADER, &self.me)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Replay a client request against `leader`, marking it as forwarded
    pub async fn forward(
        &self,
        leader: &str,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<RelayedResponse> {
        let mut outgoing = HeaderMap::new();
        for (name, value) in headers {
            let ours = name.as_str().eq_ignore_ascii_case(SENDER_HEADER)
                || name.as_str().eq_ignore_ascii_case(FORWARDED_HEADER);
            if !is_hop_header(name) && !ours {
                outgoing.append(name.clone(), value.clone());
            }
        }

        let resp = self
            .client
            .request(method, Self::url(leader, path_and_query))
            .headers(outgoing)
            .header(FORWARDED_HEADER, &self.me)
            .header(SENDER_HEADER, &self.me)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        Ok(RelayedResponse {
            status,
            headers,
            body,
        })
    }
}

//! Static ensemble membership

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

/// The fixed set of cooperating nodes, in configuration order.
///
/// Membership never changes for the lifetime of a process. The position of a
/// member in the list is its election rank (later members outrank earlier ones).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ensemble {
    me: String,
    servers: Vec<String>,
}

impl Ensemble {
    pub fn new(me: impl Into<String>, servers: Vec<String>) -> Result<Self> {
        let me = me.into();
        if servers.is_empty() {
            return Err(Error::InvalidConfig("ensemble has no members".into()));
        }
        for (i, server) in servers.iter().enumerate() {
            if server.trim().is_empty() {
                return Err(Error::InvalidConfig("empty ensemble member".into()));
            }
            if servers[..i].contains(server) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate ensemble member: {}",
                    server
                )));
            }
        }
        if !servers.contains(&me) {
            return Err(Error::InvalidConfig(format!(
                "node {} is not a member of the ensemble",
                me
            )));
        }
        Ok(Self { me, servers })
    }

    /// Parse a comma-delimited member list (`a:1,b:2,c:3`)
    pub fn parse(me: impl Into<String>, servers: &str) -> Result<Self> {
        let servers = servers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self::new(me, servers)
    }

    /// Identity of the local node
    pub fn me(&self) -> &str {
        &self.me
    }

    /// Every member, including the local node
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Every member except the local node
    pub fn others(&self) -> impl Iterator<Item = &String> + '_ {
        self.servers.iter().filter(move |s| **s != self.me)
    }

    /// Full ensemble size, the local node included
    pub fn size(&self) -> usize {
        self.servers.len()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.servers.iter().any(|s| s == member)
    }

    /// Election rank of a member
    pub fn rank(&self, member: &str) -> Option<usize> {
        self.servers.iter().position(|s| s == member)
    }

    /// Members that outrank the local node, lowest rank first
    pub fn higher_ranked(&self) -> Vec<String> {
        match self.rank(&self.me) {
            Some(mine) => self.servers[mine + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Members joined back into the comma-delimited form
    pub fn joined(&self) -> String {
        self.servers.join(",")
    }
}

/// Majority test used by both the proposal and the sync rounds.
///
/// `responses` counts only replies from other members; the local node never
/// votes for itself. With three members this takes both followers.
pub fn quorum_reached(responses: usize, ensemble_size: usize) -> bool {
    responses > ensemble_size / 2
}

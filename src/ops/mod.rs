//! Operator commands against running nodes

pub mod client;

pub use client::{describe_status, ElectionReply, NodeClient};

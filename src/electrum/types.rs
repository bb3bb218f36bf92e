// Bitcoin Dev Kit
// Written in 2020 by Alekos Filini <alekos.filini@gmail.com>
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Electrum wire types

use std::fmt;

use bitcoin::block;
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::hex::DisplayHex;
use bitcoin::{BlockHash, Script, Txid};

use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

static JSONRPC_2_0: &str = "2.0";

/// Parameter of a JSON-RPC request
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Param {
    String(String),
}

#[derive(Debug, Serialize, Clone)]
pub struct Request<'a> {
    jsonrpc: &'static str,

    pub id: usize,
    pub method: &'a str,
    pub params: &'a [Param],
}

impl<'a> Request<'a> {
    pub fn new_id(id: usize, method: &'a str, params: &'a [Param]) -> Self {
        Self {
            jsonrpc: JSONRPC_2_0,
            id,
            method,
            params,
        }
    }
}

/// Electrum fingerprint of an output script
///
/// This is the SHA-256 of the script with its bytes reversed, and it's shown (and serialized) as
/// lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptHash([u8; 32]);

impl ScriptHash {
    /// Compute the fingerprint of `script`
    pub fn new(script: &Script) -> Self {
        let mut result = sha256::Hash::hash(script.as_bytes()).to_byte_array();
        result.reverse();

        ScriptHash(result)
    }

    /// Raw bytes, in the order they are shown
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hex())
    }
}

impl Serialize for ScriptHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<ScriptHash> for Param {
    fn from(hash: ScriptHash) -> Self {
        Param::String(hash.to_string())
    }
}

/// Identity of a server, as returned by `server.version`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerVersionRes {
    /// Name and version of the server software, e.g. `ElectrumX 1.16.0`
    pub server_impl: String,
    /// Protocol version negotiated with the server
    pub protocol_version: String,
}

impl ServerVersionRes {
    pub(crate) fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let mut parts: Vec<String> = match serde_json::from_value(value.clone()) {
            Ok(parts) => parts,
            Err(_) => return Err(Error::InvalidResponse(value)),
        };
        if parts.len() < 2 {
            return Err(Error::InvalidResponse(value));
        }

        let protocol_version = parts.swap_remove(1);
        let server_impl = parts.swap_remove(0);

        Ok(ServerVersionRes {
            server_impl,
            protocol_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListUnspentRes {
    pub height: u32,
    pub tx_pos: u32,
    pub value: u64,
    pub tx_hash: Txid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerFeaturesRes {
    pub server_version: String,
    pub genesis_hash: BlockHash,
    pub protocol_min: String,
    pub protocol_max: String,
    pub hash_function: Option<String>,
    pub pruning: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHeaderNotification {
    pub height: usize,
    pub hex: String,
}

#[derive(Debug, Clone)]
pub struct HeaderNotification {
    pub height: usize,
    pub header: block::Header,
}

impl TryFrom<RawHeaderNotification> for HeaderNotification {
    type Error = Error;

    fn try_from(raw: RawHeaderNotification) -> Result<Self, Self::Error> {
        Ok(HeaderNotification {
            height: raw.height,
            header: deserialize_hex(&raw.hex)?,
        })
    }
}

/// Entry of the `server.peers.subscribe` answer: `[ip, hostname, [features...]]`
#[derive(Debug, Deserialize)]
pub(crate) struct PeerRes(pub String, pub String, pub Vec<String>);

impl PeerRes {
    /// `host:port` of the TLS endpoint of this peer, if it advertises one
    pub fn tls_endpoint(&self) -> Option<String> {
        let port = self
            .2
            .iter()
            .filter_map(|feature| feature.strip_prefix('s'))
            .find(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))?;

        Some(format!("{}:{}", self.1, port))
    }
}

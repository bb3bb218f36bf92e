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

//! Electrum client
//!
//! A [`Client`] owns at most one connection to an Electrum server and speaks newline-delimited
//! JSON-RPC over it. It never retries: every I/O or protocol failure is returned to the caller,
//! which decides whether to [`disconnect`](Client::disconnect) and try again somewhere else.
//!
//! A client is meant to be used by a single task at a time, the [`Pool`](super::pool::Pool)
//! hands them out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use bitcoin::consensus::encode::{deserialize_hex, serialize_hex};
use bitcoin::{Transaction, Txid};
use rustls::ClientConfig;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;

use super::batch::{Batch, LIST_UNSPENT, TRANSACTION_GET};
use super::stream::{tls_config, ElectrumStream};
use super::types::*;
use crate::config::ElectrumConfig;
use crate::error::Error;

pub struct Client {
    config: Arc<ElectrumConfig>,
    tls: Arc<ClientConfig>,

    endpoint: Option<String>,
    stream: Option<BufReader<ElectrumStream>>,
    server_version: ServerVersionRes,

    next_id: usize,
    // set while a request is written but its response not yet read
    in_flight: bool,
}

impl Client {
    /// Create a disconnected client
    pub fn new(config: Arc<ElectrumConfig>, tls: Arc<ClientConfig>) -> Self {
        Client {
            config,
            tls,
            endpoint: None,
            stream: None,
            server_version: ServerVersionRes::default(),
            next_id: 0,
            in_flight: false,
        }
    }

    /// Create a disconnected client with its own TLS configuration
    pub fn from_config(config: ElectrumConfig) -> Result<Self, Error> {
        let tls = tls_config(config.validate_domain)?;
        Ok(Client::new(Arc::new(config), tls))
    }

    #[cfg(test)]
    pub(crate) fn new_test(stream: tokio::io::DuplexStream, server_impl: &str) -> Self {
        let mut client = Client::new(
            Arc::new(ElectrumConfig::default()),
            tls_config(false).expect("default tls config"),
        );
        client.endpoint = Some("test:0".to_string());
        client.stream = Some(BufReader::new(ElectrumStream::Test(stream)));
        client.server_version = ServerVersionRes {
            server_impl: server_impl.to_string(),
            protocol_version: "1.4".to_string(),
        };

        client
    }

    /// Connect to `endpoint`, closing the current connection first
    ///
    /// The server is identified with a `server.version` call before this method returns: a
    /// server that doesn't answer it leaves the client disconnected.
    pub async fn connect(&mut self, endpoint: &str) -> Result<(), Error> {
        self.disconnect();

        let stream = match ElectrumStream::connect(
            endpoint,
            Arc::clone(&self.tls),
            self.config.require_tls,
            self.config.connection_timeout(),
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!("{}: connection failed: {}", endpoint, e);
                return Err(e);
            }
        };

        info!(
            "{}: connected ({})",
            endpoint,
            if stream.is_tls() { "tls" } else { "tcp" }
        );
        self.endpoint = Some(endpoint.to_string());
        self.stream = Some(BufReader::new(stream));

        match self.server_version().await {
            Ok(version) => {
                info!(
                    "{}: identified as {} ({})",
                    endpoint, version.server_impl, version.protocol_version
                );
                self.server_version = version;
                Ok(())
            }
            Err(e) => {
                error!("{}: server.version failed: {}", endpoint, e);
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Close the connection, if any
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!(
                "{}: disconnected",
                self.endpoint.as_deref().unwrap_or("<unknown>")
            );
        }

        self.endpoint = None;
        self.server_version = ServerVersionRes::default();
        self.in_flight = false;
    }

    /// Whether the client holds a connection. The server might have closed it on its side
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Endpoint of the current connection
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Server implementation reported by `server.version`, empty when disconnected
    pub fn server_impl(&self) -> &str {
        &self.server_version.server_impl
    }

    pub fn protocol_version(&self) -> &str {
        &self.server_version.protocol_version
    }

    /// Whether the connected server is known to answer batched calls correctly
    pub fn supports_batching(&self) -> bool {
        self.is_connected() && self.config.supports_batching(self.server_impl())
    }

    /// Whether a call was abandoned halfway, leaving a response to be read on the connection
    pub(crate) fn is_interrupted(&self) -> bool {
        self.in_flight
    }

    fn next_ids(&mut self, count: usize) -> usize {
        let first = self.next_id;
        self.next_id = self.next_id.wrapping_add(count);
        first
    }

    /// Send a single call and wait for its result
    ///
    /// A zero `timeout` waits forever.
    pub async fn call(
        &mut self,
        method: &str,
        params: &[Param],
        timeout: Duration,
    ) -> Result<Value, Error> {
        let id = self.next_ids(1);
        let req = Request::new_id(id, method, params);
        let mut raw = serde_json::to_vec(&req)?;
        raw.push(b'\n');

        let start = Instant::now();
        let mut resp = self.round_trip(raw, method, timeout).await?;
        debug!("{} took {:?}", method, start.elapsed());

        match resp.get("id").and_then(Value::as_u64) {
            Some(found) if found == id as u64 => {}
            found => {
                return Err(Error::UnexpectedResponseId {
                    expected: id,
                    found,
                })
            }
        }
        if let Some(err) = resp.get("error").filter(|err| !err.is_null()) {
            return Err(Error::Protocol(err.clone()));
        }

        Ok(resp["result"].take())
    }

    /// Send every call of `batch` in a single JSON array and wait for all the results
    ///
    /// The results are returned in the order the calls were added to the batch, whatever the
    /// order the server answered in. An error in any of the answers fails the whole batch.
    pub async fn batch_call(
        &mut self,
        batch: &Batch,
        timeout: Duration,
    ) -> Result<Vec<Value>, Error> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let first_id = self.next_ids(batch.len());
        let requests = batch
            .into_iter()
            .enumerate()
            .map(|(i, (method, params))| Request::new_id(first_id.wrapping_add(i), method, params))
            .collect::<Vec<_>>();
        let mut raw = serde_json::to_vec(&requests)?;
        raw.push(b'\n');

        let method = format!("batch of {}", batch.len());
        let start = Instant::now();
        let resp = self.round_trip(raw, &method, timeout).await?;
        debug!("{} took {:?}", method, start.elapsed());

        let answers = match resp {
            Value::Array(answers) => answers,
            // some servers answer a whole batch with a single error object
            resp => {
                if let Some(err) = resp.get("error").filter(|err| !err.is_null()) {
                    return Err(Error::Protocol(err.clone()));
                }
                return Err(Error::InvalidResponse(resp));
            }
        };

        let mut results = BTreeMap::new();
        for mut answer in answers {
            if let Some(err) = answer.get("error").filter(|err| !err.is_null()) {
                return Err(Error::Protocol(err.clone()));
            }

            let pos = match answer.get("id").and_then(Value::as_u64) {
                Some(id) => (id as usize).wrapping_sub(first_id),
                None => return Err(Error::InvalidResponse(answer)),
            };
            if pos >= requests.len() {
                debug!("ignoring answer with unknown id: {}", answer);
                continue;
            }

            results.insert(pos, answer["result"].take());
        }

        (0..requests.len())
            .map(|pos| results.remove(&pos).ok_or(Error::MissingBatchResponse(pos)))
            .collect()
    }

    async fn round_trip(
        &mut self,
        raw: Vec<u8>,
        method: &str,
        timeout: Duration,
    ) -> Result<Value, Error> {
        if self.in_flight {
            warn!("previous call was interrupted, dropping the connection");
            self.disconnect();
        }
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        trace!("==> {}", String::from_utf8_lossy(&raw));

        self.in_flight = true;
        let exchange = send_recv(stream, &raw);

        let resp = if timeout.is_zero() {
            exchange.await
        } else {
            match tokio::time::timeout_at(Instant::now() + timeout, exchange).await {
                Ok(resp) => resp,
                // the response may still arrive, `in_flight` stays set
                Err(_) => {
                    return Err(Error::CallTimeout {
                        method: method.to_string(),
                        timeout,
                    })
                }
            }
        };
        self.in_flight = false;

        resp
    }

    async fn batch_into<T: DeserializeOwned>(
        &mut self,
        batch: &Batch,
        timeout: Duration,
    ) -> Result<Vec<T>, Error> {
        let resp = self.batch_call(batch, timeout).await?;
        let mut answer = Vec::with_capacity(resp.len());

        for x in resp {
            answer.push(serde_json::from_value(x)?);
        }

        Ok(answer)
    }

    pub async fn server_version(&mut self) -> Result<ServerVersionRes, Error> {
        let result = self
            .call("server.version", &[], self.config.call_timeout())
            .await?;

        ServerVersionRes::from_value(result)
    }

    pub async fn server_features(&mut self) -> Result<ServerFeaturesRes, Error> {
        let result = self
            .call("server.features", &[], self.config.call_timeout())
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    /// TLS endpoints of the peers known to the server
    pub async fn server_peers(&mut self) -> Result<Vec<String>, Error> {
        let result = self
            .call("server.peers.subscribe", &[], self.config.call_timeout())
            .await?;
        let peers: Vec<PeerRes> = serde_json::from_value(result)?;

        Ok(peers.iter().filter_map(PeerRes::tls_endpoint).collect())
    }

    pub async fn list_unspent(
        &mut self,
        script_hash: &ScriptHash,
    ) -> Result<Vec<ListUnspentRes>, Error> {
        let params = [Param::from(*script_hash)];
        let result = self
            .call(LIST_UNSPENT, &params, self.config.call_timeout())
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    /// Unspent outputs of every script, in the same order as `script_hashes`
    pub async fn list_unspent_batch(
        &mut self,
        script_hashes: &[ScriptHash],
    ) -> Result<Vec<Vec<ListUnspentRes>>, Error> {
        let mut batch = Batch::default();
        for script_hash in script_hashes {
            batch.script_list_unspent(script_hash);
        }

        // large batches take a while to be answered
        self.batch_into(&batch, self.config.call_timeout() * 2)
            .await
    }

    pub async fn transaction_get(&mut self, txid: &Txid) -> Result<Transaction, Error> {
        let params = [Param::String(txid.to_string())];
        let result = self
            .call(TRANSACTION_GET, &params, self.config.call_timeout())
            .await?;

        let hex = result
            .as_str()
            .ok_or_else(|| Error::InvalidResponse(result.clone()))?;
        Ok(deserialize_hex(hex)?)
    }

    pub async fn transaction_broadcast(&mut self, tx: &Transaction) -> Result<Txid, Error> {
        let params = [Param::String(serialize_hex(tx))];
        let result = self
            .call(
                "blockchain.transaction.broadcast",
                &params,
                self.config.call_timeout(),
            )
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    pub async fn block_headers_subscribe(&mut self) -> Result<HeaderNotification, Error> {
        let result = self
            .call("blockchain.headers.subscribe", &[], self.config.call_timeout())
            .await?;
        let raw: RawHeaderNotification = serde_json::from_value(result)?;

        HeaderNotification::try_from(raw)
    }
}

async fn send_recv(stream: &mut BufReader<ElectrumStream>, raw: &[u8]) -> Result<Value, Error> {
    stream.write_all(raw).await?;
    stream.flush().await?;

    recv(stream).await
}

/// Read the next response, skipping the notifications pushed by the server
async fn recv(stream: &mut BufReader<ElectrumStream>) -> Result<Value, Error> {
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by the server",
            )
            .into());
        }

        trace!("<== {}", line.trim_end());

        let resp: Value = serde_json::from_str(&line)?;
        let is_notification = resp.get("method").is_some()
            && resp.get("id").map_or(true, Value::is_null);
        if is_notification {
            debug!("skipping notification for `{}`", resp["method"]);
            continue;
        }

        return Ok(resp);
    }
}

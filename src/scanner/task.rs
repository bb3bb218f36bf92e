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

//! Scan of a single batch
//!
//! A [`ScanTask`] keeps trying to look up its batch until it succeeds, it's cancelled, or its
//! deadline passes. Every failed attempt drops the connection, so the next attempt connects to
//! the next server of the rotation. There is no delay between attempts. Errors that aren't
//! [transient](Error::is_transient) end the task right away.

use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use bitcoin::{Amount, Network, ScriptBuf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::address::ScanAddress;
use crate::electrum::{Client, ScriptHash, ServerProvider};
use crate::error::Error;
use crate::types::Utxo;

/// How a task ended
#[derive(Debug)]
pub enum Outcome<A> {
    /// Every address was looked up
    Success(Vec<Utxo<A>>),
    /// The scan was cancelled before the batch could be looked up
    Cancelled,
    /// The batch couldn't be looked up, the scan can't be completed
    Failed(Error),
}

#[derive(Debug)]
pub struct ScanTaskResult<A> {
    /// Number of addresses scanned by the task
    pub scanned: usize,
    pub outcome: Outcome<A>,
}

pub struct ScanTask<A> {
    addresses: Vec<A>,
    network: Network,
    servers: Arc<ServerProvider>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<A: ScanAddress> ScanTask<A> {
    pub fn new(
        addresses: Vec<A>,
        network: Network,
        servers: Arc<ServerProvider>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        ScanTask {
            addresses,
            network,
            servers,
            timeout,
            cancel,
        }
    }

    /// Look up the batch using `client`, retrying until the task's deadline
    pub async fn execute(self, client: &mut Client) -> ScanTaskResult<A> {
        let deadline = Instant::now() + self.timeout;

        let scripts = match self
            .addresses
            .iter()
            .map(|address| address.script_pubkey(self.network))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(scripts) => scripts,
            Err(e) => return self.result(Outcome::Failed(e)),
        };
        let script_hashes = scripts.iter().map(|s| ScriptHash::new(s)).collect::<Vec<_>>();

        let mut attempt = 0;
        let mut last_error: Option<Error> = None;
        loop {
            attempt += 1;

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(
                        "batch cancelled after {} attempt(s), last error: {:?}",
                        attempt,
                        last_error.as_ref().map(ToString::to_string)
                    );
                    client.disconnect();

                    return self.result(Outcome::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("batch timed out after {} attempt(s)", attempt);
                    client.disconnect();

                    return self.result(Outcome::Failed(Error::TaskTimedOut {
                        timeout: self.timeout,
                        last_error: last_error.map(Box::new),
                    }));
                }
                res = self.try_execute(client, &scripts, &script_hashes) => match res {
                    Ok(utxos) => return self.result(Outcome::Success(utxos)),
                    Err(e) if !e.is_transient() => {
                        error!("attempt {} failed, giving up: {}", attempt, e);
                        client.disconnect();

                        return self.result(Outcome::Failed(e));
                    }
                    Err(e) => {
                        debug!(
                            "attempt {} on {} failed: {}",
                            attempt,
                            client.endpoint().unwrap_or("<not connected>"),
                            e
                        );
                        client.disconnect();
                        last_error = Some(e);
                    }
                },
            }

            // an attempt can fail without ever awaiting, let the deadline fire
            tokio::task::yield_now().await;
        }
    }

    async fn try_execute(
        &self,
        client: &mut Client,
        scripts: &[ScriptBuf],
        script_hashes: &[ScriptHash],
    ) -> Result<Vec<Utxo<A>>, Error> {
        if !client.is_connected() {
            client.connect(self.servers.next_server()).await?;
        }

        let groups = if client.supports_batching() {
            client.list_unspent_batch(script_hashes).await?
        } else {
            let mut groups = Vec::with_capacity(script_hashes.len());
            for script_hash in script_hashes {
                groups.push(client.list_unspent(script_hash).await?);
            }
            groups
        };
        if groups.len() != self.addresses.len() {
            return Err(Error::InvalidResponse(serde_json::Value::from(groups.len())));
        }

        // the n-th group belongs to the n-th address
        let utxos = groups
            .into_iter()
            .zip(self.addresses.iter().zip(scripts))
            .flat_map(|(group, (address, script))| {
                group.into_iter().map(move |res| Utxo {
                    txid: res.tx_hash,
                    output_index: res.tx_pos,
                    amount: Amount::from_sat(res.value),
                    height: res.height,
                    address: address.clone(),
                    script: script.clone(),
                })
            })
            .collect();

        Ok(utxos)
    }

    fn result(&self, outcome: Outcome<A>) -> ScanTaskResult<A> {
        let scanned = match outcome {
            Outcome::Success(_) => self.addresses.len(),
            _ => 0,
        };

        ScanTaskResult { scanned, outcome }
    }
}

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

//! Scanner
//!
//! The [`Scanner`] looks up every address of a stream and reports the unspent outputs it finds
//! as it goes. Addresses are grouped in batches, and each batch is looked up by its own task
//! using a client of the [`Pool`]: the pool size bounds the number of batches in flight.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use recovery_scanner::*;
//! # use recovery_scanner::bitcoin::Network;
//! # async fn scan() -> Result<(), Error> {
//! let pool = Pool::new(ElectrumConfig::default())?;
//! let servers = Arc::new(ServerProvider::public());
//! let scanner = Scanner::new(pool, servers, Network::Bitcoin, ScannerConfig::default())?;
//!
//! let addresses = AddressGenerator::new(Network::Bitcoin, 1000)?
//!     .with_descriptor(3, "wpkh(xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8/0/*)")?;
//!
//! let mut reports = scanner.scan(addresses.into_stream());
//! while let Some(report) = reports.recv().await {
//!     if let Some(err) = &report.error {
//!         println!("scan failed: {}", err);
//!         break;
//!     }
//!     println!("{} addresses scanned, {}", report.scanned_addresses, report.total_amount());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use bitcoin::Network;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::address::ScanAddress;
use crate::config::ScannerConfig;
use crate::electrum::{Pool, ServerProvider};
use crate::error::Error;
use crate::types::Report;

pub mod batcher;
pub mod task;

use batcher::Batcher;
use task::{Outcome, ScanTask, ScanTaskResult};

pub struct Scanner {
    pool: Arc<Pool>,
    servers: Arc<ServerProvider>,
    network: Network,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(
        pool: Arc<Pool>,
        servers: Arc<ServerProvider>,
        network: Network,
        config: ScannerConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        Ok(Scanner {
            pool,
            servers,
            network,
            config,
        })
    }

    /// Scan `addresses`, returning the stream of reports
    ///
    /// Every report includes the progress of the previous ones. The stream ends after the last
    /// address is scanned, or after a report carrying an error. Reports are only produced as
    /// fast as they are read: a caller that stops reading stalls the scan, and dropping the
    /// receiver cancels it.
    ///
    /// Must be called within a tokio runtime.
    pub fn scan<A, S>(&self, addresses: S) -> mpsc::Receiver<Report<A>>
    where
        A: ScanAddress,
        S: Stream<Item = A> + Send + 'static,
    {
        self.scan_with_cancel(addresses, CancellationToken::new())
    }

    /// Same as [`scan`](Scanner::scan), `cancel` can be used to stop the scan
    ///
    /// A cancelled scan ends with a report carrying [`Error::Cancelled`].
    pub fn scan_with_cancel<A, S>(
        &self,
        addresses: S,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Report<A>>
    where
        A: ScanAddress,
        S: Stream<Item = A> + Send + 'static,
    {
        info!(
            "Starting scan, batch size {}, {} connections",
            self.config.batch_size,
            self.pool.size()
        );

        let (reports_tx, reports_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = mpsc::channel(1);
        // cancelled by the caller, or by the collector on a fatal error
        let stop_scan = cancel.child_token();

        tokio::spawn(dispatch(
            Batcher::new(addresses, self.config.batch_size),
            Dispatcher {
                pool: Arc::clone(&self.pool),
                servers: Arc::clone(&self.servers),
                network: self.network,
                task_timeout: self.config.task_timeout(),
                stop_scan: stop_scan.clone(),
            },
            results_tx,
        ));
        tokio::spawn(collect(results_rx, reports_tx, stop_scan, cancel));

        reports_rx
    }
}

struct Dispatcher {
    pool: Arc<Pool>,
    servers: Arc<ServerProvider>,
    network: Network,
    task_timeout: Duration,
    stop_scan: CancellationToken,
}

/// Start a task for every batch, as soon as a client is available for it
///
/// `results` is closed once this returns and every task it started has finished.
async fn dispatch<A: ScanAddress>(
    mut batches: Batcher<A>,
    dispatcher: Dispatcher,
    results: mpsc::Sender<ScanTaskResult<A>>,
) {
    let Dispatcher {
        pool,
        servers,
        network,
        task_timeout,
        stop_scan,
    } = dispatcher;

    let mut dispatched = 0;
    loop {
        let batch = tokio::select! {
            biased;

            _ = stop_scan.cancelled() => break,
            batch = batches.next() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        let mut client = tokio::select! {
            biased;

            _ = stop_scan.cancelled() => break,
            client = pool.acquire() => match client {
                Ok(client) => client,
                Err(e) => {
                    error!("Can't get a client: {}", e);
                    let _ = results
                        .send(ScanTaskResult {
                            scanned: 0,
                            outcome: Outcome::Failed(e),
                        })
                        .await;
                    break;
                }
            },
        };

        dispatched += 1;
        trace!("dispatching batch {} of {} addresses", dispatched, batch.len());

        let task = ScanTask::new(
            batch,
            network,
            Arc::clone(&servers),
            task_timeout,
            stop_scan.clone(),
        );
        let results = results.clone();
        tokio::spawn(async move {
            let result = task.execute(&mut client).await;
            if !matches!(result.outcome, Outcome::Cancelled) {
                // the collector is gone after a fatal error
                let _ = results.send(result).await;
            }

            // only now, so that a stalled collector also stalls dispatching
            client.release();
        });
    }

    debug!("dispatched {} batches", dispatched);
}

/// Aggregate the task results into reports
async fn collect<A: ScanAddress>(
    mut results: mpsc::Receiver<ScanTaskResult<A>>,
    reports: mpsc::Sender<Report<A>>,
    stop_scan: CancellationToken,
    cancel: CancellationToken,
) {
    let mut report = Report::default();

    loop {
        let result = tokio::select! {
            biased;

            _ = reports.closed() => {
                info!("Report receiver dropped, cancelling scan");
                stop_scan.cancel();
                return;
            }
            result = results.recv() => result,
        };

        match result {
            Some(ScanTaskResult {
                scanned,
                outcome: Outcome::Success(utxos),
            }) => {
                report = report.extend(scanned, &utxos);
                info!(
                    "scanned {}, found {}",
                    report.scanned_addresses,
                    report.utxos_found.len()
                );

                if reports.send(report.clone()).await.is_err() {
                    info!("Report receiver dropped, cancelling scan");
                    stop_scan.cancel();
                    return;
                }
            }
            Some(ScanTaskResult {
                outcome: Outcome::Failed(e),
                ..
            }) => {
                error!("Scan failed: {}", e);
                stop_scan.cancel();
                let _ = reports.send(report.fail(e)).await;
                return;
            }
            Some(ScanTaskResult {
                outcome: Outcome::Cancelled,
                ..
            }) => {}
            None if cancel.is_cancelled() => {
                info!(
                    "Scan cancelled after {} addresses",
                    report.scanned_addresses
                );
                let _ = reports.send(report.fail(Error::Cancelled)).await;
                return;
            }
            None => {
                info!(
                    "Scan complete: {} addresses scanned, {} outputs found",
                    report.scanned_addresses,
                    report.utxos_found.len()
                );
                return;
            }
        }
    }
}

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

// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A library to find the unspent outputs of a wallet using public Electrum servers.
//!
//! Recovering funds often means looking up tens of thousands of candidate addresses, using
//! servers that can disappear, stall or misbehave at any time. This library takes a stream of
//! addresses and returns a live stream of [`Report`]s, retrying failed lookups against other
//! servers until a per-batch deadline.
//!
//! The building blocks are:
//!
//! * [`AddressGenerator`] derives the addresses of a wallet from its ranged descriptors. Any type
//!   implementing [`ScanAddress`] can be scanned
//! * [`ServerProvider`] hands out server endpoints in rotation
//! * [`Pool`] owns a fixed number of Electrum [`Client`]s, which bounds the number of concurrent
//!   connections
//! * [`Scanner`] batches the addresses, looks each batch up with a pooled client and aggregates
//!   the results
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use recovery_scanner::bitcoin::Network;
//! use recovery_scanner::{
//!     AddressGenerator, ElectrumConfig, Pool, Scanner, ScannerConfig, ServerProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), recovery_scanner::Error> {
//!     let pool = Pool::new(ElectrumConfig::default())?;
//!     let scanner = Scanner::new(
//!         pool,
//!         Arc::new(ServerProvider::public()),
//!         Network::Testnet,
//!         ScannerConfig::default(),
//!     )?;
//!
//!     let addresses = AddressGenerator::new(Network::Testnet, 5000)?
//!         .with_descriptor(3, "wpkh(tpubD6NzVbkrYhZ4Xferm7Pz4VnjdcDPFyjVu5K4iZXQ4pVN8Cks4pHVowTBXBKRhX64pkRyJZJN5xAKj4UDNnLPb5p2sSKXhewoYx5GbTdUFWq/0/*)")?;
//!
//!     let mut reports = scanner.scan(addresses.into_stream());
//!     let mut last = None;
//!     while let Some(report) = reports.recv().await {
//!         last = Some(report);
//!     }
//!
//!     if let Some(report) = last {
//!         println!("found {} in {} outputs", report.total_amount(), report.utxos_found.len());
//!     }
//!     Ok(())
//! }
//! ```

pub extern crate bitcoin;
extern crate log;
pub extern crate miniscript;
extern crate serde;
extern crate serde_json;

#[macro_use]
pub(crate) mod error;
pub mod address;
pub mod config;
pub mod electrum;
pub mod scanner;
pub(crate) mod types;

pub use address::{AddressGenerator, ScanAddress, WalletAddress};
pub use config::{ElectrumConfig, ScannerConfig};
pub use electrum::{Client, Pool, PooledClient, ServerProvider};
pub use error::Error;
pub use scanner::Scanner;
pub use types::*;

pub use tokio_util::sync::CancellationToken;

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

use std::sync::Arc;

use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};

use crate::error::Error;

/// An unspent output found while scanning, with the address and script it pays to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo<A> {
    /// Transaction that created the output
    pub txid: Txid,
    /// Position of the output in the transaction
    pub output_index: u32,
    /// Value of the output
    pub amount: Amount,
    /// Confirmation height reported by the server, `0` when unconfirmed
    pub height: u32,
    /// Address the output was found for
    pub address: A,
    /// Script of `address`
    pub script: ScriptBuf,
}

impl<A> Utxo<A> {
    /// Outpoint of this output
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.output_index)
    }
}

/// Cumulative state of a scan at a point in time
///
/// A new `Report` is built for every batch result: reports already handed out are never
/// modified. The last report of a scan either carries an error, or is followed by the end of the
/// report stream.
#[derive(Debug, Clone)]
pub struct Report<A> {
    /// Number of addresses scanned so far
    pub scanned_addresses: usize,
    /// Every unspent output found so far
    pub utxos_found: Vec<Utxo<A>>,
    /// Fatal error that ended the scan
    pub error: Option<Arc<Error>>,
}

impl<A> Default for Report<A> {
    fn default() -> Self {
        Report {
            scanned_addresses: 0,
            utxos_found: Vec::new(),
            error: None,
        }
    }
}

impl<A: Clone> Report<A> {
    /// Build the report that follows `self` once `scanned` more addresses have been scanned,
    /// finding `utxos`
    pub fn extend(&self, scanned: usize, utxos: &[Utxo<A>]) -> Self {
        let mut utxos_found = Vec::with_capacity(self.utxos_found.len() + utxos.len());
        utxos_found.extend_from_slice(&self.utxos_found);
        utxos_found.extend_from_slice(utxos);

        Report {
            scanned_addresses: self.scanned_addresses + scanned,
            utxos_found,
            error: None,
        }
    }

    /// Build the terminal report that follows `self`, carrying `error`
    pub fn fail(&self, error: Error) -> Self {
        Report {
            scanned_addresses: self.scanned_addresses,
            utxos_found: self.utxos_found.clone(),
            error: Some(Arc::new(error)),
        }
    }
}

impl<A> Report<A> {
    /// Whether this report ends the scan with an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Sum of the values of all the outputs found so far
    pub fn total_amount(&self) -> Amount {
        self.utxos_found
            .iter()
            .fold(Amount::ZERO, |acc, utxo| acc + utxo.amount)
    }
}

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

//! Addresses to scan
//!
//! The scanner accepts any type implementing [`ScanAddress`]. [`AddressGenerator`] derives the
//! addresses of a wallet from its ranged descriptors:
//!
//! ```
//! # use recovery_scanner::address::AddressGenerator;
//! # use recovery_scanner::bitcoin::Network;
//! let generator = AddressGenerator::new(Network::Testnet, 100)?
//!     .with_descriptor(3, "wpkh(tpubD6NzVbkrYhZ4Xferm7Pz4VnjdcDPFyjVu5K4iZXQ4pVN8Cks4pHVowTBXBKRhX64pkRyJZJN5xAKj4UDNnLPb5p2sSKXhewoYx5GbTdUFWq/0/*)")?;
//! assert_eq!(generator.len(), 100);
//! # Ok::<(), recovery_scanner::Error>(())
//! ```

use std::fmt;
use std::str::FromStr;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use bitcoin::{Address, Network, ScriptBuf};
use futures::Stream;
use miniscript::descriptor::{Descriptor, DescriptorPublicKey};
use miniscript::ForEachKey;

use crate::error::Error;

/// An address the scanner can look up
pub trait ScanAddress: fmt::Display + Clone + Send + Sync + 'static {
    /// Output script paid by this address on `network`
    fn script_pubkey(&self, network: Network) -> Result<ScriptBuf, Error>;
}

impl ScanAddress for Address {
    fn script_pubkey(&self, _network: Network) -> Result<ScriptBuf, Error> {
        Ok(Address::script_pubkey(self))
    }
}

/// Address of a wallet, with the information needed to spend from it later
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletAddress {
    /// Version of the wallet scheme the address belongs to
    pub version: u32,
    /// Derivation path of the key(s) of the address
    pub derivation_path: String,
    /// The address, as shown to users
    pub address: String,
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl ScanAddress for WalletAddress {
    fn script_pubkey(&self, network: Network) -> Result<ScriptBuf, Error> {
        let address = Address::from_str(&self.address)?.require_network(network)?;
        Ok(address.script_pubkey())
    }
}

/// Derives the first `count` addresses of one or more ranged descriptors
#[derive(Debug, Clone)]
pub struct AddressGenerator {
    network: Network,
    count: u32,
    descriptors: Vec<(u32, Descriptor<DescriptorPublicKey>)>,
}

impl AddressGenerator {
    /// Generate addresses at indexes `0..count`, for `network`
    pub fn new(network: Network, count: u32) -> Result<Self, Error> {
        // hardened indexes can't be derived from public keys
        if count == 0 || count > (1 << 31) {
            return Err(Error::InvalidAddressCount(count));
        }

        Ok(AddressGenerator {
            network,
            count,
            descriptors: Vec::new(),
        })
    }

    /// Add a ranged descriptor, its addresses are tagged with `version`
    pub fn with_descriptor(mut self, version: u32, descriptor: &str) -> Result<Self, Error> {
        let parsed = Descriptor::<DescriptorPublicKey>::from_str(descriptor)?;
        if !parsed.has_wildcard() {
            return Err(Error::MissingWildcard(descriptor.to_string()));
        }

        // fail now rather than halfway through a scan
        derive(&parsed, version, 0, self.network)?;
        derive(&parsed, version, self.count - 1, self.network)?;

        self.descriptors.push((version, parsed));
        Ok(self)
    }

    /// Number of addresses generated
    pub fn len(&self) -> usize {
        self.count as usize * self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Addresses in index order, every descriptor at an index before the next index
    pub fn iter(&self) -> impl Iterator<Item = Result<WalletAddress, Error>> + '_ {
        (0..self.count).flat_map(move |index| {
            self.descriptors
                .iter()
                .map(move |(version, descriptor)| derive(descriptor, *version, index, self.network))
        })
    }

    /// Stream of the generated addresses, ready to be scanned
    ///
    /// Addresses that can't be derived are logged and skipped.
    pub fn into_stream(self) -> impl Stream<Item = WalletAddress> + Send + 'static {
        let AddressGenerator {
            network,
            count,
            descriptors,
        } = self;

        let addresses = (0..count).flat_map(move |index| {
            descriptors
                .iter()
                .filter_map(
                    |(version, descriptor)| match derive(descriptor, *version, index, network) {
                        Ok(address) => Some(address),
                        Err(e) => {
                            error!("Skipping index {} of {}: {}", index, descriptor, e);
                            None
                        }
                    },
                )
                .collect::<Vec<_>>()
        });

        futures::stream::iter(addresses)
    }
}

fn derive(
    descriptor: &Descriptor<DescriptorPublicKey>,
    version: u32,
    index: u32,
    network: Network,
) -> Result<WalletAddress, Error> {
    let derived = descriptor.at_derivation_index(index)?;
    let address = derived.address(network)?;

    let mut derivation_path = None;
    derived.for_each_key(|key| {
        derivation_path = key.full_derivation_path();
        false
    });

    Ok(WalletAddress {
        version,
        derivation_path: derivation_path
            .map(|path| path.to_string())
            .unwrap_or_else(|| index.to_string()),
        address: address.to_string(),
    })
}

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

//! Server rotation

use std::sync::atomic::{AtomicUsize, Ordering};

use super::stream::split_endpoint;
use crate::config::ElectrumConfig;
use crate::error::Error;

/// Rotating list of server endpoints
///
/// Every call to [`next_server`](ServerProvider::next_server) returns the endpoint after the one
/// returned by the previous call, wrapping around at the end of the list. The provider is shared
/// by every scan task, the rotation only relies on an atomic counter.
#[derive(Debug)]
pub struct ServerProvider {
    next_index: AtomicUsize,
    servers: Vec<String>,
}

impl ServerProvider {
    /// Create a provider rotating over `servers`, starting from the first one
    ///
    /// Every endpoint must be in `host:port` form.
    pub fn new<I, S>(servers: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let servers = servers.into_iter().map(Into::into).collect::<Vec<_>>();
        if servers.is_empty() {
            return Err(Error::EmptyServerList);
        }
        for server in &servers {
            split_endpoint(server)?;
        }

        Ok(ServerProvider {
            next_index: AtomicUsize::new(0),
            servers,
        })
    }

    /// Create a provider rotating over the servers of `config`
    pub fn from_config(config: &ElectrumConfig) -> Result<Self, Error> {
        ServerProvider::new(config.servers.iter().cloned())
    }

    #[cfg(test)]
    pub(crate) fn new_unchecked(servers: Vec<&str>) -> Self {
        ServerProvider {
            next_index: AtomicUsize::new(0),
            servers: servers.into_iter().map(String::from).collect(),
        }
    }

    /// Create a provider rotating over [`PUBLIC_SERVERS`]
    pub fn public() -> Self {
        ServerProvider {
            next_index: AtomicUsize::new(0),
            servers: PUBLIC_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Next endpoint of the rotation
    pub fn next_server(&self) -> &str {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        &self.servers[index % self.servers.len()]
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }
}

/// Public TLS servers, excluding onion addresses
///
/// Servers known to answer batched calls quickly come first.
pub const PUBLIC_SERVERS: &[&str] = &[
    "electrum.coinext.com.br:50002",
    "fulcrum.sethforprivacy.com:50002",
    "mainnet.foundationdevices.com:50002",
    "btc.lastingcoin.net:50002",
    "vmd71287.contaboserver.net:50002",
    "de.poiuty.com:50002",
    "electrum.jochen-hoenicke.de:50006",
    "btc.cr.ypto.tech:50002",
    "e.keff.org:50002",
    "vmd104014.contaboserver.net:50002",
    "e2.keff.org:50002",
    "fulcrum.grey.pw:51002",
    "fortress.qtornado.com:443",
    "f.keff.org:50002",
    "2ex.digitaleveryware.com:50002",
    "electrum.petrkr.net:50002",
    "electrum.stippy.com:50002",
    "electrum0.snel.it:50002",
    "ru.poiuty.com:50002",
    "electrum.privateservers.network:50002",
    "btc.electroncash.dk:60002",
    "bitcoin.aranguren.org:50002",
    "electrum.bitcoinserver.nl:50514",
    "btc.prompt.cash:61002",
    "fulc.bot.nu:50002",
    "bolt.schulzemic.net:50002",
    "node1.btccuracao.com:50002",
    "xtrum.com:50002",
    "electrum.bitaroo.net:50002",
    "btce.iiiiiii.biz:50002",
    "electrum.emzy.de:50002",
    "alviss.coinjoined.com:50002",
    "2AZZARITA.hopto.org:50002",
    "vmd104012.contaboserver.net:50002",
    "electrum.bitcoinlizard.net:50002",
    "btc.ocf.sh:50002",
    "bitcoins.sk:56002",
    "electrum-btc.leblancnet.us:50002",
    "helicarrier.bauerj.eu:50002",
    "electrum.neocrypto.io:50002",
    "caleb.vegas:50002",
    "smmalis37.ddns.net:50002",
    "2azzarita.hopto.org:50002",
    "electrum.kendigisland.xyz:50002",
    "electrum.hsmiths.com:50002",
    "vmd63185.contaboserver.net:50002",
    "blkhub.net:50002",
    "electrum.mmitech.info:50002",
    "elx.bitske.com:50002",
    "bitcoin.lu.ke:50002",
    "ex05.axalgo.com:50002",
    "walle.dedyn.io:50002",
    "eai.coincited.net:50002",
    "2electrumx.hopto.me:56022",
    "hodlers.beer:50002",
    "kareoke.qoppa.org:50002",
    "ASSUREDLY.not.fyi:50002",
    "electrumx.alexridevski.net:50002",
    "assuredly.not.fyi:50002",
    "ragtor.duckdns.org:50002",
    "surely.not.fyi:50002",
    "btc.electrum.bitbitnet.net:50002",
    "gods-of-rock.screaminglemur.net:50002",
    "SURELY.not.fyi:50002",
    "horsey.cryptocowboys.net:50002",
    "electrumx-btc.cryptonermal.net:50002",
    "electrum.coineuskal.com:50002",
];

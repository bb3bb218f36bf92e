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

//! Connection pool
//!
//! The pool owns a fixed number of [`Client`]s, created disconnected. A client is handed out
//! exclusively by [`Pool::acquire`] and goes back to the pool when the [`PooledClient`] is
//! released or dropped, whatever the exit path of its user. The pool size is the only bound on
//! the number of concurrent connections of a scan.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use rustls::ClientConfig;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::client::Client;
use super::stream::tls_config;
use crate::config::ElectrumConfig;
use crate::error::Error;

pub struct Pool {
    config: Arc<ElectrumConfig>,
    tls: Arc<ClientConfig>,

    clients: Mutex<Vec<Client>>,
    available: Arc<Semaphore>,
    size: usize,
}

impl Pool {
    /// Create a pool of `config.pool_size` disconnected clients
    pub fn new(config: ElectrumConfig) -> Result<Arc<Self>, Error> {
        config.validate()?;

        let tls = tls_config(config.validate_domain)?;
        let config = Arc::new(config);
        let size = config.pool_size;
        let clients = (0..size)
            .map(|_| Client::new(Arc::clone(&config), Arc::clone(&tls)))
            .collect();

        Ok(Arc::new(Pool {
            config,
            tls,
            clients: Mutex::new(clients),
            available: Arc::new(Semaphore::new(size)),
            size,
        }))
    }

    /// Wait until a client is available and take it
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledClient, Error> {
        let permit = Arc::clone(&self.available)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        // there are as many permits as clients, a permit guarantees an idle client
        let client = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(Error::PoolClosed)?;
        trace!("client acquired, {} left", self.idle());

        Ok(PooledClient {
            client,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Make every pending and future [`acquire`](Pool::acquire) fail with
    /// [`Error::PoolClosed`]
    pub fn close(&self) {
        self.available.close();
    }

    /// Number of clients of the pool
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of clients not currently acquired
    pub fn idle(&self) -> usize {
        self.available.available_permits()
    }

    pub fn config(&self) -> &ElectrumConfig {
        &self.config
    }

    fn put_back(&self, mut client: Client) {
        if client.is_interrupted() {
            debug!("client released in the middle of a call, dropping its connection");
            client.disconnect();
        }

        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }
}

/// A client checked out of a [`Pool`]
///
/// The client goes back to the pool when this is dropped.
pub struct PooledClient {
    client: Client,
    pool: Arc<Pool>,
    // released after the client is back in the pool
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    /// Give the client back to the pool
    pub fn release(self) {}
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let blank = Client::new(Arc::clone(&self.pool.config), Arc::clone(&self.pool.tls));
        let client = std::mem::replace(&mut self.client, blank);
        self.pool.put_back(client);
    }
}

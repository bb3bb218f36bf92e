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

//! Electrum
//!
//! This module talks to Electrum servers: the wire [`Client`], the [`Pool`] that bounds how
//! many of them are connected at once, and the [`ServerProvider`] they pick servers from.

pub mod batch;
pub mod client;
pub mod pool;
pub mod servers;
pub mod stream;
pub mod types;

pub use batch::Batch;
pub use client::Client;
pub use pool::{Pool, PooledClient};
pub use servers::{ServerProvider, PUBLIC_SERVERS};
pub use types::{ListUnspentRes, ScriptHash};

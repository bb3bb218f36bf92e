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

//! Batched calls
//!
//! A [`Batch`] collects calls that are sent to the server as a single JSON array, in one round
//! trip. The answers are returned in the order the calls were added.

use super::types::{Param, ScriptHash};

pub(crate) const LIST_UNSPENT: &str = "blockchain.scripthash.listunspent";
pub(crate) const TRANSACTION_GET: &str = "blockchain.transaction.get";

#[derive(Debug, Clone, Default)]
pub struct Batch {
    calls: Vec<(String, Vec<Param>)>,
}

impl Batch {
    /// Add a raw call
    pub fn raw(&mut self, method: impl Into<String>, params: Vec<Param>) {
        self.calls.push((method.into(), params));
    }

    pub fn script_list_unspent(&mut self, script_hash: &ScriptHash) {
        self.raw(LIST_UNSPENT, vec![Param::from(*script_hash)]);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a (String, Vec<Param>);
    type IntoIter = std::slice::Iter<'a, (String, Vec<Param>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.calls.iter()
    }
}

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

use std::fmt;
use std::time::Duration;

/// Errors that can be thrown while scanning an address space
#[derive(Debug)]
pub enum Error {
    /// I/O error on the connection (dial, read, write)
    Io(std::io::Error),
    /// TLS configuration error
    Tls(rustls::Error),
    /// Server endpoint is not in `host:port` form
    InvalidEndpoint(String),
    /// Host part of the endpoint is not a valid TLS server name
    InvalidDnsName(String),
    /// A call was attempted on a disconnected client
    NotConnected,
    /// The server didn't answer a call before its deadline
    CallTimeout {
        /// Method of the call that timed out
        method: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// Error serializing or deserializing JSON data
    Json(serde_json::Error),
    /// The server answered with a JSON-RPC error object
    Protocol(serde_json::Value),
    /// The server answered with something we can't make sense of
    InvalidResponse(serde_json::Value),
    /// The response id doesn't match the request id
    UnexpectedResponseId {
        /// Id of the request
        expected: usize,
        /// Id found in the response
        found: Option<u64>,
    },
    /// A batched call came back without an answer for one of its requests
    MissingBatchResponse(usize),
    /// Hex encoded transaction or header couldn't be decoded
    TxHex(bitcoin::consensus::encode::FromHexError),

    /// Address string couldn't be parsed or belongs to another network
    Address(bitcoin::address::ParseError),
    /// Miniscript error
    Miniscript(miniscript::Error),
    /// Descriptor couldn't be derived at an index
    Conversion(miniscript::descriptor::ConversionError),
    /// Descriptor used to generate addresses has no wildcard
    MissingWildcard(String),

    /// No Electrum servers were configured
    EmptyServerList,
    /// Connection pool must hold at least one client
    InvalidPoolSize,
    /// Batches must hold at least one address
    InvalidBatchSize,
    /// Number of addresses to generate is out of range
    InvalidAddressCount(u32),

    /// A batch couldn't be scanned before its deadline
    TaskTimedOut {
        /// Per-batch deadline
        timeout: Duration,
        /// Error of the last failed attempt, if any attempt completed
        last_error: Option<Box<Error>>,
    },
    /// The scan was cancelled before it could complete
    Cancelled,
    /// The connection pool was closed
    PoolClosed,
}

impl Error {
    /// Whether this error comes from a misbehaving server or connection, and the operation can be
    /// retried against another server. Scan tasks give up on any other error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Tls(_)
                | Error::InvalidDnsName(_)
                | Error::NotConnected
                | Error::CallTimeout { .. }
                | Error::Json(_)
                | Error::Protocol(_)
                | Error::InvalidResponse(_)
                | Error::UnexpectedResponseId { .. }
                | Error::MissingBatchResponse(_)
                | Error::TxHex(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Tls(err) => write!(f, "TLS error: {}", err),
            Self::InvalidEndpoint(endpoint) => write!(f, "Invalid server endpoint: {}", endpoint),
            Self::InvalidDnsName(host) => write!(f, "Invalid DNS name: {}", host),
            Self::NotConnected => write!(f, "Client is not connected"),
            Self::CallTimeout { method, timeout } => {
                write!(f, "Call to `{}` timed out after {:?}", method, timeout)
            }
            Self::Json(err) => write!(f, "Serialize/Deserialize JSON error: {}", err),
            Self::Protocol(err) => write!(f, "Electrum server error: {}", err),
            Self::InvalidResponse(resp) => write!(f, "Invalid response: {}", resp),
            Self::UnexpectedResponseId { expected, found } => write!(
                f,
                "Unexpected response id: expected {} but found {:?}",
                expected, found
            ),
            Self::MissingBatchResponse(id) => {
                write!(f, "Batch response is missing the answer to request {}", id)
            }
            Self::TxHex(err) => write!(f, "Hex decoding error: {}", err),
            Self::Address(err) => write!(f, "Address error: {}", err),
            Self::Miniscript(err) => write!(f, "Miniscript error: {}", err),
            Self::Conversion(err) => write!(f, "Descriptor derivation error: {}", err),
            Self::MissingWildcard(desc) => write!(f, "Descriptor has no wildcard: {}", desc),
            Self::EmptyServerList => write!(f, "No Electrum servers configured"),
            Self::InvalidPoolSize => write!(f, "Connection pool size must be greater than zero"),
            Self::InvalidBatchSize => write!(f, "Batch size must be greater than zero"),
            Self::InvalidAddressCount(count) => {
                write!(f, "Invalid number of addresses to generate: {}", count)
            }
            Self::TaskTimedOut {
                timeout,
                last_error: Some(err),
            } => write!(f, "task timed out after {:?}, last error: {}", timeout, err),
            Self::TaskTimedOut {
                timeout,
                last_error: None,
            } => write!(f, "task timed out after {:?}, no attempt completed", timeout),
            Self::Cancelled => write!(f, "Scan cancelled"),
            Self::PoolClosed => write!(f, "Connection pool closed"),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_error {
    ( $from:ty, $to:ident ) => {
        impl_error!($from, $to, Error);
    };
    ( $from:ty, $to:ident, $impl_for:ty ) => {
        impl std::convert::From<$from> for $impl_for {
            fn from(err: $from) -> Self {
                <$impl_for>::$to(err)
            }
        }
    };
}

impl_error!(std::io::Error, Io);
impl_error!(rustls::Error, Tls);
impl_error!(serde_json::Error, Json);
impl_error!(bitcoin::consensus::encode::FromHexError, TxHex);
impl_error!(bitcoin::address::ParseError, Address);
impl_error!(miniscript::Error, Miniscript);
impl_error!(miniscript::descriptor::ConversionError, Conversion);

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

//! Transport of a client connection
//!
//! Connections are attempted over TLS first. Unless TLS is required, a failed handshake is
//! followed by a second attempt over plain TCP.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::Error;

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any certificate, most public servers use self-signed ones
    #[derive(Debug)]
    pub struct NoCertificateVerification(CryptoProvider);

    impl NoCertificateVerification {
        pub fn new(provider: CryptoProvider) -> Self {
            NoCertificateVerification(provider)
        }
    }

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

/// Build the TLS configuration shared by every client of a pool
pub(crate) fn tls_config(validate_domain: bool) -> Result<Arc<ClientConfig>, Error> {
    let builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?;

    let config = if validate_domain {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification::new(
                rustls::crypto::ring::default_provider(),
            )))
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Split a `host:port` endpoint
pub(crate) fn split_endpoint(endpoint: &str) -> Result<(&str, u16), Error> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidEndpoint(endpoint.to_string()))?;
    let port = port
        .parse()
        .map_err(|_| Error::InvalidEndpoint(endpoint.to_string()))?;
    if host.is_empty() {
        return Err(Error::InvalidEndpoint(endpoint.to_string()));
    }

    Ok((host, port))
}

/// Either side of the TLS fallback, or an in-memory pipe in tests
pub enum ElectrumStream {
    Tls(Box<TlsStream<TcpStream>>),
    Tcp(TcpStream),
    #[cfg(test)]
    Test(tokio::io::DuplexStream),
}

impl ElectrumStream {
    /// Open a connection to `endpoint` within `timeout`
    ///
    /// The timeout applies to each of the TLS and plain TCP attempts.
    pub async fn connect(
        endpoint: &str,
        tls: Arc<ClientConfig>,
        require_tls: bool,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let (host, port) = split_endpoint(endpoint)?;

        match with_timeout(timeout, Self::connect_tls(host, port, tls)).await {
            Ok(stream) => Ok(stream),
            Err(e) if require_tls => Err(e),
            Err(e) => {
                warn!("{}: TLS failed ({}), falling back to plain TCP", endpoint, e);
                with_timeout(timeout, async {
                    Ok(ElectrumStream::Tcp(TcpStream::connect((host, port)).await?))
                })
                .await
            }
        }
    }

    async fn connect_tls(host: &str, port: u16, tls: Arc<ClientConfig>) -> Result<Self, Error> {
        let server_name = ServerName::try_from(host)
            .map_err(|_| Error::InvalidDnsName(host.to_string()))?
            .to_owned();

        let tcp = TcpStream::connect((host, port)).await?;
        let stream = TlsConnector::from(tls).connect(server_name, tcp).await?;

        Ok(ElectrumStream::Tls(Box::new(stream)))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ElectrumStream::Tls(_))
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    if timeout.is_zero() {
        return fut.await;
    }

    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connection timed out").into()),
    }
}

impl AsyncRead for ElectrumStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ElectrumStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            ElectrumStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(test)]
            ElectrumStream::Test(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ElectrumStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ElectrumStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            ElectrumStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(test)]
            ElectrumStream::Test(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ElectrumStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            ElectrumStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(test)]
            ElectrumStream::Test(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ElectrumStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            ElectrumStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(test)]
            ElectrumStream::Test(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

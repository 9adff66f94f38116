// src/core/net/tls.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
use tracing::debug;
use x509_parser::prelude::*;

use crate::core::models::{CertificateInfo, TlsLog};

/// Signature schemes appended to the provider's list when the wider offer is
/// requested, for servers that only sign with older hashes.
const COMPAT_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::RSA_PKCS1_SHA1,
    SignatureScheme::ECDSA_SHA1_Legacy,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
];

/// Accepts whatever certificate and handshake signature the server presents.
/// A scanner records the chain; it does not judge it.
#[derive(Debug)]
struct RecordOnlyVerifier {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for RecordOnlyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    /// This list is what the ClientHello advertises as signature_algorithms.
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Builds client configurations for scan targets.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub override_sig_hash: bool,
}

impl TlsSettings {
    pub fn new(override_sig_hash: bool) -> Self {
        Self { override_sig_hash }
    }

    /// Signature schemes to advertise: the provider's own, widened with the
    /// legacy set when `override_sig_hash` is on.
    pub fn offered_schemes(&self, provider: &CryptoProvider) -> Vec<SignatureScheme> {
        let mut schemes = provider
            .signature_verification_algorithms
            .supported_schemes();
        if self.override_sig_hash {
            for scheme in COMPAT_SCHEMES {
                if !schemes.contains(scheme) {
                    schemes.push(*scheme);
                }
            }
        }
        schemes
    }

    /// The configuration used to wrap a connection to one host.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, rustls::Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let schemes = self.offered_schemes(&provider);
        debug!(schemes = schemes.len(), override_sig_hash = self.override_sig_hash, "Building TLS client config.");

        let verifier = Arc::new(RecordOnlyVerifier { schemes });
        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(rustls::ALL_VERSIONS)?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }

    pub fn server_name(host: &str) -> Result<ServerName<'static>, rustls::pki_types::InvalidDnsNameError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        ServerName::try_from(host.to_string())
    }
}

/// Summarises what a finished handshake negotiated.
pub fn tls_log(server_name: &str, conn: &ClientConnection) -> TlsLog {
    let certificate = conn
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(|leaf| certificate_info(leaf.as_ref()));

    TlsLog {
        server_name: server_name.to_string(),
        version: conn.protocol_version().map(|v| format!("{:?}", v)),
        cipher_suite: conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        certificate,
    }
}

fn certificate_info(der: &[u8]) -> Option<CertificateInfo> {
    match parse_x509_certificate(der) {
        Ok((_, x509)) => {
            let validity = x509.validity();
            let not_after = asn1_time_to_chrono_utc(&validity.not_after);
            let not_before = asn1_time_to_chrono_utc(&validity.not_before);
            Some(CertificateInfo {
                subject_name: x509.subject().to_string(),
                issuer_name: x509.issuer().to_string(),
                not_before,
                not_after,
                days_until_expiry: not_after.signed_duration_since(Utc::now()).num_days(),
            })
        }
        Err(e) => {
            debug!(error = %e, "Could not parse peer certificate.");
            None
        }
    }
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

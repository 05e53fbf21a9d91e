// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use rcgen::{CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose};
use time::{Duration, OffsetDateTime};
use tonic::transport::{Certificate, Identity};

/// How long an issued certificate stays valid. Test fixtures are short-lived,
/// so a single day is plenty.
pub const CERT_VALIDITY: Duration = Duration::hours(24);

/// A self-signed certificate issued for one TLS test server.
///
/// Holds the parsed server identity and the matching trust anchor clients
/// need to accept it. The PEM encoding is discarded after parsing.
#[derive(Clone)]
pub struct IssuedCertificate {
    identity: Identity,
    trust_anchor: Certificate,
    der: Vec<u8>,
    not_after: OffsetDateTime,
}

impl IssuedCertificate {
    /// Certificate plus private key, in the form the server transport loads.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The certificate as a CA root, for configuring client trust.
    pub fn trust_anchor(&self) -> Certificate {
        self.trust_anchor.clone()
    }

    /// Raw DER encoding of the certificate.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Expiry of the certificate ([`CERT_VALIDITY`] after issuance).
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }
}

/// Issue a fresh self-signed certificate for `localhost` and the loopback
/// addresses, valid from now for [`CERT_VALIDITY`].
///
/// The key pair is ECDSA P-256. Issuer equals subject; the serial number is
/// randomized by rcgen.
pub(crate) fn issue_certificate() -> Result<IssuedCertificate> {
    let key_pair = KeyPair::generate().context("failed to generate key pair")?;

    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .context("failed to build certificate params")?;

    let not_before = OffsetDateTime::now_utc();
    let not_after = not_before + CERT_VALIDITY;
    params.not_before = not_before;
    params.not_after = not_after;
    params
        .distinguished_name
        .push(DnType::OrganizationName, "grpctest");
    params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ServerAuth);

    let cert = params
        .self_signed(&key_pair)
        .context("failed to self-sign certificate")?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();
    let identity = Identity::from_pem(&cert_pem, &key_pem);
    let trust_anchor = Certificate::from_pem(cert_pem);

    Ok(IssuedCertificate {
        identity,
        trust_anchor,
        der: cert.der().to_vec(),
        not_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_certificate() {
        let issued = issue_certificate().unwrap();
        assert!(!issued.der().is_empty());
    }

    #[test]
    fn test_certificate_covers_localhost() {
        let issued = issue_certificate().unwrap();
        // The DNS SAN is plain ASCII inside the DER encoding.
        let der = issued.der();
        assert!(
            der.windows(b"localhost".len()).any(|w| w == b"localhost"),
            "certificate should carry a localhost SAN"
        );
    }

    #[test]
    fn test_certificate_validity_window() {
        let issued = issue_certificate().unwrap();
        let remaining = issued.not_after() - OffsetDateTime::now_utc();
        assert!(remaining <= CERT_VALIDITY);
        assert!(
            remaining > CERT_VALIDITY - Duration::minutes(5),
            "expiry should be ~24h out, got {remaining}"
        );
    }

    #[test]
    fn test_each_issuance_is_distinct() {
        let a = issue_certificate().unwrap();
        let b = issue_certificate().unwrap();
        assert_ne!(a.der(), b.der());
    }
}

//! Root Certificate Authority
//!
//! The single trust anchor of a bootstrap run. It owns the root key pair, its
//! self-signed certificate and the serial counter used for every leaf it signs.
//!
//! ```text
//! Root CA (self-signed, pathlen=0)  ← This module
//!   └── Service certificate (CA=false, SAN list)
//! ```
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same distinguished name
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature (critical)
//! - **Basic Constraints**: CA=true, pathlen=0 (critical), it only signs leaves
//! - **Subject Key Identifier**: present, so leaves can reference it by key id
//! - **Default Key Size**: RSA 4096-bit
//! - **Default Validity**: 3650 days
//!
//! # Example
//! ```rust,no_run
//! # use pki_bootstrap::certificate_authority::RootCaBuilder;
//! # use pki_bootstrap::configs::DistinguishedName;
//! # fn example() -> pki_bootstrap::Result<()> {
//! let (root_key, root_cert) = RootCaBuilder::new()
//!     .subject(DistinguishedName::default())
//!     .validity_days(3650)
//!     .key_bits(4096)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::configs::{CaConfig, DistinguishedName};
use crate::error::{encoding, signing, BootstrapError, Result};
use crate::key_material::{KeyAlgorithm, KeyMaterial, ROOT_KEY_BITS};
use crate::layout::OutputLayout;
use crate::leaf_issuer::CertificateRequest;
use crate::secure_file::{restrict_permissions, write_atomic, PUBLIC_MODE};
use crate::serial::SerialCounter;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509Ref, X509};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub(crate) const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const ROOT_CA_PATH_LENGTH: u32 = 0;

/// Build an X.509 name in `C, ST, L, O, OU, CN` order
pub(crate) fn build_name(dn: &DistinguishedName) -> Result<X509Name> {
    let mut name_builder =
        X509Name::builder().map_err(encoding("Failed to create name builder"))?;
    name_builder
        .append_entry_by_nid(Nid::COUNTRYNAME, &dn.country)
        .map_err(encoding("Failed to set country"))?;
    name_builder
        .append_entry_by_nid(Nid::STATEORPROVINCENAME, &dn.state)
        .map_err(encoding("Failed to set state/province"))?;
    name_builder
        .append_entry_by_nid(Nid::LOCALITYNAME, &dn.locality)
        .map_err(encoding("Failed to set locality"))?;
    name_builder
        .append_entry_by_nid(Nid::ORGANIZATIONNAME, &dn.organization)
        .map_err(encoding("Failed to set organization"))?;
    if let Some(ou) = &dn.organizational_unit {
        name_builder
            .append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, ou)
            .map_err(encoding("Failed to set organizational unit"))?;
    }
    name_builder
        .append_entry_by_nid(Nid::COMMONNAME, &dn.common_name)
        .map_err(encoding("Failed to set CN"))?;
    Ok(name_builder.build())
}

/// True when `cert` has not yet passed its not-after time
pub(crate) fn is_unexpired(cert: &X509Ref) -> Result<bool> {
    let now = Asn1Time::days_from_now(0).map_err(encoding("Failed to read current time"))?;
    let ordering = cert
        .not_after()
        .compare(&now)
        .map_err(encoding("Failed to compare validity"))?;
    Ok(ordering == Ordering::Greater)
}

fn is_self_signed(cert: &X509Ref) -> Result<bool> {
    let same_name = cert
        .issuer_name()
        .try_cmp(cert.subject_name())
        .map_err(encoding("Failed to compare names"))?
        == Ordering::Equal;
    if !same_name {
        return Ok(false);
    }
    let public_key = cert
        .public_key()
        .map_err(encoding("Failed to read CA public key"))?;
    cert.verify(&public_key)
        .map_err(signing("Failed to verify CA self-signature"))
}

fn read_certificate(path: &Path) -> Result<X509> {
    let pem = std::fs::read(path).map_err(|e| BootstrapError::io(path, e))?;
    X509::from_pem(&pem).map_err(encoding("Failed to parse CA certificate"))
}

fn read_signing_key(path: &Path) -> Result<KeyMaterial> {
    KeyMaterial::load(path).map_err(|e| BootstrapError::SigningKeyUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn key_matches(certificate: &X509Ref, key: &KeyMaterial) -> Result<bool> {
    let public_key = certificate
        .public_key()
        .map_err(encoding("Failed to read CA public key"))?;
    Ok(public_key.public_eq(key.private_key()))
}

// ================= Root CA Builder =================

/// Builder for the root key pair and its self-signed certificate
///
/// # Examples
/// ```rust,no_run
/// # use pki_bootstrap::certificate_authority::RootCaBuilder;
/// # use pki_bootstrap::configs::DistinguishedName;
/// # fn example() -> pki_bootstrap::Result<()> {
/// let subject = DistinguishedName {
///     organization: "ACME Corporation".to_string(),
///     common_name: "ACME Dev CA".to_string(),
///     ..DistinguishedName::default()
/// };
/// let (private_key, certificate) = RootCaBuilder::new()
///     .subject(subject)
///     .validity_days(7300)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RootCaBuilder {
    subject: DistinguishedName,
    validity_days: u32,
    key_bits: u32,
}

impl Default for RootCaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RootCaBuilder {
    /// Create a builder with the default subject, ten-year validity and a 4096-bit key
    pub fn new() -> Self {
        Self {
            subject: DistinguishedName::default(),
            validity_days: 3650,
            key_bits: ROOT_KEY_BITS,
        }
    }

    /// Set the subject (and therefore issuer) distinguished name
    pub fn subject(mut self, subject: DistinguishedName) -> Self {
        self.subject = subject;
        self
    }

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Set the RSA modulus size
    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// Generate the root key pair and self-signed certificate
    ///
    /// # Certificate Properties
    /// - **Version**: X.509v3
    /// - **Signature Algorithm**: SHA-256 with RSA
    /// - **Serial Number**: Random 128-bit number
    /// - **Not Before**: now; **Not After**: now + `validity_days`
    ///
    /// # Errors
    /// Returns error if:
    /// - RSA key generation fails
    /// - Any name entry or X.509 extension is rejected
    /// - Certificate signing fails
    pub fn build(self) -> Result<(KeyMaterial, X509)> {
        let key = KeyMaterial::generate(KeyAlgorithm::Rsa {
            bits: self.key_bits,
        })?;

        let mut builder = X509::builder().map_err(encoding("Failed to create X509 builder"))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(encoding("Failed to set version"))?;

        // Generate random 128-bit (16-byte) serial number
        let mut serial = BigNum::new().map_err(encoding("Failed to allocate serial"))?;
        serial
            .rand(128, MsbOption::MAYBE_ZERO, false)
            .map_err(BootstrapError::EntropyUnavailable)?;
        let asn1_serial = serial
            .to_asn1_integer()
            .map_err(encoding("Failed to encode serial number"))?;
        builder
            .set_serial_number(&asn1_serial)
            .map_err(encoding("Failed to set serial number"))?;

        let name = build_name(&self.subject)?;
        builder
            .set_subject_name(&name)
            .map_err(encoding("Failed to set subject"))?;
        builder
            .set_issuer_name(&name)
            .map_err(encoding("Failed to set issuer"))?;

        let not_before =
            Asn1Time::days_from_now(0).map_err(encoding("Failed to create not_before"))?;
        builder
            .set_not_before(&not_before)
            .map_err(encoding("Failed to set not_before"))?;
        let not_after = Asn1Time::days_from_now(self.validity_days)
            .map_err(encoding("Failed to create not_after"))?;
        builder
            .set_not_after(&not_after)
            .map_err(encoding("Failed to set not_after"))?;

        builder
            .set_pubkey(key.private_key())
            .map_err(encoding("Failed to set public key"))?;

        let basic_constraints = BasicConstraints::new()
            .critical()
            .ca()
            .pathlen(ROOT_CA_PATH_LENGTH)
            .build()
            .map_err(encoding("Failed to build BasicConstraints"))?;
        builder
            .append_extension(basic_constraints)
            .map_err(encoding("Failed to add BasicConstraints"))?;

        let key_usage = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()
            .map_err(encoding("Failed to build KeyUsage"))?;
        builder
            .append_extension(key_usage)
            .map_err(encoding("Failed to add KeyUsage"))?;

        let subject_key_id = {
            let ctx = builder.x509v3_context(None, None);
            SubjectKeyIdentifier::new()
                .build(&ctx)
                .map_err(encoding("Failed to build SubjectKeyIdentifier"))?
        };
        builder
            .append_extension(subject_key_id)
            .map_err(encoding("Failed to add SubjectKeyIdentifier"))?;

        builder
            .sign(key.private_key(), MessageDigest::sha256())
            .map_err(signing("Failed to sign root certificate"))?;
        Ok((key, builder.build()))
    }
}

// ================= Certificate Authority =================

/// The run's trust anchor: root key, self-signed certificate and serial source
#[derive(Debug)]
pub struct CertificateAuthority {
    key: KeyMaterial,
    certificate: X509,
    serial: SerialCounter,
    leaf_validity_days: u32,
    key_path: PathBuf,
    cert_path: PathBuf,
}

impl CertificateAuthority {
    /// Generate a new root, persist `ca.key` (0600), `ca.crt` and a fresh `ca.srl`
    pub fn bootstrap(
        layout: &OutputLayout,
        config: &CaConfig,
        leaf_validity_days: u32,
    ) -> Result<Self> {
        let (key, certificate) = RootCaBuilder::new()
            .subject(config.subject.clone())
            .validity_days(config.validity_days)
            .key_bits(config.key_bits)
            .build()?;

        let key_path = layout.ca_key();
        let cert_path = layout.ca_cert();
        key.persist(&key_path)?;
        let pem = certificate
            .to_pem()
            .map_err(encoding("Failed to encode CA certificate"))?;
        write_atomic(&cert_path, &pem, PUBLIC_MODE)?;
        let serial = SerialCounter::seed(&layout.ca_serial())?;

        info!(
            subject = %config.subject.common_name,
            validity_days = config.validity_days,
            key = %key.algorithm(),
            "created root certificate authority"
        );

        Ok(Self {
            key,
            certificate,
            serial,
            leaf_validity_days,
            key_path,
            cert_path,
        })
    }

    /// Load a previously persisted CA
    ///
    /// # Errors
    /// * `SigningKeyUnavailable` if the key cannot be read, does not parse, or does not
    ///   belong to the certificate
    /// * `Io`/`Encoding` if the certificate cannot be read or parsed
    pub fn load(layout: &OutputLayout, leaf_validity_days: u32) -> Result<Self> {
        let key_path = layout.ca_key();
        let certificate = read_certificate(&layout.ca_cert())?;
        let key = read_signing_key(&key_path)?;
        if !key_matches(&certificate, &key)? {
            return Err(BootstrapError::SigningKeyUnavailable {
                path: key_path,
                reason: "key does not match the CA certificate".to_string(),
            });
        }
        Self::assemble(layout, key, certificate, leaf_validity_days)
    }

    /// Load the persisted CA when it is complete, self-signed and unexpired
    ///
    /// Returns `Ok(None)` when there is nothing usable to reuse: a missing or
    /// unparseable certificate, a key that does not match it, a certificate that is
    /// not self-signed or has expired. A kept key is forced back to mode 0600.
    ///
    /// # Errors
    /// * `SigningKeyUnavailable` if `ca.key` exists next to a usable certificate but
    ///   does not parse
    pub fn load_if_valid(layout: &OutputLayout, leaf_validity_days: u32) -> Result<Option<Self>> {
        let key_path = layout.ca_key();
        let cert_path = layout.ca_cert();
        if !cert_path.exists() || !key_path.exists() {
            return Ok(None);
        }

        let certificate = match read_certificate(&cert_path) {
            Ok(certificate) => certificate,
            Err(e) => {
                warn!(
                    path = %cert_path.display(),
                    error = %e,
                    "existing CA certificate is unusable"
                );
                return Ok(None);
            }
        };
        let key = read_signing_key(&key_path)?;
        if !key_matches(&certificate, &key)? {
            warn!(path = %key_path.display(), "existing CA key does not match its certificate");
            return Ok(None);
        }
        if !is_self_signed(&certificate)? {
            warn!(path = %cert_path.display(), "existing CA certificate is not self-signed");
            return Ok(None);
        }
        if !is_unexpired(&certificate)? {
            warn!(path = %cert_path.display(), "existing CA certificate has expired");
            return Ok(None);
        }

        restrict_permissions(&key_path, key.mode())?;
        Self::assemble(layout, key, certificate, leaf_validity_days).map(Some)
    }

    fn assemble(
        layout: &OutputLayout,
        key: KeyMaterial,
        certificate: X509,
        leaf_validity_days: u32,
    ) -> Result<Self> {
        let serial = SerialCounter::open(&layout.ca_serial())?;
        Ok(Self {
            key,
            certificate,
            serial,
            leaf_validity_days,
            key_path: layout.ca_key(),
            cert_path: layout.ca_cert(),
        })
    }

    /// Sign a leaf request
    ///
    /// Assigns the next serial, sets not-before to now and not-after to now plus the
    /// leaf validity (clamped to the CA's own not-after), copies the request's SAN set
    /// and signs with SHA-256.
    ///
    /// # Leaf Extensions
    /// - `authorityKeyIdentifier=keyid,issuer`
    /// - `basicConstraints=CA:FALSE`
    /// - `keyUsage=digitalSignature,nonRepudiation,keyEncipherment,dataEncipherment`
    /// - `subjectAltName=DNS:...,IP:...`
    pub fn sign(&mut self, request: &CertificateRequest) -> Result<X509> {
        let csr = request.csr();
        let public_key = csr
            .public_key()
            .map_err(encoding("Failed to read request public key"))?;
        if !csr
            .verify(&public_key)
            .map_err(signing("Failed to verify request signature"))?
        {
            return Err(BootstrapError::SigningRejected {
                reason: "request signature does not match its public key".to_string(),
            });
        }

        let mut builder = X509::builder().map_err(encoding("Failed to create X509 builder"))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(encoding("Failed to set version"))?;

        let serial = self.serial.next_serial()?;
        builder
            .set_serial_number(&serial)
            .map_err(encoding("Failed to set serial number"))?;

        builder
            .set_subject_name(csr.subject_name())
            .map_err(encoding("Failed to set subject"))?;
        builder
            .set_issuer_name(self.certificate.subject_name())
            .map_err(encoding("Failed to set issuer"))?;
        builder
            .set_pubkey(&public_key)
            .map_err(encoding("Failed to set public key"))?;

        let not_before =
            Asn1Time::days_from_now(0).map_err(encoding("Failed to create not_before"))?;
        builder
            .set_not_before(&not_before)
            .map_err(encoding("Failed to set not_before"))?;
        let not_after = Asn1Time::days_from_now(self.leaf_validity_days)
            .map_err(encoding("Failed to create not_after"))?;
        let ca_not_after = self.certificate.not_after();
        if not_after
            .compare(ca_not_after)
            .map_err(encoding("Failed to compare validity"))?
            == Ordering::Greater
        {
            warn!(
                ca_not_after = %ca_not_after,
                "leaf validity clamped to the CA's expiry"
            );
            builder
                .set_not_after(ca_not_after)
                .map_err(encoding("Failed to set not_after"))?;
        } else {
            builder
                .set_not_after(&not_after)
                .map_err(encoding("Failed to set not_after"))?;
        }

        let basic_constraints = BasicConstraints::new()
            .build()
            .map_err(encoding("Failed to build BasicConstraints"))?;
        builder
            .append_extension(basic_constraints)
            .map_err(encoding("Failed to add BasicConstraints"))?;

        let key_usage = KeyUsage::new()
            .digital_signature()
            .non_repudiation()
            .key_encipherment()
            .data_encipherment()
            .build()
            .map_err(encoding("Failed to build KeyUsage"))?;
        builder
            .append_extension(key_usage)
            .map_err(encoding("Failed to add KeyUsage"))?;

        let (authority_key_id, subject_alt_name) = {
            let ctx = builder.x509v3_context(Some(&*self.certificate), None);
            let authority_key_id = AuthorityKeyIdentifier::new()
                .keyid(false)
                .issuer(false)
                .build(&ctx)
                .map_err(encoding("Failed to build AuthorityKeyIdentifier"))?;
            let subject_alt_name = request.subject_alt_names().to_extension(&ctx)?;
            (authority_key_id, subject_alt_name)
        };
        builder
            .append_extension(authority_key_id)
            .map_err(encoding("Failed to add AuthorityKeyIdentifier"))?;
        builder
            .append_extension(subject_alt_name)
            .map_err(encoding("Failed to add SubjectAlternativeName"))?;

        builder
            .sign(self.key.private_key(), MessageDigest::sha256())
            .map_err(signing("Failed to sign certificate"))?;
        Ok(builder.build())
    }

    /// Issuer equals subject and the signature verifies against the embedded key
    pub fn is_self_signed(&self) -> Result<bool> {
        is_self_signed(&self.certificate)
    }

    /// Check that `cert` carries a valid signature from this CA
    pub fn verifies(&self, cert: &X509Ref) -> Result<bool> {
        cert.verify(self.key.private_key())
            .map_err(signing("Failed to verify certificate signature"))
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn key_path(&self) -> &PathBuf {
        &self.key_path
    }

    pub fn cert_path(&self) -> &PathBuf {
        &self.cert_path
    }

    pub fn leaf_validity_days(&self) -> u32 {
        self.leaf_validity_days
    }
}

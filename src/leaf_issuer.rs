//! Service (leaf) certificate issuance
//!
//! Each service gets its own RSA key pair and a certificate signed by the run's root
//! CA. The signing request only ever exists in memory for the duration of one
//! [`LeafCertificateIssuer::issue`] call; nothing but the final key and certificate
//! reaches the disk.
//!
//! # Certificate Properties
//! - **Subject**: CA's organizational fields with `CN=<service>`
//! - **Key Usage**: digitalSignature, nonRepudiation, keyEncipherment, dataEncipherment
//! - **Basic Constraints**: CA=false
//! - **Subject Alternative Name**: DNS entries in declared order, then IP entries
//! - **Default Key Size**: RSA 2048-bit
//! - **Default Validity**: 825 days
//!
//! # Example
//! ```rust,no_run
//! # use pki_bootstrap::certificate_authority::CertificateAuthority;
//! # use pki_bootstrap::configs::{BootstrapConfig, DistinguishedName};
//! # use pki_bootstrap::key_material::{KeyAlgorithm, LEAF_KEY_BITS};
//! # use pki_bootstrap::layout::OutputLayout;
//! # use pki_bootstrap::leaf_issuer::{LeafCertificateIssuer, SubjectAltNameSet};
//! # fn example(mut ca: CertificateAuthority) -> pki_bootstrap::Result<()> {
//! let issuer = LeafCertificateIssuer::new(
//!     OutputLayout::new("certs"),
//!     DistinguishedName::default(),
//!     KeyAlgorithm::Rsa { bits: LEAF_KEY_BITS },
//! );
//! let sans = SubjectAltNameSet::new(
//!     vec!["backend".to_string(), "localhost".to_string()],
//!     vec!["127.0.0.1".parse().unwrap()],
//! )?;
//! let issued = issuer.issue(&mut ca, "backend", &sans)?;
//! assert!(issued.verify()?);
//! # Ok(())
//! # }
//! ```

use crate::certificate_authority::{build_name, is_unexpired, CertificateAuthority};
use crate::configs::{is_safe_component, DistinguishedName, RegenerationPolicy};
use crate::error::{encoding, signing, BootstrapError, Result};
use crate::key_material::{KeyAlgorithm, KeyMaterial};
use crate::layout::OutputLayout;
use crate::secure_file::{restrict_permissions, write_atomic, PUBLIC_MODE};
use openssl::hash::MessageDigest;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509Extension, X509Ref, X509Req, X509v3Context, X509};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, info};

/// DNS names and IP addresses a leaf certificate is valid for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAltNameSet {
    dns: Vec<String>,
    ip: Vec<IpAddr>,
}

impl SubjectAltNameSet {
    /// Build a SAN set; at least one entry is required
    pub fn new(dns: Vec<String>, ip: Vec<IpAddr>) -> Result<Self> {
        if dns.is_empty() && ip.is_empty() {
            return Err(BootstrapError::invalid_config(
                "a leaf certificate needs at least one subject alternative name",
            ));
        }
        if let Some(bad) = dns.iter().find(|d| d.is_empty() || d.contains([',', ' '])) {
            return Err(BootstrapError::invalid_config(format!(
                "invalid DNS name {:?}",
                bad
            )));
        }
        Ok(Self { dns, ip })
    }

    pub fn dns(&self) -> &[String] {
        &self.dns
    }

    pub fn ip(&self) -> &[IpAddr] {
        &self.ip
    }

    /// `DNS:` entries followed by `IP:` entries, in declared order
    pub fn entries(&self) -> Vec<String> {
        self.dns
            .iter()
            .map(|d| format!("DNS:{}", d))
            .chain(self.ip.iter().map(|ip| format!("IP:{}", ip)))
            .collect()
    }

    /// Read the SAN extension of an existing certificate
    ///
    /// Entries other than DNS names and IP addresses are ignored.
    pub fn from_certificate(cert: &X509Ref) -> Option<Self> {
        let names = cert.subject_alt_names()?;
        let mut dns = Vec::new();
        let mut ip = Vec::new();
        for name in names.iter() {
            if let Some(d) = name.dnsname() {
                dns.push(d.to_string());
            } else if let Some(bytes) = name.ipaddress() {
                match bytes.len() {
                    4 => ip.push(IpAddr::from(<[u8; 4]>::try_from(bytes).ok()?)),
                    16 => ip.push(IpAddr::from(<[u8; 16]>::try_from(bytes).ok()?)),
                    _ => return None,
                }
            }
        }
        Some(Self { dns, ip })
    }

    pub(crate) fn to_extension(&self, ctx: &X509v3Context<'_>) -> Result<X509Extension> {
        let mut san = SubjectAlternativeName::new();
        for dns in &self.dns {
            san.dns(dns);
        }
        for ip in &self.ip {
            san.ip(&ip.to_string());
        }
        san.build(ctx).map_err(encoding("Failed to build SubjectAlternativeName"))
    }
}

impl fmt::Display for SubjectAltNameSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries().join(", "))
    }
}

/// A pending leaf: public key and subject (in a self-signed CSR) plus its SAN set
pub struct CertificateRequest {
    csr: X509Req,
    subject_alt_names: SubjectAltNameSet,
}

impl CertificateRequest {
    /// Build a request for `subject`, signed by `key` as proof of possession
    pub fn new(
        subject: &DistinguishedName,
        key: &KeyMaterial,
        subject_alt_names: SubjectAltNameSet,
    ) -> Result<Self> {
        let mut builder = X509Req::builder().map_err(encoding("Failed to create request builder"))?;
        builder
            .set_version(0)
            .map_err(encoding("Failed to set request version"))?;
        let name = build_name(subject)?;
        builder
            .set_subject_name(&name)
            .map_err(encoding("Failed to set request subject"))?;
        builder
            .set_pubkey(key.private_key())
            .map_err(encoding("Failed to set request public key"))?;
        builder
            .sign(key.private_key(), MessageDigest::sha256())
            .map_err(signing("Failed to sign request"))?;
        Ok(Self {
            csr: builder.build(),
            subject_alt_names,
        })
    }

    pub fn csr(&self) -> &X509Req {
        &self.csr
    }

    pub fn subject_alt_names(&self) -> &SubjectAltNameSet {
        &self.subject_alt_names
    }
}

/// An issued (or reused) leaf and where its artifacts live
#[derive(Debug)]
pub struct ServiceCertificate {
    pub service_name: String,
    pub key: KeyMaterial,
    pub subject_alt_names: SubjectAltNameSet,
    pub certificate: X509,
    /// Shared handle on the issuing CA's certificate
    pub issuer: X509,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub reused: bool,
}

impl ServiceCertificate {
    /// Verify the leaf signature against the issuing CA's public key
    pub fn verify(&self) -> Result<bool> {
        let issuer_key = self
            .issuer
            .public_key()
            .map_err(encoding("Failed to read issuer public key"))?;
        self.certificate
            .verify(&issuer_key)
            .map_err(signing("Failed to verify leaf signature"))
    }
}

/// Issues one leaf per call against a borrowed CA
#[derive(Debug, Clone)]
pub struct LeafCertificateIssuer {
    layout: OutputLayout,
    subject: DistinguishedName,
    key_algorithm: KeyAlgorithm,
    policy: RegenerationPolicy,
}

impl LeafCertificateIssuer {
    pub fn new(
        layout: OutputLayout,
        subject: DistinguishedName,
        key_algorithm: KeyAlgorithm,
    ) -> Self {
        Self {
            layout,
            subject,
            key_algorithm,
            policy: RegenerationPolicy::Always,
        }
    }

    pub fn with_policy(mut self, policy: RegenerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Issue (or, under `ReuseValid`, keep) the certificate for `service`
    ///
    /// Writes `<service>/<service>.key` (0600) and `<service>/<service>.crt`.
    pub fn issue(
        &self,
        ca: &mut CertificateAuthority,
        service: &str,
        subject_alt_names: &SubjectAltNameSet,
    ) -> Result<ServiceCertificate> {
        if !is_safe_component(service) {
            return Err(BootstrapError::invalid_config(format!(
                "service name {:?} is not usable as a file name",
                service
            )));
        }
        let key_path = self.layout.service_key(service);
        let cert_path = self.layout.service_cert(service);

        if self.policy == RegenerationPolicy::ReuseValid {
            if let Some(existing) = self.reusable(ca, service, subject_alt_names)? {
                info!(service, "kept existing service certificate");
                return Ok(existing);
            }
        }

        let key = KeyMaterial::generate(self.key_algorithm)?;
        let certificate = {
            let request = CertificateRequest::new(
                &self.subject.with_common_name(service),
                &key,
                subject_alt_names.clone(),
            )?;
            ca.sign(&request)?
        };

        key.persist(&key_path)?;
        let pem = certificate
            .to_pem()
            .map_err(encoding("Failed to encode service certificate"))?;
        write_atomic(&cert_path, &pem, PUBLIC_MODE)?;

        info!(service, sans = %subject_alt_names, "issued service certificate");
        debug!(key = %key_path.display(), cert = %cert_path.display(), "wrote service artifacts");

        Ok(ServiceCertificate {
            service_name: service.to_string(),
            key,
            subject_alt_names: subject_alt_names.clone(),
            certificate,
            issuer: ca.certificate().clone(),
            key_path,
            cert_path,
            reused: false,
        })
    }

    /// Existing artifacts that parse, match, chain to `ca`, are unexpired and carry
    /// exactly the requested SANs
    fn reusable(
        &self,
        ca: &CertificateAuthority,
        service: &str,
        subject_alt_names: &SubjectAltNameSet,
    ) -> Result<Option<ServiceCertificate>> {
        let key_path = self.layout.service_key(service);
        let cert_path = self.layout.service_cert(service);
        if !key_path.exists() || !cert_path.exists() {
            return Ok(None);
        }

        let Ok(key) = KeyMaterial::load(&key_path) else {
            return Ok(None);
        };
        let pem = std::fs::read(&cert_path).map_err(|e| BootstrapError::io(&cert_path, e))?;
        let Ok(certificate) = X509::from_pem(&pem) else {
            return Ok(None);
        };

        let public_key = certificate
            .public_key()
            .map_err(encoding("Failed to read service public key"))?;
        let same_sans =
            SubjectAltNameSet::from_certificate(&certificate).as_ref() == Some(subject_alt_names);
        let usable = public_key.public_eq(key.private_key())
            && ca.verifies(&certificate)?
            && is_unexpired(&certificate)?
            && same_sans;
        if !usable {
            debug!(service, "existing service certificate is stale");
            return Ok(None);
        }
        restrict_permissions(&key_path, key.mode())?;

        Ok(Some(ServiceCertificate {
            service_name: service.to_string(),
            key,
            subject_alt_names: subject_alt_names.clone(),
            certificate,
            issuer: ca.certificate().clone(),
            key_path,
            cert_path,
            reused: true,
        }))
    }
}

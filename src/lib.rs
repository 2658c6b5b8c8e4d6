//! PKI Bootstrap - Certificate Authority and Secrets Provisioning Library
//!
//! Prepares a fresh deployment of a multi-service system for first start: a private
//! root CA, one TLS leaf certificate per internal service, and a runtime
//! configuration document carrying freshly generated credentials.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, pathlen=0)
//!   ├── backend   (CA=false, SAN: DNS:backend, DNS:localhost, IP:127.0.0.1)
//!   ├── frontend  (CA=false)
//!   └── postgres  (CA=false, aliased to server.crt / server.key)
//! ```
//!
//! Produced artifacts:
//!
//! ```text
//! certs/
//!   ca/ca.key          0600
//!   ca/ca.crt          0644
//!   ca/ca.srl          0644   next serial, hex
//!   <svc>/<svc>.key    0600
//!   <svc>/<svc>.crt    0644
//!   postgres/server.{crt,key}, postgres/ca.crt
//! .env                 0600
//! ```
//!
//! Every file is written through a temporary sibling, permissions are applied before
//! any content lands, and the temporary is renamed over the target. A failed run
//! leaves no partially written artifact.
//!
//! # Quick Start
//!
//! ```bash
//! cargo build --release
//! ./target/release/pki-bootstrap --config bootstrap.toml
//! ```
//!
//! # As a Library
//!
//! ```no_run
//! use pki_bootstrap::configs::BootstrapConfig;
//! use pki_bootstrap::Bootstrapper;
//! use std::path::Path;
//!
//! fn main() -> pki_bootstrap::Result<()> {
//!     let config = BootstrapConfig::load_or_default(Path::new("bootstrap.toml"))?;
//!     let report = Bootstrapper::new(config, Path::new("."))?.run()?;
//!     println!("CA certificate at {}", report.ca.cert_path.display());
//!     Ok(())
//! }
//! ```
//!
//! Building a standalone root:
//!
//! ```no_run
//! use pki_bootstrap::certificate_authority::RootCaBuilder;
//! use pki_bootstrap::configs::DistinguishedName;
//!
//! fn main() -> pki_bootstrap::Result<()> {
//!     let (key, cert) = RootCaBuilder::new()
//!         .subject(DistinguishedName::default())
//!         .validity_days(3650)
//!         .key_bits(4096)
//!         .build()?;
//!     let _ = (key, cert);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`backend`]: cryptographic backend availability check
//! - [`certificate_authority`]: root CA creation, loading and leaf signing
//! - [`leaf_issuer`]: per-service key, CSR and certificate issuance
//! - [`provisioner`]: service table walk and database aliasing
//! - [`config_emitter`]: `.env` composition and persistence
//! - [`bootstrap`]: top-level orchestration
//!
//! # Security
//!
//! Private keys and generated credentials are held in [`secrecy`] containers and are
//! never logged; their `Debug` output is redacted.

pub mod backend;
pub mod bootstrap;
pub mod certificate_authority;
pub mod config_emitter;
pub mod configs;
pub mod credentials;
pub mod error;
pub mod key_material;
pub mod layout;
pub mod leaf_issuer;
pub mod provisioner;
pub mod secret_generator;
pub mod secure_file;
pub mod serial;

pub use bootstrap::{BootstrapReport, Bootstrapper};
pub use error::{BootstrapError, Result};

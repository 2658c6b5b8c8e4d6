//! On-disk layout of the generated PKI
//!
//! ```text
//! <root>/ca/ca.key, ca.crt, ca.srl
//! <root>/<service>/<service>.key, <service>.crt
//! <root>/postgres/server.key, server.crt, ca.crt
//! ```

use crate::error::Result;
use crate::secure_file::ensure_dir;
use std::path::{Path, PathBuf};

const CA_DIR: &str = "ca";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_dir(&self) -> PathBuf {
        self.root.join(CA_DIR)
    }

    pub fn ca_key(&self) -> PathBuf {
        self.ca_dir().join("ca.key")
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.ca_dir().join("ca.crt")
    }

    pub fn ca_serial(&self) -> PathBuf {
        self.ca_dir().join("ca.srl")
    }

    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.root.join(service)
    }

    pub fn service_key(&self, service: &str) -> PathBuf {
        self.service_dir(service).join(format!("{}.key", service))
    }

    pub fn service_cert(&self, service: &str) -> PathBuf {
        self.service_dir(service).join(format!("{}.crt", service))
    }

    /// Create the CA directory and one directory per service
    pub fn create<'a>(&self, services: impl IntoIterator<Item = &'a str>) -> Result<()> {
        ensure_dir(&self.ca_dir())?;
        for service in services {
            ensure_dir(&self.service_dir(service))?;
        }
        Ok(())
    }
}

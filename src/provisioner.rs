//! Per-service certificate provisioning
//!
//! Walks the declared service table in order and issues one leaf per entry. The
//! database service additionally gets the fixed file names PostgreSQL expects
//! (`server.crt`, `server.key`) and a local copy of the CA certificate.

use crate::certificate_authority::CertificateAuthority;
use crate::configs::ServiceSpec;
use crate::error::Result;
use crate::layout::OutputLayout;
use crate::leaf_issuer::{LeafCertificateIssuer, ServiceCertificate, SubjectAltNameSet};
use crate::secure_file::{copy_artifact, PRIVATE_MODE, PUBLIC_MODE};
use std::path::PathBuf;
use tracing::info;

/// Service whose artifacts are aliased to PostgreSQL's conventional names
pub const DATABASE_SERVICE: &str = "postgres";

/// A provisioned service: its leaf plus any alias files written next to it
#[derive(Debug)]
pub struct ProvisionedService {
    pub certificate: ServiceCertificate,
    pub aliases: Vec<PathBuf>,
}

pub struct ServiceProvisioner<'a> {
    issuer: &'a LeafCertificateIssuer,
    layout: &'a OutputLayout,
}

impl<'a> ServiceProvisioner<'a> {
    pub fn new(issuer: &'a LeafCertificateIssuer, layout: &'a OutputLayout) -> Self {
        Self { issuer, layout }
    }

    /// Issue every service in declaration order, stopping at the first failure
    pub fn provision_all(
        &self,
        ca: &mut CertificateAuthority,
        services: &[ServiceSpec],
    ) -> Result<Vec<ProvisionedService>> {
        services
            .iter()
            .map(|service| self.provision(ca, service))
            .collect()
    }

    pub fn provision(
        &self,
        ca: &mut CertificateAuthority,
        service: &ServiceSpec,
    ) -> Result<ProvisionedService> {
        let sans = SubjectAltNameSet::new(service.dns.clone(), service.ip.clone())?;
        let certificate = self.issuer.issue(ca, &service.name, &sans)?;

        let aliases = if service.name == DATABASE_SERVICE {
            self.alias_database_artifacts(ca, &certificate)?
        } else {
            Vec::new()
        };

        Ok(ProvisionedService {
            certificate,
            aliases,
        })
    }

    /// Byte-identical `server.crt`/`server.key` plus the CA certificate
    fn alias_database_artifacts(
        &self,
        ca: &CertificateAuthority,
        issued: &ServiceCertificate,
    ) -> Result<Vec<PathBuf>> {
        let dir = self.layout.service_dir(&issued.service_name);
        let server_cert = dir.join("server.crt");
        let server_key = dir.join("server.key");
        let local_ca = dir.join("ca.crt");

        copy_artifact(&issued.cert_path, &server_cert, PUBLIC_MODE)?;
        copy_artifact(&issued.key_path, &server_key, PRIVATE_MODE)?;
        copy_artifact(ca.cert_path(), &local_ca, PUBLIC_MODE)?;

        info!(service = %issued.service_name, "wrote database certificate aliases");
        Ok(vec![server_cert, server_key, local_ca])
    }
}

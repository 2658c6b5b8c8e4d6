//! Top-level orchestration
//!
//! Strictly sequential: backend check → directory layout → root CA → one leaf per
//! declared service → configuration document. The first failure aborts the run;
//! artifacts completed before it are left in place.

use crate::backend;
use crate::certificate_authority::CertificateAuthority;
use crate::configs::{BootstrapConfig, RegenerationPolicy, ServiceSpec};
use crate::config_emitter::ConfigEmitter;
use crate::credentials::CredentialSet;
use crate::error::{BootstrapError, Result};
use crate::key_material::KeyAlgorithm;
use crate::layout::OutputLayout;
use crate::leaf_issuer::LeafCertificateIssuer;
use crate::provisioner::{ProvisionedService, ServiceProvisioner};
use crate::secret_generator::SecretGenerator;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the CA ended up and whether it was carried over from a previous run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaReport {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    pub name: String,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub aliases: Vec<PathBuf>,
    pub reused: bool,
}

impl From<&ProvisionedService> for ServiceReport {
    fn from(provisioned: &ProvisionedService) -> Self {
        let certificate = &provisioned.certificate;
        Self {
            name: certificate.service_name.clone(),
            key_path: certificate.key_path.clone(),
            cert_path: certificate.cert_path.clone(),
            aliases: provisioned.aliases.clone(),
            reused: certificate.reused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvReport {
    pub path: PathBuf,
    /// False when an existing document was kept
    pub written: bool,
}

/// Summary of a completed run; never carries secret values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub ca: CaReport,
    pub services: Vec<ServiceReport>,
    pub env: EnvReport,
}

pub struct Bootstrapper {
    config: BootstrapConfig,
    layout: OutputLayout,
    env_path: PathBuf,
    ca: Option<CertificateAuthority>,
}

impl Bootstrapper {
    /// Validate `config` and resolve its output paths against `working_root`
    pub fn new(config: BootstrapConfig, working_root: &Path) -> Result<Self> {
        config.validate()?;
        let layout = OutputLayout::new(working_root.join(&config.output.certs_dir));
        let env_path = working_root.join(&config.output.env_file);
        Ok(Self {
            config,
            layout,
            env_path,
            ca: None,
        })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn certificate_authority(&self) -> Option<&CertificateAuthority> {
        self.ca.as_ref()
    }

    fn policy(&self) -> RegenerationPolicy {
        self.config.policy.regeneration
    }

    /// Run every step in order
    pub fn run(&mut self) -> Result<BootstrapReport> {
        backend::ensure_available()?;
        self.prepare_layout()?;
        let ca = self.establish_ca()?;
        let services = self.provision_services()?;
        let env = self.emit_configuration()?;
        info!(services = services.len(), "bootstrap complete");
        Ok(BootstrapReport { ca, services, env })
    }

    pub fn prepare_layout(&self) -> Result<()> {
        self.layout.create(self.config.services.iter().map(|s| s.name.as_str()))?;
        if let Some(parent) = self.env_path.parent() {
            crate::secure_file::ensure_dir(parent)?;
        }
        Ok(())
    }

    /// Create the root CA, or keep the existing one under `ReuseValid`
    pub fn establish_ca(&mut self) -> Result<CaReport> {
        let leaf_validity = self.config.leaf.validity_days;
        let existing = match self.policy() {
            RegenerationPolicy::ReuseValid => {
                CertificateAuthority::load_if_valid(&self.layout, leaf_validity)?
            }
            RegenerationPolicy::Always => None,
        };

        let (ca, reused) = match existing {
            Some(ca) => {
                info!(path = %ca.cert_path().display(), "kept existing certificate authority");
                (ca, true)
            }
            None => (
                CertificateAuthority::bootstrap(
                    &self.layout,
                    &self.config.certificate_authority,
                    leaf_validity,
                )?,
                false,
            ),
        };

        let report = CaReport {
            key_path: ca.key_path().clone(),
            cert_path: ca.cert_path().clone(),
            reused,
        };
        self.ca = Some(ca);
        Ok(report)
    }

    fn issuer(&self) -> LeafCertificateIssuer {
        LeafCertificateIssuer::new(
            self.layout.clone(),
            self.config.certificate_authority.subject.clone(),
            KeyAlgorithm::Rsa {
                bits: self.config.leaf.key_bits,
            },
        )
        .with_policy(self.policy())
    }

    /// Issue a single service certificate against the established CA
    ///
    /// # Errors
    /// * `CaUnavailable` if [`Bootstrapper::establish_ca`] has not run
    pub fn issue_service(&mut self, service: &ServiceSpec) -> Result<ServiceReport> {
        let issuer = self.issuer();
        let ca = self.ca.as_mut().ok_or(BootstrapError::CaUnavailable)?;
        let provisioned = ServiceProvisioner::new(&issuer, &self.layout).provision(ca, service)?;
        Ok(ServiceReport::from(&provisioned))
    }

    /// Issue every declared service in order
    pub fn provision_services(&mut self) -> Result<Vec<ServiceReport>> {
        let issuer = self.issuer();
        let ca = self.ca.as_mut().ok_or(BootstrapError::CaUnavailable)?;
        let provisioned = ServiceProvisioner::new(&issuer, &self.layout)
            .provision_all(ca, &self.config.services)?;
        Ok(provisioned.iter().map(ServiceReport::from).collect())
    }

    /// Generate credentials and write the configuration document
    ///
    /// Under `ReuseValid` an existing document is kept as is, since its credentials
    /// may already be in use by the deployed services.
    pub fn emit_configuration(&self) -> Result<EnvReport> {
        if self.policy() == RegenerationPolicy::ReuseValid && self.env_path.exists() {
            info!(path = %self.env_path.display(), "kept existing configuration document");
            return Ok(EnvReport {
                path: self.env_path.clone(),
                written: false,
            });
        }

        let credentials =
            CredentialSet::generate(&self.config.credentials, &SecretGenerator::new())?;
        let path =
            ConfigEmitter::new(&self.env_path).emit(&credentials, &self.config.env_sections)?;
        Ok(EnvReport {
            path,
            written: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BootstrapConfig {
        let mut config = BootstrapConfig::default();
        config.certificate_authority.key_bits = 2048;
        config.leaf.key_bits = 1024;
        config.services = vec![ServiceSpec::new(
            "backend",
            &["backend", "localhost"],
            &[std::net::IpAddr::from([127, 0, 0, 1])],
        )];
        config
    }

    #[test]
    fn test_issue_before_ca_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let service = config.services[0].clone();
        let mut bootstrapper = Bootstrapper::new(config, dir.path()).unwrap();
        bootstrapper.prepare_layout().unwrap();

        assert!(matches!(
            bootstrapper.issue_service(&service),
            Err(BootstrapError::CaUnavailable)
        ));
        assert!(matches!(
            bootstrapper.provision_services(),
            Err(BootstrapError::CaUnavailable)
        ));
        assert!(!bootstrapper.layout().service_key("backend").exists());
    }

    #[test]
    fn test_invalid_config_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.leaf.key_bits = 4096;
        assert!(Bootstrapper::new(config, dir.path()).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_run_reports_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut bootstrapper = Bootstrapper::new(small_config(), dir.path()).unwrap();
        let report = bootstrapper.run().unwrap();

        assert_eq!(report.ca.cert_path, dir.path().join("certs/ca/ca.crt"));
        assert!(!report.ca.reused);
        assert_eq!(report.services.len(), 1);
        assert_eq!(
            report.services[0].cert_path,
            dir.path().join("certs/backend/backend.crt")
        );
        assert_eq!(report.env.path, dir.path().join(".env"));
        assert!(report.env.written);
    }
}

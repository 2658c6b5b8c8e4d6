//! Bootstrap configuration
//!
//! Loaded from an optional TOML file; every field falls back to a built-in default so
//! an empty file (or no file at all) reproduces the stock object-storage deployment.

use crate::error::{BootstrapError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Shortest credential the configuration accepts
pub const MIN_CREDENTIAL_LENGTH: usize = 16;

#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub certificate_authority: CaConfig,
    #[serde(default)]
    pub leaf: LeafConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,
    #[serde(default = "default_env_sections")]
    pub env_sections: Vec<EnvSection>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            certificate_authority: CaConfig::default(),
            leaf: LeafConfig::default(),
            policy: PolicyConfig::default(),
            credentials: CredentialConfig::default(),
            services: default_services(),
            env_sections: default_env_sections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_certs_dir")]
    pub certs_dir: PathBuf,
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            certs_dir: default_certs_dir(),
            env_file: default_env_file(),
        }
    }
}

fn default_certs_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

/// Distinguished name fields shared by the CA and every leaf
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_locality")]
    pub locality: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default)]
    pub organizational_unit: Option<String>,
    #[serde(default = "default_ca_common_name")]
    pub common_name: String,
}

impl Default for DistinguishedName {
    fn default() -> Self {
        Self {
            country: default_country(),
            state: default_state(),
            locality: default_locality(),
            organization: default_organization(),
            organizational_unit: None,
            common_name: default_ca_common_name(),
        }
    }
}

impl DistinguishedName {
    /// Same organizational fields, different common name
    pub fn with_common_name(&self, common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            ..self.clone()
        }
    }
}

fn default_country() -> String {
    "US".to_string()
}

fn default_state() -> String {
    "State".to_string()
}

fn default_locality() -> String {
    "City".to_string()
}

fn default_organization() -> String {
    "ObjectStorage".to_string()
}

fn default_ca_common_name() -> String {
    "ObjectStorage-CA".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaConfig {
    #[serde(flatten)]
    pub subject: DistinguishedName,
    #[serde(default = "default_ca_validity")]
    pub validity_days: u32,
    #[serde(default = "default_ca_key_bits")]
    pub key_bits: u32,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            subject: DistinguishedName::default(),
            validity_days: default_ca_validity(),
            key_bits: default_ca_key_bits(),
        }
    }
}

fn default_ca_validity() -> u32 {
    3650 // 10 years
}

fn default_ca_key_bits() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct LeafConfig {
    #[serde(default = "default_leaf_validity")]
    pub validity_days: u32,
    #[serde(default = "default_leaf_key_bits")]
    pub key_bits: u32,
}

impl Default for LeafConfig {
    fn default() -> Self {
        Self {
            validity_days: default_leaf_validity(),
            key_bits: default_leaf_key_bits(),
        }
    }
}

fn default_leaf_validity() -> u32 {
    825
}

fn default_leaf_key_bits() -> u32 {
    2048
}

/// What to do with material left over from a previous run
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RegenerationPolicy {
    /// Regenerate and replace everything
    #[default]
    Always,
    /// Keep existing material that is still valid for this run
    ReuseValid,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub regeneration: RegenerationPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialConfig {
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_admin_password_length")]
    pub admin_password_length: usize,
    #[serde(default = "default_secret_length")]
    pub db_password_length: usize,
    #[serde(default = "default_secret_length")]
    pub jwt_secret_length: usize,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            admin_email: default_admin_email(),
            admin_password_length: default_admin_password_length(),
            db_password_length: default_secret_length(),
            jwt_secret_length: default_secret_length(),
        }
    }
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_email() -> String {
    "admin@example.com".to_string()
}

fn default_admin_password_length() -> usize {
    20
}

fn default_secret_length() -> usize {
    32
}

/// One entry of the declared service table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub ip: Vec<IpAddr>,
}

impl ServiceSpec {
    pub fn new(name: &str, dns: &[&str], ip: &[IpAddr]) -> Self {
        Self {
            name: name.to_string(),
            dns: dns.iter().map(|d| d.to_string()).collect(),
            ip: ip.to_vec(),
        }
    }
}

fn default_services() -> Vec<ServiceSpec> {
    let loopback: IpAddr = [127, 0, 0, 1].into();
    let unspecified: IpAddr = [0, 0, 0, 0].into();
    vec![
        ServiceSpec::new(
            "backend",
            &["backend", "objectstore-backend", "localhost", "api", "server"],
            &[loopback, unspecified],
        ),
        ServiceSpec::new(
            "frontend",
            &["frontend", "objectstore-frontend", "localhost", "www"],
            &[loopback, unspecified],
        ),
        ServiceSpec::new(
            "postgres",
            &["postgres", "objectstore-db", "localhost", "db", "database"],
            &[loopback, unspecified],
        ),
    ]
}

/// A titled group of static `KEY=VALUE` entries in the emitted document
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EnvSection {
    pub title: String,
    #[serde(default)]
    pub entries: Vec<EnvEntry>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

fn section(title: &str, entries: &[(&str, &str)]) -> EnvSection {
    EnvSection {
        title: title.to_string(),
        entries: entries
            .iter()
            .map(|(key, value)| EnvEntry {
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect(),
    }
}

fn default_env_sections() -> Vec<EnvSection> {
    vec![
        section("Admin Credentials", &[]),
        section(
            "JWT Configuration",
            &[
                ("JWT_SECRET", ""),
                ("JWT_EXPIRATION", "24h"),
                ("REFRESH_TOKEN_EXPIRATION", "168h"),
            ],
        ),
        section(
            "Database Configuration",
            &[
                ("DB_HOST", "postgres"),
                ("DB_PORT", "5432"),
                ("DB_NAME", "objectstore"),
                ("DB_USER", "objectstore"),
                ("DB_PASSWORD", ""),
                ("DB_SSL_MODE", "require"),
            ],
        ),
        section(
            "Storage Configuration",
            &[
                ("STORAGE_BACKEND", "local"),
                ("STORAGE_ROOT_PATH", "/data/storage"),
            ],
        ),
        section(
            "S3 Configuration (if using S3 backend)",
            &[
                ("S3_ENDPOINT", ""),
                ("S3_REGION", "us-east-1"),
                ("S3_ACCESS_KEY_ID", ""),
                ("S3_SECRET_ACCESS_KEY", ""),
                ("S3_BUCKET_PREFIX", ""),
                ("S3_USE_SSL", "true"),
                ("S3_FORCE_PATH_STYLE", "false"),
            ],
        ),
        section(
            "Server Configuration",
            &[("SERVER_PORT", "9443"), ("SERVER_HOST", "0.0.0.0")],
        ),
        section(
            "TLS Configuration",
            &[
                ("TLS_ENABLED", "true"),
                ("TLS_CERT_FILE", "/certs/backend.crt"),
                ("TLS_KEY_FILE", "/certs/backend.key"),
                ("TLS_CA_FILE", "/certs/ca.crt"),
            ],
        ),
        section(
            "CORS Configuration",
            &[(
                "CORS_ALLOWED_ORIGINS",
                "https://localhost:3000,http://localhost:3000",
            )],
        ),
        section(
            "Rate Limiting",
            &[
                ("RATE_LIMIT_ENABLED", "true"),
                ("RATE_LIMIT_REQUESTS_PER_MINUTE", "100"),
            ],
        ),
    ]
}

/// Service names double as directory and file names
pub(crate) fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub(crate) fn is_env_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl BootstrapConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path).map_err(|e| BootstrapError::io(path, e))?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).map_err(|e| {
            BootstrapError::invalid_config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Load `path` if it exists, otherwise fall back to the built-in defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ca = &self.certificate_authority;
        if ca.key_bits <= self.leaf.key_bits {
            return Err(BootstrapError::invalid_config(format!(
                "CA key size ({} bits) must exceed leaf key size ({} bits)",
                ca.key_bits, self.leaf.key_bits
            )));
        }
        if self.leaf.validity_days == 0 || self.leaf.validity_days >= ca.validity_days {
            return Err(BootstrapError::invalid_config(format!(
                "leaf validity ({} days) must be positive and shorter than CA validity ({} days)",
                self.leaf.validity_days, ca.validity_days
            )));
        }
        let country = &ca.subject.country;
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BootstrapError::invalid_config(format!(
                "country must be a two-letter code, got {:?}",
                ca.subject.country
            )));
        }

        if self.services.is_empty() {
            return Err(BootstrapError::invalid_config("no services declared"));
        }
        let mut seen = HashSet::new();
        for service in &self.services {
            if !is_safe_component(&service.name) || service.name == "ca" {
                return Err(BootstrapError::invalid_config(format!(
                    "service name {:?} is not usable as a directory name",
                    service.name
                )));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(BootstrapError::invalid_config(format!(
                    "service {:?} declared twice",
                    service.name
                )));
            }
            if service.dns.is_empty() && service.ip.is_empty() {
                return Err(BootstrapError::invalid_config(format!(
                    "service {:?} has no subject alternative names",
                    service.name
                )));
            }
        }

        let creds = &self.credentials;
        for (name, length) in [
            ("admin_password_length", creds.admin_password_length),
            ("db_password_length", creds.db_password_length),
            ("jwt_secret_length", creds.jwt_secret_length),
        ] {
            if length < MIN_CREDENTIAL_LENGTH {
                return Err(BootstrapError::invalid_config(format!(
                    "{} must be at least {}, got {}",
                    name, MIN_CREDENTIAL_LENGTH, length
                )));
            }
        }

        for section in &self.env_sections {
            for entry in &section.entries {
                if !is_env_key(&entry.key) {
                    return Err(BootstrapError::invalid_config(format!(
                        "invalid configuration key {:?}",
                        entry.key
                    )));
                }
                if entry.value.contains(['\n', '\r']) {
                    return Err(BootstrapError::invalid_config(format!(
                        "value of {} spans multiple lines",
                        entry.key
                    )));
                }
            }
        }
        Ok(())
    }
}

//! Generated deployment credentials
//!
//! Values only leave their `SecretString` at the configuration-document write boundary
//! and never reach a log line.

use crate::configs::CredentialConfig;
use crate::error::{BootstrapError, Result};
use crate::secret_generator::SecretGenerator;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

pub const ADMIN_SECTION: &str = "Admin Credentials";
pub const JWT_SECTION: &str = "JWT Configuration";
pub const DATABASE_SECTION: &str = "Database Configuration";

/// A named secret with a minimum length and an alphanumeric constraint
pub struct Credential {
    key: &'static str,
    section: &'static str,
    min_length: usize,
    value: SecretString,
}

impl Credential {
    /// Generate a fresh credential of exactly `length` symbols
    pub fn generate(
        generator: &SecretGenerator,
        key: &'static str,
        section: &'static str,
        length: usize,
    ) -> Result<Self> {
        Self::new(key, section, length, generator.generate(length)?)
    }

    /// Wrap an existing value, enforcing length and character class
    pub fn new(
        key: &'static str,
        section: &'static str,
        min_length: usize,
        value: SecretString,
    ) -> Result<Self> {
        let exposed = value.expose_secret();
        if exposed.len() < min_length {
            return Err(BootstrapError::invalid_config(format!(
                "{} must be at least {} characters",
                key, min_length
            )));
        }
        if !exposed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BootstrapError::invalid_config(format!(
                "{} must be alphanumeric",
                key
            )));
        }
        Ok(Self {
            key,
            section,
            min_length,
            value,
        })
    }

    /// Configuration key the value is emitted under
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Document section the value belongs to
    pub fn section(&self) -> &'static str {
        self.section
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn value(&self) -> &SecretString {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Everything the configuration document needs besides static defaults
#[derive(Debug)]
pub struct CredentialSet {
    pub admin_username: String,
    pub admin_email: String,
    pub secrets: Vec<Credential>,
}

impl CredentialSet {
    /// Admin password, database password and JWT signing secret
    pub fn generate(config: &CredentialConfig, generator: &SecretGenerator) -> Result<Self> {
        let secrets = vec![
            Credential::generate(
                generator,
                "ADMIN_PASSWORD",
                ADMIN_SECTION,
                config.admin_password_length,
            )?,
            Credential::generate(
                generator,
                "DB_PASSWORD",
                DATABASE_SECTION,
                config.db_password_length,
            )?,
            Credential::generate(
                generator,
                "JWT_SECRET",
                JWT_SECTION,
                config.jwt_secret_length,
            )?,
        ];
        Ok(Self {
            admin_username: config.admin_username.clone(),
            admin_email: config.admin_email.clone(),
            secrets,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Credential> {
        self.secrets.iter().find(|c| c.key == key)
    }
}

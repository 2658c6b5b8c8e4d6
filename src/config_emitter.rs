//! Runtime configuration document
//!
//! Merges generated credentials into the static `KEY=VALUE` sections and writes the
//! result once, atomically, with owner-only permissions.
//!
//! Merge rule for each credential:
//! 1. a static entry with the same key has its value replaced in place,
//! 2. otherwise the credential is appended to the section it belongs to,
//! 3. otherwise a new section is created ahead of the static ones.

use crate::configs::{is_env_key, EnvSection};
use crate::credentials::{CredentialSet, ADMIN_SECTION};
use crate::error::{BootstrapError, Result};
use crate::secure_file::{write_atomic, PRIVATE_MODE};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// A document value; secrets stay wrapped until rendering
pub enum EntryValue {
    Plain(String),
    Secret(SecretString),
}

impl EntryValue {
    fn expose(&self) -> &str {
        match self {
            EntryValue::Plain(value) => value,
            EntryValue::Secret(value) => value.expose_secret(),
        }
    }
}

impl fmt::Debug for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryValue::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            EntryValue::Secret(_) => f.write_str("Secret(<redacted>)"),
        }
    }
}

#[derive(Debug)]
pub struct DocumentEntry {
    pub key: String,
    pub value: EntryValue,
}

#[derive(Debug)]
pub struct DocumentSection {
    pub title: String,
    pub entries: Vec<DocumentEntry>,
}

/// Ordered key/value document grouped by concern
#[derive(Debug, Default)]
pub struct ConfigurationDocument {
    sections: Vec<DocumentSection>,
    /// Sections added for credentials, kept ahead of the static ones
    created_sections: usize,
}

impl ConfigurationDocument {
    /// Compose credentials with the static defaults
    pub fn compose(credentials: &CredentialSet, defaults: &[EnvSection]) -> Result<Self> {
        let mut document = Self {
            sections: defaults
                .iter()
                .map(|section| DocumentSection {
                    title: section.title.clone(),
                    entries: section
                        .entries
                        .iter()
                        .map(|entry| DocumentEntry {
                            key: entry.key.clone(),
                            value: EntryValue::Plain(entry.value.clone()),
                        })
                        .collect(),
                })
                .collect(),
            created_sections: 0,
        };

        document.set_plain(ADMIN_SECTION, "ADMIN_USERNAME", &credentials.admin_username);
        for credential in &credentials.secrets {
            document.set(
                credential.section(),
                credential.key(),
                EntryValue::Secret(SecretString::from(
                    credential.value().expose_secret().to_string(),
                )),
            );
        }
        document.set_plain(ADMIN_SECTION, "ADMIN_EMAIL", &credentials.admin_email);

        document.validate()?;
        Ok(document)
    }

    fn set_plain(&mut self, section: &str, key: &str, value: &str) {
        self.set(section, key, EntryValue::Plain(value.to_string()));
    }

    fn set(&mut self, section: &str, key: &str, value: EntryValue) {
        for existing in self.sections.iter_mut().flat_map(|s| s.entries.iter_mut()) {
            if existing.key == key {
                existing.value = value;
                return;
            }
        }

        let entry = DocumentEntry {
            key: key.to_string(),
            value,
        };
        match self.sections.iter_mut().find(|s| s.title == section) {
            Some(existing) => existing.entries.push(entry),
            None => {
                self.sections.insert(
                    self.created_sections,
                    DocumentSection {
                        title: section.to_string(),
                        entries: vec![entry],
                    },
                );
                self.created_sections += 1;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for entry in self.sections.iter().flat_map(|s| s.entries.iter()) {
            if !is_env_key(&entry.key) {
                return Err(BootstrapError::invalid_config(format!(
                    "invalid configuration key {:?}",
                    entry.key
                )));
            }
            if entry.value.expose().contains(['\n', '\r']) {
                return Err(BootstrapError::invalid_config(format!(
                    "value of {} spans multiple lines",
                    entry.key
                )));
            }
        }
        Ok(())
    }

    pub fn sections(&self) -> &[DocumentSection] {
        &self.sections
    }

    pub fn get(&self, key: &str) -> Option<&EntryValue> {
        self.sections
            .iter()
            .flat_map(|s| s.entries.iter())
            .find(|e| e.key == key)
            .map(|e| &e.value)
    }

    /// `# Title` header, `KEY=VALUE` lines, blank line between sections
    pub fn render(&self) -> SecretString {
        let mut out = String::new();
        for (index, section) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push_str("# ");
            out.push_str(&section.title);
            out.push('\n');
            for entry in &section.entries {
                out.push_str(&entry.key);
                out.push('=');
                out.push_str(entry.value.expose());
                out.push('\n');
            }
        }
        SecretString::from(out)
    }
}

/// Writes the configuration document to its single artifact
#[derive(Debug, Clone)]
pub struct ConfigEmitter {
    path: PathBuf,
}

impl ConfigEmitter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compose, render and atomically persist the document (mode 0600)
    pub fn emit(&self, credentials: &CredentialSet, defaults: &[EnvSection]) -> Result<PathBuf> {
        let document = ConfigurationDocument::compose(credentials, defaults)?;
        let rendered = document.render();
        write_atomic(&self.path, rendered.expose_secret().as_bytes(), PRIVATE_MODE)?;
        info!(
            path = %self.path.display(),
            sections = document.sections().len(),
            "wrote configuration document"
        );
        Ok(self.path.clone())
    }
}

//! Alphanumeric secrets from the OpenSSL CSPRNG

use crate::error::{BootstrapError, Result};
use secrecy::SecretString;

/// Upper case, lower case and digits
pub const ALPHANUMERIC: &[u8; 62] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of 62 that fits in a byte; bytes at or above it are rejected
/// so every symbol is equally likely.
const REJECTION_BOUND: u8 = 248;

#[derive(Debug, Default, Clone, Copy)]
pub struct SecretGenerator;

impl SecretGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Produce `length` symbols drawn uniformly from [`ALPHANUMERIC`]
    ///
    /// # Errors
    /// * `InvalidSecretLength` if `length` is zero
    /// * `EntropyUnavailable` if the CSPRNG fails
    pub fn generate(&self, length: usize) -> Result<SecretString> {
        if length == 0 {
            return Err(BootstrapError::InvalidSecretLength);
        }

        let mut secret = String::with_capacity(length);
        let mut pool = [0u8; 64];
        while secret.len() < length {
            openssl::rand::rand_bytes(&mut pool).map_err(BootstrapError::EntropyUnavailable)?;
            for &byte in pool.iter().filter(|&&b| b < REJECTION_BOUND) {
                if secret.len() == length {
                    break;
                }
                secret.push(ALPHANUMERIC[(byte % 62) as usize] as char);
            }
        }
        pool.fill(0);

        Ok(SecretString::from(secret))
    }
}

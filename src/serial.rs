//! Persistent certificate serial counter
//!
//! Stored next to the CA as upper-case hex followed by a newline, the same format
//! `openssl x509 -CAserial` uses. The successor is persisted before a serial is handed
//! out, so a serial is never reused even if the run dies right after signing.

use crate::error::{encoding, BootstrapError, Result};
use crate::secure_file::{write_atomic, PUBLIC_MODE};
use openssl::asn1::Asn1Integer;
use openssl::bn::{BigNum, MsbOption};
use std::path::{Path, PathBuf};

/// Bits of randomness in a freshly seeded counter; leaves the value positive in ASN.1
const SEED_BITS: i32 = 127;

#[derive(Debug)]
pub struct SerialCounter {
    path: PathBuf,
    next: BigNum,
}

impl SerialCounter {
    /// Start a new counter at a random value and persist it
    pub fn seed(path: &Path) -> Result<Self> {
        let mut next = BigNum::new().map_err(encoding("Failed to allocate serial"))?;
        next.rand(SEED_BITS, MsbOption::MAYBE_ZERO, false)
            .map_err(BootstrapError::EntropyUnavailable)?;
        let counter = Self {
            path: path.to_path_buf(),
            next,
        };
        counter.store()?;
        Ok(counter)
    }

    /// Resume from an existing serial file, or seed one if it is missing
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Self::seed(path);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| BootstrapError::io(path, e))?;
        let next = BigNum::from_hex_str(contents.trim())
            .map_err(encoding("Failed to parse serial file"))?;
        Ok(Self {
            path: path.to_path_buf(),
            next,
        })
    }

    /// Hand out the current serial and persist its successor
    pub fn next_serial(&mut self) -> Result<Asn1Integer> {
        let serial = self
            .next
            .to_asn1_integer()
            .map_err(encoding("Failed to encode serial number"))?;
        self.next
            .add_word(1)
            .map_err(encoding("Failed to advance serial number"))?;
        self.store()?;
        Ok(serial)
    }

    /// Hex form of the serial the next call will return
    pub fn peek_hex(&self) -> Result<String> {
        let hex = self
            .next
            .to_hex_str()
            .map_err(encoding("Failed to format serial number"))?;
        Ok(hex.to_string())
    }

    fn store(&self) -> Result<()> {
        let hex = self.peek_hex()?;
        write_atomic(&self.path, format!("{}\n", hex).as_bytes(), PUBLIC_MODE)
    }
}

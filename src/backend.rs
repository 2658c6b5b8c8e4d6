//! Cryptographic backend availability check
//!
//! Runs before any file is touched so a missing or unusable OpenSSL aborts the
//! bootstrap with nothing written.

use crate::error::{BootstrapError, Result};
use tracing::debug;

/// OpenSSL 1.1.1, encoded the way `OpenSSL_version_num` reports it
const MIN_OPENSSL_VERSION: i64 = 0x1010_1000;

/// Verify the linked OpenSSL is recent enough and its CSPRNG can produce bytes
pub fn ensure_available() -> Result<()> {
    openssl::init();

    let version = openssl::version::number();
    if version < MIN_OPENSSL_VERSION {
        return Err(BootstrapError::DependencyUnavailable {
            reason: format!(
                "{} is too old, OpenSSL 1.1.1 or newer is required",
                openssl::version::version()
            ),
        });
    }

    let mut probe = [0u8; 1];
    openssl::rand::rand_bytes(&mut probe).map_err(BootstrapError::EntropyUnavailable)?;

    debug!(version = openssl::version::version(), "cryptographic backend ready");
    Ok(())
}

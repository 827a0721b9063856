//! Ed25519 key material for block sealing.
//!
//! On startup the signing key is loaded from
//! `<data-dir>/keys/forensics_ed25519.key` (a hex-encoded 32-byte
//! seed); if absent a fresh pair is generated and persisted with
//! key mode 0600, public key mode 0644. The public key hex is logged
//! for external auditors.

use crate::error::{Result, SiemError};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use tracing::{info, warn};

const COMPONENT: &str = "forensics";
const PRIV_FILE: &str = "forensics_ed25519.key";
const PUB_FILE: &str = "forensics_ed25519_pub.key";

/// A loaded or freshly generated signing pair.
pub struct SealingKeys {
    /// Private signing key
    pub signing: SigningKey,
    /// Public verification key
    pub verifying: VerifyingKey,
}

impl SealingKeys {
    /// Hex form of the public key, for auditors.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying.as_bytes())
    }
}

/// Load the pair from `keys_dir`, generating and persisting a new one
/// when none exists.
pub fn load_or_generate(keys_dir: &Path) -> Result<SealingKeys> {
    std::fs::create_dir_all(keys_dir).map_err(|e| SiemError::io(COMPONENT, e))?;
    let priv_path = keys_dir.join(PRIV_FILE);
    let pub_path = keys_dir.join(PUB_FILE);

    if priv_path.exists() {
        let text = std::fs::read_to_string(&priv_path).map_err(|e| SiemError::io(COMPONENT, e))?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| SiemError::malformed(COMPONENT, format!("signing key file: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            SiemError::malformed(COMPONENT, "signing key file must hold a 32-byte hex seed")
        })?;
        let signing = SigningKey::from_bytes(&seed);
        let verifying = signing.verifying_key();
        info!(path = %priv_path.display(), "loaded block signing key");
        return Ok(SealingKeys { signing, verifying });
    }

    let signing = SigningKey::generate(&mut OsRng);
    let verifying = signing.verifying_key();

    std::fs::write(&priv_path, hex::encode(signing.to_bytes()))
        .map_err(|e| SiemError::io(COMPONENT, e))?;
    set_mode(&priv_path, 0o600);

    if let Err(e) = std::fs::write(&pub_path, hex::encode(verifying.as_bytes())) {
        warn!(path = %pub_path.display(), error = %e, "could not persist public key");
    } else {
        set_mode(&pub_path, 0o644);
    }

    info!(
        path = %priv_path.display(),
        public_key = %hex::encode(verifying.as_bytes()),
        "generated new block signing key"
    );
    Ok(SealingKeys { signing, verifying })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), error = %e, "could not set key file permissions");
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

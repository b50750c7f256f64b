use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Salt length in bytes. Salts are public but must be unique per encryption.
pub const SALT_LEN: usize = 16;

/// Length of each derived key in bytes.
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count.
pub const PBKDF2_ROUNDS: u32 = 4096;

/// Independent encryption and authentication keys derived from one
/// passphrase and salt.
///
/// Both keys come from a single PBKDF2 invocation requesting 64 bytes of
/// key material, split in half. Key material is wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub encryption: [u8; KEY_LEN],
    pub authentication: [u8; KEY_LEN],
}

impl DerivedKeys {
    /// Derives the key pair with PBKDF2-HMAC-SHA-256 and
    /// [`PBKDF2_ROUNDS`] iterations. Deterministic for a given
    /// passphrase and salt.
    #[must_use]
    pub fn derive(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> Self {
        let mut material = [0u8; KEY_LEN * 2];
        pbkdf2_hmac::<Sha256>(passphrase, salt, PBKDF2_ROUNDS, &mut material);
        let mut encryption = [0u8; KEY_LEN];
        let mut authentication = [0u8; KEY_LEN];
        encryption.copy_from_slice(&material[..KEY_LEN]);
        authentication.copy_from_slice(&material[KEY_LEN..]);
        material.zeroize();
        Self {
            encryption,
            authentication,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let salt = [3u8; SALT_LEN];
        let a = DerivedKeys::derive(b"correct horse", &salt);
        let b = DerivedKeys::derive(b"correct horse", &salt);
        assert_eq!(a.encryption, b.encryption);
        assert_eq!(a.authentication, b.authentication);
    }

    #[test]
    fn keys_are_independent() {
        let salt = [3u8; SALT_LEN];
        let keys = DerivedKeys::derive(b"correct horse", &salt);
        assert_ne!(keys.encryption, keys.authentication);
    }

    #[test]
    fn salt_changes_both_keys() {
        let a = DerivedKeys::derive(b"pass", &[0u8; SALT_LEN]);
        let b = DerivedKeys::derive(b"pass", &[1u8; SALT_LEN]);
        assert_ne!(a.encryption, b.encryption);
        assert_ne!(a.authentication, b.authentication);
    }
}

//! Streaming passphrase-based encryption for backup archives.
//!
//! Confidentiality comes from AES-256 in CBC mode with a random IV; keys
//! are derived from the passphrase with PBKDF2 (4096 rounds of
//! HMAC-SHA-256) and a random 16-byte salt; integrity is verified with an
//! HMAC-SHA-256 tag over the whole stream. See [`stream`] for the byte
//! layout.
//!
//! The encryption and authentication keys are independent halves of the
//! derived key material; reusing one key for both purposes would let a
//! ciphertext forgery go unnoticed.
//!
//! ```no_run
//! use std::io;
//!
//! let passphrase = b"correct horse battery staple";
//! let mut ciphertext = Vec::new();
//! chlorocrypt::encrypt(passphrase, &b"attack at dawn"[..], &mut ciphertext)?;
//! let mut plaintext = Vec::new();
//! chlorocrypt::decrypt(passphrase, ciphertext.as_slice(), &mut plaintext)?;
//! assert_eq!(plaintext, b"attack at dawn");
//! # Ok::<(), io::Error>(())
//! ```

pub mod cbc;
pub mod error;
pub mod kdf;
pub mod padding;
pub mod stream;

pub use crate::error::Error;
pub use crate::stream::{
    decrypt, encrypt, encrypted_len, DecryptingReader, EncryptingReader, HEADER_LEN, IV_LEN,
    TAG_LEN,
};

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256Dec, Aes256Enc, Block};

use crate::kdf::KEY_LEN;
use crate::padding::BLOCK_LEN;

/// Incremental AES-256-CBC encryption, one block per call.
///
/// Holds exactly one block of chaining state between calls. Callers are
/// responsible for buffering data to block boundaries; the `[u8; BLOCK_LEN]`
/// parameter makes a wrong-sized block unrepresentable.
pub struct CbcEncryptor {
    cipher: Aes256Enc,
    chain: [u8; BLOCK_LEN],
}

impl CbcEncryptor {
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN], iv: &[u8; BLOCK_LEN]) -> Self {
        Self {
            cipher: Aes256Enc::new(key.into()),
            chain: *iv,
        }
    }

    /// XORs the plaintext with the previous ciphertext block (the IV for the
    /// first call), encrypts, and stores the result as the new chain state.
    pub fn encrypt_block(&mut self, plaintext: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut block = Block::clone_from_slice(&self.chain);
        for (byte, plain) in block.iter_mut().zip(plaintext) {
            *byte ^= plain;
        }
        self.cipher.encrypt_block(&mut block);
        self.chain.copy_from_slice(&block);
        self.chain
    }
}

/// Incremental AES-256-CBC decryption, one block per call.
pub struct CbcDecryptor {
    cipher: Aes256Dec,
    chain: [u8; BLOCK_LEN],
}

impl CbcDecryptor {
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN], iv: &[u8; BLOCK_LEN]) -> Self {
        Self {
            cipher: Aes256Dec::new(key.into()),
            chain: *iv,
        }
    }

    /// Decrypts, XORs with the previous ciphertext block (the IV for the
    /// first call), and stores the input as the new chain state.
    pub fn decrypt_block(&mut self, ciphertext: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut block = Block::clone_from_slice(ciphertext);
        self.cipher.decrypt_block(&mut block);
        let mut plaintext = [0u8; BLOCK_LEN];
        for ((out, byte), prev) in plaintext.iter_mut().zip(&block).zip(&self.chain) {
            *out = byte ^ prev;
        }
        self.chain = *ciphertext;
        plaintext
    }
}

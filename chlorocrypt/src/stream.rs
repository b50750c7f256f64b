//! Pull-based encrypting and decrypting byte streams.
//!
//! An encrypted stream has the following layout:
//!
//! - salt (16 bytes) - public, mixed into key derivation
//! - IV (16 bytes) - public, seeds the CBC chain
//! - ciphertext (a multiple of 16 bytes, at least one block of padding)
//! - authentication tag (32 bytes) - HMAC-SHA-256 over salt, IV and
//!   ciphertext, in stream order
//!
//! Both readers work in a single forward pass and buffer only a constant
//! amount of state, so arbitrarily large streams can be processed without
//! holding them in memory. [`DecryptingReader`] emits plaintext blocks as
//! soon as they are decrypted, except for the final block, which is held
//! back until the tag verifies. A tamper confined to an earlier block is
//! still detected at end of stream, but only after that block's plaintext
//! has been handed to the caller; callers that need all-or-nothing
//! semantics must buffer the output and discard it on failure.

use std::io::{self, Read, Write};

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::Sha256;

use crate::cbc::{CbcDecryptor, CbcEncryptor};
use crate::error::Error;
use crate::kdf::{DerivedKeys, SALT_LEN};
use crate::padding::{self, BLOCK_LEN};

type HmacSha256 = Hmac<Sha256>;

/// Initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 32;

/// Stream header length: salt followed by IV.
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN;

/// How many bytes are pulled from the underlying source at a time.
const SOURCE_CHUNK: usize = 4 * 1024;

/// The decrypting reader never decrypts a block until at least this many
/// bytes of ciphertext follow it, which guarantees the block is not part
/// of the trailing tag and is not the final (padded) block.
const HOLDBACK: usize = TAG_LEN + BLOCK_LEN;

/// Exact encrypted stream length for a plaintext of `plain_len` bytes.
///
/// Header, padding and tag overhead are all deterministic, so callers that
/// know the plaintext size (e.g. an HTTP upload that must send
/// Content-Length) can compute the ciphertext size up front.
#[must_use]
pub fn encrypted_len(plain_len: u64) -> u64 {
    let block = BLOCK_LEN as u64;
    let padded = plain_len - plain_len % block + block;
    HEADER_LEN as u64 + padded + TAG_LEN as u64
}

fn as_block(bytes: &[u8]) -> &[u8; BLOCK_LEN] {
    bytes.try_into().expect("caller passes exactly one block")
}

/// Reads until `buf` is full or the source is exhausted.
/// Returns the number of bytes actually read.
fn read_full(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let len = source.read(&mut buf[filled..])?;
        if len == 0 {
            break;
        }
        filled += len;
    }
    Ok(filled)
}

/// Encrypts a plaintext source into a self-describing encrypted stream.
///
/// Produces `header || ciphertext || tag` lazily as it is read. The source
/// is consumed exactly once, in order. A fresh salt and IV are generated
/// per reader, so encrypting the same plaintext twice yields different
/// streams.
pub struct EncryptingReader<R> {
    /// Taken on end of input, after the padded tail and tag are queued.
    source: Option<R>,
    cbc: CbcEncryptor,
    mac: HmacSha256,
    /// Plaintext still short of a full cipher block.
    partial: Vec<u8>,
    /// Output bytes ready to hand to the caller.
    pending: Vec<u8>,
}

impl<R: Read> EncryptingReader<R> {
    /// Derives keys from the passphrase and a fresh salt, and queues the
    /// stream header. No data is pulled from `source` until the first read.
    pub fn new(source: R, passphrase: &[u8]) -> io::Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.try_fill_bytes(&mut salt).map_err(io::Error::other)?;
        let mut iv = [0u8; IV_LEN];
        OsRng.try_fill_bytes(&mut iv).map_err(io::Error::other)?;
        Ok(Self::with_salt_and_iv(source, passphrase, salt, iv))
    }

    fn with_salt_and_iv(
        source: R,
        passphrase: &[u8],
        salt: [u8; SALT_LEN],
        iv: [u8; IV_LEN],
    ) -> Self {
        let keys = DerivedKeys::derive(passphrase, &salt);
        let mut mac = HmacSha256::new_from_slice(&keys.authentication)
            .expect("hmac accepts any key length");
        mac.update(&salt);
        mac.update(&iv);
        let mut pending = Vec::with_capacity(HEADER_LEN + SOURCE_CHUNK + BLOCK_LEN);
        pending.extend_from_slice(&salt);
        pending.extend_from_slice(&iv);
        Self {
            source: Some(source),
            cbc: CbcEncryptor::new(&keys.encryption, &iv),
            mac,
            partial: Vec::with_capacity(BLOCK_LEN),
            pending,
        }
    }

    fn encrypt_and_queue(&mut self, block: &[u8; BLOCK_LEN]) {
        let ciphertext = self.cbc.encrypt_block(block);
        self.mac.update(&ciphertext);
        self.pending.extend_from_slice(&ciphertext);
    }

    /// Pulls one chunk from the source and turns it into pending output.
    /// On end of input, queues the padded tail and the tag.
    fn fill_pending(&mut self) -> io::Result<()> {
        let Some(source) = &mut self.source else {
            return Ok(());
        };
        let mut chunk = [0u8; SOURCE_CHUNK];
        let len = source.read(&mut chunk)?;
        if len == 0 {
            self.source = None;
            let padded = padding::pad(&self.partial);
            self.partial.clear();
            for block in padded.chunks_exact(BLOCK_LEN) {
                let block = *as_block(block);
                self.encrypt_and_queue(&block);
            }
            let tag = self.mac.finalize_reset().into_bytes();
            self.pending.extend_from_slice(&tag);
            return Ok(());
        }
        self.partial.extend_from_slice(&chunk[..len]);
        let whole = self.partial.len() - self.partial.len() % BLOCK_LEN;
        for offset in (0..whole).step_by(BLOCK_LEN) {
            let block = *as_block(&self.partial[offset..offset + BLOCK_LEN]);
            self.encrypt_and_queue(&block);
        }
        self.partial.drain(..whole);
        Ok(())
    }
}

impl<R: Read> Read for EncryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() && self.source.is_some() {
            self.fill_pending()?;
        }
        let len = self.pending.len().min(buf.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.drain(..len);
        Ok(len)
    }
}

/// Decrypts a stream produced by [`EncryptingReader`], verifying the
/// trailing tag before releasing the final plaintext block.
///
/// The header is consumed and keys are derived when the reader is created,
/// so a stream too short to hold a header fails immediately. A truncated or
/// tampered stream surfaces as an [`Error`] wrapped in the returned
/// `io::Error`; use [`Error::find_in`] to classify it.
pub struct DecryptingReader<R> {
    /// Taken on end of input, after the tag has been verified.
    source: Option<R>,
    cbc: CbcDecryptor,
    mac: HmacSha256,
    /// Ciphertext read from the source but not yet classified: the last
    /// [`TAG_LEN`] bytes of the stream are the tag, which is only known
    /// at end of input, so decryption lags behind by [`HOLDBACK`] bytes.
    lookahead: Vec<u8>,
    /// Plaintext ready to hand to the caller.
    pending: Vec<u8>,
}

impl<R: Read> DecryptingReader<R> {
    /// Reads the stream header and derives keys from the passphrase and
    /// the salt found there.
    pub fn new(mut source: R, passphrase: &[u8]) -> io::Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        if read_full(&mut source, &mut header)? != HEADER_LEN {
            return Err(Error::Truncated("missing stream header").into());
        }
        let salt = *as_block(&header[..SALT_LEN]);
        let iv = *as_block(&header[SALT_LEN..]);
        let keys = DerivedKeys::derive(passphrase, &salt);
        let mut mac = HmacSha256::new_from_slice(&keys.authentication)
            .expect("hmac accepts any key length");
        mac.update(&header);
        Ok(Self {
            source: Some(source),
            cbc: CbcDecryptor::new(&keys.encryption, &iv),
            mac,
            lookahead: Vec::with_capacity(SOURCE_CHUNK + HOLDBACK),
            pending: Vec::with_capacity(SOURCE_CHUNK),
        })
    }

    /// Pulls one chunk from the source and decrypts every block that
    /// provably precedes the trailing tag. One extra block is held back so
    /// that the final plaintext block is never released before the tag
    /// verifies.
    fn advance(&mut self) -> io::Result<()> {
        let Some(source) = &mut self.source else {
            return Ok(());
        };
        let mut chunk = [0u8; SOURCE_CHUNK];
        let len = source.read(&mut chunk)?;
        if len == 0 {
            self.source = None;
            return self.finish();
        }
        self.lookahead.extend_from_slice(&chunk[..len]);
        let mut consumed = 0;
        while self.lookahead.len() - consumed >= HOLDBACK + BLOCK_LEN {
            let block = *as_block(&self.lookahead[consumed..consumed + BLOCK_LEN]);
            self.mac.update(&block);
            let plaintext = self.cbc.decrypt_block(&block);
            self.pending.extend_from_slice(&plaintext);
            consumed += BLOCK_LEN;
        }
        self.lookahead.drain(..consumed);
        Ok(())
    }

    /// Called once, at end of input: splits the tag off the lookahead,
    /// verifies it over everything consumed so far, then unpads and
    /// releases the withheld tail.
    fn finish(&mut self) -> io::Result<()> {
        if self.lookahead.len() < TAG_LEN + BLOCK_LEN {
            return Err(Error::Truncated("missing authentication tag").into());
        }
        let tag_start = self.lookahead.len() - TAG_LEN;
        if tag_start % BLOCK_LEN != 0 {
            return Err(Error::Truncated("stream ends in the middle of a block").into());
        }
        let mut tail = Vec::with_capacity(tag_start);
        for offset in (0..tag_start).step_by(BLOCK_LEN) {
            let block = *as_block(&self.lookahead[offset..offset + BLOCK_LEN]);
            self.mac.update(&block);
            tail.extend_from_slice(&self.cbc.decrypt_block(&block));
        }
        let received_tag = &self.lookahead[tag_start..];
        // Constant-time comparison; the clone is consumed by the check.
        self.mac
            .clone()
            .verify_slice(received_tag)
            .map_err(|_| Error::Integrity)?;
        let plaintext = padding::unpad(&tail).map_err(|_| Error::Integrity)?;
        self.pending.extend_from_slice(plaintext);
        self.lookahead.clear();
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() && self.source.is_some() {
            self.advance()?;
        }
        let len = self.pending.len().min(buf.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.drain(..len);
        Ok(len)
    }
}

/// Encrypts everything from `source` into `sink`.
/// Returns the number of encrypted bytes written.
pub fn encrypt(passphrase: &[u8], source: impl Read, sink: &mut impl Write) -> io::Result<u64> {
    let mut reader = EncryptingReader::new(source, passphrase)?;
    io::copy(&mut reader, sink)
}

/// Decrypts everything from `source` into `sink`, verifying integrity.
/// Returns the number of plaintext bytes written.
pub fn decrypt(passphrase: &[u8], source: impl Read, sink: &mut impl Write) -> io::Result<u64> {
    let mut reader = DecryptingReader::new(source, passphrase)?;
    io::copy(&mut reader, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    const PASSPHRASE: &[u8] = b"correct horse battery staple";

    fn encrypt_to_vec(plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt(PASSPHRASE, plaintext, &mut out).unwrap();
        out
    }

    fn decrypt_to_vec(ciphertext: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        decrypt(PASSPHRASE, ciphertext, &mut out)?;
        Ok(out)
    }

    fn expect_integrity(result: io::Result<Vec<u8>>) {
        let err = result.unwrap_err();
        assert!(
            matches!(Error::find_in(&err), Some(Error::Integrity)),
            "expected integrity error, got {err:?}"
        );
    }

    #[test]
    fn roundtrip_various_lengths() {
        for len in [0usize, 1, 15, 16, 17, 65536, 200_001] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = encrypt_to_vec(&plaintext);
            assert_eq!(ciphertext.len() as u64, encrypted_len(len as u64));
            assert_eq!(decrypt_to_vec(&ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn encryption_is_randomized() {
        let plaintext = b"same input, different streams";
        let a = encrypt_to_vec(plaintext);
        let b = encrypt_to_vec(plaintext);
        assert_ne!(a, b);
        assert_eq!(decrypt_to_vec(&a).unwrap(), plaintext);
        assert_eq!(decrypt_to_vec(&b).unwrap(), plaintext);
    }

    #[test]
    fn any_flipped_byte_is_detected() {
        let plaintext: Vec<u8> = (0..100u8).collect();
        let ciphertext = encrypt_to_vec(&plaintext);
        // Flip every byte of the ciphertext and tag regions in turn.
        for index in HEADER_LEN..ciphertext.len() {
            let mut damaged = ciphertext.clone();
            damaged[index] ^= 0x01;
            expect_integrity(decrypt_to_vec(&damaged));
        }
    }

    #[test]
    fn damaged_header_is_detected() {
        let ciphertext = encrypt_to_vec(b"some data");
        // A damaged salt or IV derails key derivation or the first block;
        // either way the tag must not verify.
        for index in 0..HEADER_LEN {
            let mut damaged = ciphertext.clone();
            damaged[index] ^= 0x01;
            expect_integrity(decrypt_to_vec(&damaged));
        }
    }

    #[test]
    fn wrong_passphrase_is_detected() {
        let ciphertext = encrypt_to_vec(b"attack at dawn");
        let mut out = Vec::new();
        let err = decrypt(b"wrong passphrase", ciphertext.as_slice(), &mut out).unwrap_err();
        assert!(matches!(Error::find_in(&err), Some(Error::Integrity)));
    }

    #[test]
    fn truncated_streams_are_detected() {
        let ciphertext = encrypt_to_vec(b"0123456789abcdef0123456789");
        // Missing header entirely.
        for len in 0..HEADER_LEN {
            let err = decrypt_to_vec(&ciphertext[..len]).unwrap_err();
            assert!(matches!(Error::find_in(&err), Some(Error::Truncated(_))));
            assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
        }
        // Tag partially or fully missing.
        for missing in 1..=TAG_LEN {
            let err = decrypt_to_vec(&ciphertext[..ciphertext.len() - missing]).unwrap_err();
            assert!(matches!(
                Error::find_in(&err),
                Some(Error::Truncated(_) | Error::Integrity)
            ));
        }
        // Header and tag alone, with all ciphertext blocks removed.
        let mut gutted = ciphertext[..HEADER_LEN].to_vec();
        gutted.extend_from_slice(&ciphertext[ciphertext.len() - TAG_LEN..]);
        let err = decrypt_to_vec(&gutted).unwrap_err();
        assert!(matches!(Error::find_in(&err), Some(Error::Truncated(_))));
    }

    #[test]
    fn final_block_is_withheld_until_tag_verifies() {
        let plaintext: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
        let ciphertext = encrypt_to_vec(&plaintext);
        let mut damaged = ciphertext;
        let last = damaged.len() - TAG_LEN - 1;
        damaged[last] ^= 0x01;

        let mut reader = DecryptingReader::new(damaged.as_slice(), PASSPHRASE).unwrap();
        let mut emitted = Vec::new();
        let err = reader.read_to_end(&mut emitted).unwrap_err();
        assert!(matches!(Error::find_in(&err), Some(Error::Integrity)));
        // Whatever leaked before the failure must not include the final
        // block's plaintext.
        assert!(emitted.len() <= plaintext.len() - (plaintext.len() % BLOCK_LEN));
        assert_eq!(emitted, plaintext[..emitted.len()]);
    }

    /// Produces `total` deterministic pseudo-random bytes without ever
    /// materializing them.
    struct GeneratedSource {
        remaining: u64,
        state: u64,
    }

    impl GeneratedSource {
        fn new(total: u64) -> Self {
            Self {
                remaining: total,
                state: 0x9e37_79b9_7f4a_7c15,
            }
        }
    }

    impl Read for GeneratedSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = (self.remaining.min(buf.len() as u64)) as usize;
            for byte in &mut buf[..len] {
                self.state = self.state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                *byte = (self.state >> 56) as u8;
            }
            self.remaining -= len as u64;
            Ok(len)
        }
    }

    /// Verifies written bytes against the same generator and drops them.
    struct CheckingSink {
        expected: GeneratedSource,
        written: u64,
    }

    impl Write for CheckingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut expected = vec![0u8; buf.len()];
            let len = self.expected.read(&mut expected)?;
            assert_eq!(len, buf.len(), "sink received more data than expected");
            assert_eq!(buf, expected.as_slice());
            self.written += buf.len() as u64;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn large_stream_uses_constant_memory() {
        // 8 MiB through encrypt then decrypt without either side ever
        // holding the stream; the source generates bytes on demand and the
        // sink verifies and discards them.
        const TOTAL: u64 = 8 * 1024 * 1024 + 3;
        let encryptor = EncryptingReader::new(GeneratedSource::new(TOTAL), PASSPHRASE).unwrap();
        let mut decryptor = DecryptingReader::new(encryptor, PASSPHRASE).unwrap();
        let mut sink = CheckingSink {
            expected: GeneratedSource::new(TOTAL),
            written: 0,
        };
        let copied = io::copy(&mut decryptor, &mut sink).unwrap();
        assert_eq!(copied, TOTAL);
        assert_eq!(sink.written, TOTAL);
        // The in-flight buffers stay within a few chunks of state.
        assert!(decryptor.lookahead.capacity() <= 2 * (SOURCE_CHUNK + HOLDBACK));
        assert!(decryptor.pending.capacity() <= 4 * SOURCE_CHUNK);
    }

    #[test]
    fn exact_multiple_plaintext_gains_a_padding_block() {
        let plaintext = [0u8; 64];
        let ciphertext = encrypt_to_vec(&plaintext);
        assert_eq!(
            ciphertext.len(),
            HEADER_LEN + plaintext.len() + BLOCK_LEN + TAG_LEN
        );
        assert_eq!(decrypt_to_vec(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn empty_plaintext_still_authenticated() {
        let ciphertext = encrypt_to_vec(b"");
        assert_eq!(ciphertext.len(), HEADER_LEN + BLOCK_LEN + TAG_LEN);
        assert_eq!(decrypt_to_vec(&ciphertext).unwrap(), b"");
        let mut damaged = ciphertext;
        damaged[HEADER_LEN] ^= 0x80;
        expect_integrity(decrypt_to_vec(&damaged));
    }

    #[test]
    fn reads_of_one_byte_work() {
        let plaintext = b"tiny reads exercise the buffering paths";
        let ciphertext = encrypt_to_vec(plaintext);
        let mut reader = DecryptingReader::new(OneByteReader(ciphertext.as_slice()), PASSPHRASE).unwrap();
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte).unwrap() {
                0 => break,
                _ => out.push(byte[0]),
            }
        }
        assert_eq!(out, plaintext);
    }

    /// Yields at most one byte per read call.
    struct OneByteReader<'a>(&'a [u8]);

    impl Read for OneByteReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((&byte, rest)) if !buf.is_empty() => {
                    buf[0] = byte;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }
}

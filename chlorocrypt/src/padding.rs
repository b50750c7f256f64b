use thiserror::Error;

/// Cipher block length in bytes.
pub const BLOCK_LEN: usize = 16;

#[derive(Debug, Error)]
#[error("invalid padding at end of stream")]
pub struct PaddingError;

/// Pads `data` to a whole number of cipher blocks.
///
/// Between 1 and [`BLOCK_LEN`] bytes are appended, each holding the padding
/// length. Padding is always added, so an input that is already an exact
/// multiple of the block size grows by one full block and `unpad` stays
/// unambiguous.
#[must_use]
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_LEN - data.len() % BLOCK_LEN;
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.resize(data.len() + pad_len, pad_len as u8);
    out
}

/// Strips the padding added by [`pad`].
///
/// Fails if the final bytes do not form valid padding. The decrypting stream
/// folds this failure into its integrity error.
pub fn unpad(data: &[u8]) -> Result<&[u8], PaddingError> {
    let last = *data.last().ok_or(PaddingError)?;
    let pad_len = usize::from(last);
    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > data.len() {
        return Err(PaddingError);
    }
    let (rest, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&byte| byte != last) {
        return Err(PaddingError);
    }
    Ok(rest)
}

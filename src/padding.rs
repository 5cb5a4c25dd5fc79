use crate::error::{ConfigError, PaddingError};


fn check_block_length(block_length: usize) -> Result<(), ConfigError> {
    if block_length == 0 || block_length > u8::MAX as usize {
        return Err(ConfigError::InvalidBlockSize);
    }
    Ok(())
}

/// Appends `n` bytes of value `n` so the output is a multiple of
/// `block_length`. A full padding block is added to already aligned input.
pub fn pkcs7(data: &[u8], block_length: usize) -> Result<Vec<u8>, ConfigError> {
    check_block_length(block_length)?;
    let pad_length = block_length - data.len() % block_length;

    let mut padded_data: Vec<u8> = Vec::with_capacity(data.len() + pad_length);
    padded_data.extend_from_slice(data);
    padded_data.resize(data.len() + pad_length, pad_length as u8);

    Ok(padded_data)
}

/// Checks the padding without stripping it and returns the pad length.
/// The pad bytes of the last block are always all inspected.
pub fn validate_pkcs7(data: &[u8], block_length: usize) -> Result<u8, PaddingError> {
    if check_block_length(block_length).is_err()
        || data.is_empty()
        || data.len() % block_length != 0
    {
        return Err(PaddingError::BadLength);
    }

    let pad_length = data[data.len() - 1];
    if pad_length == 0 || pad_length as usize > block_length {
        return Err(PaddingError::BadPadValue);
    }

    if pad_mismatch(&data[data.len() - block_length..], pad_length) != 0 {
        return Err(PaddingError::InconsistentPadBytes);
    }

    Ok(pad_length)
}

pub fn remove_pkcs7(data: &[u8], block_length: usize) -> Result<Vec<u8>, PaddingError> {
    let pad_length = validate_pkcs7(data, block_length)?;

    Ok(data[..data.len() - pad_length as usize].to_vec())
}

/// Single-bit answer used by padding oracles. Every byte of the final block
/// is examined whatever the outcome, so the failure reason is not observable.
pub fn has_valid_pkcs7(data: &[u8], block_length: usize) -> bool {
    if check_block_length(block_length).is_err()
        || data.is_empty()
        || data.len() % block_length != 0
    {
        return false;
    }

    let pad_length = data[data.len() - 1];
    let bad_value = (pad_length == 0) as u8 | (pad_length as usize > block_length) as u8;
    let mismatch = pad_mismatch(&data[data.len() - block_length..], pad_length);

    (bad_value | mismatch) == 0
}

fn pad_mismatch(last_block: &[u8], pad_length: u8) -> u8 {
    last_block
        .iter()
        .rev()
        .enumerate()
        .fold(0u8, |acc, (position, &byte)| {
            let in_pad = ((position < pad_length as usize) as u8).wrapping_neg();
            acc | ((byte ^ pad_length) & in_pad)
        })
}

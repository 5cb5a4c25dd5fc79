use crate::challenges::oracles::PaddingOracleServer;
use crate::error::{AttackError, Error, Res};
use crate::padding;
use crate::xor;
use log::{debug, trace};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aes::AES_BLOCK_SIZE;
    use crate::challenges::oracles::{UserdataMode, UserdataServer, USERDATA_PREFIX};
    use crate::error::DecryptionError;

    fn recover(server: &PaddingOracleServer, plaintext: &[u8]) -> Vec<u8> {
        let iv = crate::challenges::oracles::random_bytes(AES_BLOCK_SIZE);
        let ciphertext = server.encrypt(plaintext, &iv).unwrap();
        recover_plaintext(&ciphertext, &iv, server).unwrap()
    }

    #[test]
    fn test_padding_oracle_empty_plaintext() {
        let server = PaddingOracleServer::new();
        assert_eq!(recover(&server, b""), b"");
    }

    #[test]
    fn test_padding_oracle_single_block() {
        let server = PaddingOracleServer::new();
        assert_eq!(recover(&server, b"ICE ICE BABY"), b"ICE ICE BABY");
        assert_eq!(recover(&server, b"YELLOW SUBMARINE"), b"YELLOW SUBMARINE");
    }

    #[test]
    fn test_padding_oracle_pool_strings() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .init();
        let server = PaddingOracleServer::new();
        for plaintext in server.plaintexts() {
            assert_eq!(recover(&server, &plaintext), plaintext);
        }
    }

    #[test]
    fn test_padding_oracle_random_ciphertext() {
        let server = PaddingOracleServer::new();
        let (ciphertext, iv) = server.ciphertext().unwrap();
        let decrypted = recover_plaintext(&ciphertext, &iv, &server).unwrap();
        assert!(String::from_utf8(decrypted).is_ok());
    }

    #[test]
    fn test_padding_oracle_plaintext_ending_in_pad_like_bytes() {
        let server = PaddingOracleServer::new();
        let ends_in_one = b"fifteen bytes \x01".to_vec();
        assert_eq!(recover(&server, &ends_in_one), ends_in_one);

        // decrypts to ... 0x02 0x02 0x02, a valid-looking pad of two
        let ends_in_two = b"thirteen byte\x02".to_vec();
        assert_eq!(recover(&server, &ends_in_two), ends_in_two);

        let mut block_of_twos = vec![0x02u8; AES_BLOCK_SIZE];
        block_of_twos.extend_from_slice(b"and then some");
        assert_eq!(recover(&server, &block_of_twos), block_of_twos);
    }

    #[test]
    fn test_padding_oracle_with_closure() {
        let server = PaddingOracleServer::new();
        let iv = [7u8; AES_BLOCK_SIZE];
        let ciphertext = server.encrypt(b"closures are oracles too", &iv).unwrap();
        let oracle = |iv: &[u8], ciphertext: &[u8]| server.is_valid_padding(iv, ciphertext);
        assert_eq!(
            recover_plaintext(&ciphertext, &iv, &oracle).unwrap(),
            b"closures are oracles too"
        );
    }

    #[test]
    fn test_padding_oracle_reports_lying_oracles() {
        let ciphertext = [0u8; 32];
        let iv = [0u8; AES_BLOCK_SIZE];
        let always = |_: &[u8], _: &[u8]| true;
        let never = |_: &[u8], _: &[u8]| false;
        assert_eq!(
            break_padding_oracle(&ciphertext, &iv, &always),
            Err(Error::Attack(AttackError::OracleInconsistent {
                block: 0,
                recovered: 0
            }))
        );
        assert_eq!(
            break_padding_oracle(&ciphertext, &iv, &never),
            Err(Error::Attack(AttackError::BruteForceExhausted {
                block: 0,
                recovered: 0
            }))
        );
        assert!(break_padding_oracle(&ciphertext[..20], &iv, &never).is_err());
        assert!(break_padding_oracle(&[], &iv, &never).is_err());
    }

    #[test]
    fn test_cbc_cant_put_admin() {
        let server = UserdataServer::new(UserdataMode::Cbc);
        let ciphertext = server.generate(b"hello;admin=true").unwrap();
        assert_eq!(server.is_admin(&ciphertext).unwrap(), false);
    }

    #[test]
    fn test_cbc_finds_userdata_offset() {
        let server = UserdataServer::new(UserdataMode::Cbc);
        let encrypt = |userdata: &[u8]| server.generate(userdata);
        assert_eq!(
            find_userdata_offset(&encrypt, AES_BLOCK_SIZE).unwrap(),
            USERDATA_PREFIX.len()
        );
    }

    #[test]
    fn test_cbc_make_admin() {
        let server = UserdataServer::new(UserdataMode::Cbc);
        let encrypt = |userdata: &[u8]| server.generate(userdata);
        let forged = inject(&encrypt, AES_BLOCK_SIZE, b";admin=true;").unwrap();
        assert_eq!(server.is_admin(&forged).unwrap(), true);
    }

    #[test]
    fn test_cbc_make_admin_with_unaligned_prefix() {
        let server = UserdataServer::new(UserdataMode::Cbc);
        let encrypt = |userdata: &[u8]| {
            let mut prefixed = b"xyz".to_vec();
            prefixed.extend_from_slice(userdata);
            server.generate(&prefixed)
        };
        assert_eq!(
            find_userdata_offset(&encrypt, AES_BLOCK_SIZE).unwrap(),
            USERDATA_PREFIX.len() + 3
        );
        let forged = inject(&encrypt, AES_BLOCK_SIZE, b";admin=true;").unwrap();
        assert_eq!(server.is_admin(&forged).unwrap(), true);
    }

    #[test]
    fn test_cbc_inject_rejects_oversized_payload() {
        let server = UserdataServer::new(UserdataMode::Cbc);
        let encrypt = |userdata: &[u8]| server.generate(userdata);
        assert_eq!(
            inject(&encrypt, AES_BLOCK_SIZE, &[b'x'; 17]),
            Err(Error::Attack(AttackError::PreconditionViolated(
                "payload is longer than a block"
            )))
        );
    }

    #[test]
    fn test_cbc_key_equals_iv() {
        let server = UserdataServer::new(UserdataMode::CbcKeyAsIv);
        let recovered = recover_key_used_as_iv(
            &|userdata: &[u8]| server.generate(userdata),
            &|ciphertext: &[u8]| server.is_admin(ciphertext),
            AES_BLOCK_SIZE,
        )
        .unwrap();
        assert_eq!(recovered, server.key());
    }

    #[test]
    fn test_key_as_iv_needs_three_leaked_blocks() {
        let server = UserdataServer::new(UserdataMode::CbcKeyAsIv);
        let truncated = |_: &[u8]| -> Res<bool> {
            Err(DecryptionError {
                invalid_plaintext: vec![0x80; 2 * AES_BLOCK_SIZE + 3],
            }
            .into())
        };
        assert_eq!(
            recover_key_used_as_iv(
                &|userdata: &[u8]| server.generate(userdata),
                &truncated,
                AES_BLOCK_SIZE,
            ),
            Err(Error::Attack(AttackError::PreconditionViolated(
                "leaked plaintext is shorter than three blocks"
            )))
        );
    }
}

/// Anything that reveals, for a single IV and ciphertext, whether the
/// decryption ends in valid PKCS#7 padding.
pub trait PaddingOracle {
    fn is_valid_padding(&self, iv: &[u8], ciphertext: &[u8]) -> bool;
}

impl<F> PaddingOracle for F
where
    F: Fn(&[u8], &[u8]) -> bool,
{
    fn is_valid_padding(&self, iv: &[u8], ciphertext: &[u8]) -> bool {
        self(iv, ciphertext)
    }
}

impl PaddingOracle for PaddingOracleServer {
    fn is_valid_padding(&self, iv: &[u8], ciphertext: &[u8]) -> bool {
        PaddingOracleServer::is_valid_padding(self, iv, ciphertext)
    }
}

/// Recovers one block. `preceding` is the IV or the previous ciphertext
/// block; each query sends a forged preceding block followed by `target`.
fn break_block<O: PaddingOracle + ?Sized>(
    preceding: &[u8],
    target: &[u8],
    oracle: &O,
    block_index: usize,
) -> Result<Vec<u8>, AttackError> {
    let block_length = target.len();
    let recovered_before = block_index * block_length;
    let mut intermediate = vec![0u8; block_length];
    let mut mutated = preceding.to_vec();

    for reverse_offset in 1..=block_length {
        let index = block_length - reverse_offset;
        let padding_number = reverse_offset as u8;
        for k in index + 1..block_length {
            mutated[k] = intermediate[k] ^ padding_number;
        }

        let mut candidates = Vec::new();
        for byte in 0..=u8::MAX {
            mutated[index] = byte;
            if !oracle.is_valid_padding(&mutated, target) {
                continue;
            }
            if reverse_offset == 1 && index > 0 {
                // a longer pad such as 02 02 also validates; changing the
                // byte before only keeps a single byte pad valid
                mutated[index - 1] ^= 0x01;
                let still_valid = oracle.is_valid_padding(&mutated, target);
                mutated[index - 1] ^= 0x01;
                if !still_valid {
                    continue;
                }
            }
            candidates.push(byte);
        }

        let recovered = recovered_before + reverse_offset - 1;
        match candidates.as_slice() {
            [byte] => intermediate[index] = byte ^ padding_number,
            [] => {
                return Err(AttackError::BruteForceExhausted {
                    block: block_index,
                    recovered,
                })
            }
            _ => {
                return Err(AttackError::OracleInconsistent {
                    block: block_index,
                    recovered,
                })
            }
        }
        trace!(
            "block {} byte {} recovered after {} candidates",
            block_index,
            index,
            candidates.len()
        );
    }

    Ok(xor::fixed_xor(&intermediate, preceding))
}

/// Decrypts `ciphertext` through a padding oracle. The result still carries
/// its PKCS#7 padding.
pub fn break_padding_oracle<O: PaddingOracle + ?Sized>(
    ciphertext: &[u8],
    iv: &[u8],
    oracle: &O,
) -> Res<Vec<u8>> {
    let block_length = iv.len();
    if block_length == 0 || ciphertext.is_empty() || ciphertext.len() % block_length != 0 {
        return Err(AttackError::PreconditionViolated(
            "ciphertext is not a non-empty sequence of whole blocks",
        )
        .into());
    }

    let mut plaintext = Vec::with_capacity(ciphertext.len());
    let mut preceding = iv;
    for (block_index, target) in ciphertext.chunks(block_length).enumerate() {
        plaintext.extend(break_block(preceding, target, oracle, block_index)?);
        preceding = target;
    }
    debug!(
        "padding oracle recovered {} blocks",
        ciphertext.len() / block_length
    );

    Ok(plaintext)
}

/// `break_padding_oracle` followed by stripping the recovered padding.
pub fn recover_plaintext<O: PaddingOracle + ?Sized>(
    ciphertext: &[u8],
    iv: &[u8],
    oracle: &O,
) -> Res<Vec<u8>> {
    let padded = break_padding_oracle(ciphertext, iv, oracle)?;
    Ok(padding::remove_pkcs7(&padded, iv.len())?)
}

fn nth_block(data: &[u8], block_length: usize, n: usize) -> Option<&[u8]> {
    data.chunks(block_length).nth(n)
}

/// Finds where userdata starts in the plaintext behind `encrypt`. The first
/// block that changes with the userdata is located, then the shortest run
/// of filler that freezes it tells how much of that block is userdata.
pub fn find_userdata_offset<F>(encrypt: &F, block_length: usize) -> Res<usize>
where
    F: Fn(&[u8]) -> Res<Vec<u8>>,
{
    let without = encrypt(b"")?;
    let with = encrypt(b"A")?;
    let first_changed = without
        .chunks(block_length)
        .zip(with.chunks(block_length))
        .position(|(a, b)| a != b)
        .ok_or(AttackError::PreconditionViolated(
            "userdata does not reach the ciphertext",
        ))?;

    for filler in 0..=block_length {
        let mut first = vec![b'A'; filler];
        let mut second = first.clone();
        first.push(b'X');
        second.push(b'Y');
        let first = encrypt(&first)?;
        let second = encrypt(&second)?;
        if nth_block(&first, block_length, first_changed)
            == nth_block(&second, block_length, first_changed)
        {
            let offset = (first_changed + 1) * block_length - filler;
            debug!("userdata starts at offset {}", offset);
            return Ok(offset);
        }
    }

    Err(AttackError::PreconditionViolated("userdata block never stabilized").into())
}

/// Produces a ciphertext that decrypts with `payload` in place of a block of
/// filler. The block in front of it decrypts to garbage.
pub fn inject<F>(encrypt: &F, block_length: usize, payload: &[u8]) -> Res<Vec<u8>>
where
    F: Fn(&[u8]) -> Res<Vec<u8>>,
{
    if payload.len() > block_length {
        return Err(AttackError::PreconditionViolated("payload is longer than a block").into());
    }

    let offset = find_userdata_offset(encrypt, block_length)?;
    let alignment = (block_length - offset % block_length) % block_length;
    let sacrificial_block = (offset + alignment) / block_length;

    const FILLER: u8 = b'a';
    let userdata = vec![FILLER; alignment + 2 * block_length];
    let mut ciphertext = encrypt(&userdata)?;
    if ciphertext.len() < (sacrificial_block + 2) * block_length {
        return Err(AttackError::PreconditionViolated("ciphertext is too short").into());
    }

    let delta: Vec<u8> = payload.iter().map(|b| b ^ FILLER).collect();
    let start = sacrificial_block * block_length;
    xor::xor_in_place(&mut ciphertext[start..start + payload.len()], &delta);

    Ok(ciphertext)
}

/// Against a service that uses its key as IV and echoes plaintexts with
/// high-ASCII bytes, submits `C1 || 0 || C1 || rest` and returns
/// `P'1 xor P'3`, which is the key.
pub fn recover_key_used_as_iv<E, V>(encrypt: &E, verify: &V, block_length: usize) -> Res<Vec<u8>>
where
    E: Fn(&[u8]) -> Res<Vec<u8>>,
    V: Fn(&[u8]) -> Res<bool>,
{
    let ciphertext = encrypt(&vec![b'a'; 3 * block_length])?;
    // the last block and its predecessor must survive untouched
    if ciphertext.len() < 5 * block_length {
        return Err(AttackError::PreconditionViolated("ciphertext is too short").into());
    }

    let first_block = &ciphertext[..block_length];
    let zero_block = vec![0u8; block_length];
    let forged = [
        first_block,
        &zero_block[..],
        first_block,
        &ciphertext[3 * block_length..],
    ]
    .concat();

    match verify(&forged) {
        Err(Error::Decryption(e)) => {
            let leaked = &e.invalid_plaintext;
            match (
                leaked.get(..block_length),
                leaked.get(2 * block_length..3 * block_length),
            ) {
                (Some(first), Some(third)) => Ok(xor::fixed_xor(first, third)),
                _ => Err(AttackError::PreconditionViolated(
                    "leaked plaintext is shorter than three blocks",
                )
                .into()),
            }
        }
        Err(other) => Err(other),
        Ok(_) => Err(AttackError::PreconditionViolated(
            "service accepted the forged ciphertext",
        )
        .into()),
    }
}

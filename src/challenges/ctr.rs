use crate::error::{AttackError, CipherError, Error, Res};
use crate::xor;
use log::{debug, trace};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::oracles::{
        CtrEditServer, FixedNonceCtrServer, UserdataMode, UserdataServer, USERDATA_PREFIX,
    };
    use crate::ctr::CtrCipher;

    const SECRET: &str = "SSdtIGJhY2sgYW5kIEknbSByaW5naW4nIHRoZSBiZWxsIApBIHJvY2tpbicgb24gdGhlIG1pa2Ugd2hpbGUgdGhlIGZseSBnaXJscyB5ZWxsIApJbiBlY3N0YXN5IGluIHRoZSBiYWNrIG9mIG1lIA==";

    #[test]
    fn test_ctr_cant_put_admin() {
        let server = UserdataServer::new(UserdataMode::Ctr);
        let ciphertext = server.generate(b"hello;admin=true").unwrap();
        assert_eq!(server.is_admin(&ciphertext).unwrap(), false);
    }

    #[test]
    fn test_ctr_finds_userdata_offset() {
        let server = UserdataServer::new(UserdataMode::Ctr);
        let encrypt = |userdata: &[u8]| server.generate(userdata);
        assert_eq!(
            find_userdata_offset(&encrypt).unwrap(),
            USERDATA_PREFIX.len()
        );
    }

    #[test]
    fn test_ctr_make_admin() {
        let server = UserdataServer::new(UserdataMode::Ctr);
        let encrypt = |userdata: &[u8]| server.generate(userdata);
        let forged = inject(&encrypt, b";admin=true;").unwrap();
        assert_eq!(server.is_admin(&forged).unwrap(), true);
    }

    #[test]
    fn test_make_admin_with_placeholders() {
        let server = UserdataServer::new(UserdataMode::Ctr);
        let ciphertext = server.generate(b"hello1admin8true").unwrap();
        let forged = flip_bytes(
            &ciphertext,
            USERDATA_PREFIX.len(),
            b"hello1admin8true",
            b"hello;admin=true",
        )
        .unwrap();
        assert_eq!(server.is_admin(&forged).unwrap(), true);
    }

    #[test]
    fn test_flip_bytes_bounds() {
        assert_eq!(
            flip_bytes(b"abc", 2, b"xy", b"zw"),
            Err(Error::Attack(AttackError::PreconditionViolated(
                "flip runs past the ciphertext"
            )))
        );
        assert!(flip_bytes(b"abc", 0, b"xy", b"z").is_err());
    }

    #[test]
    fn test_break_random_access_read_write_ctr() {
        let plaintext = base64::decode(SECRET).unwrap();
        let server = CtrEditServer::new(&plaintext).unwrap();
        let edit = |c: &[u8], offset: usize, newtext: &[u8]| server.edit(c, offset, newtext);
        let recovered = recover_plaintext_with_edit(server.ciphertext(), &edit).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_edit_attack_rejects_misbehaving_oracle() {
        let truncating = |c: &[u8], _: usize, _: &[u8]| -> Res<Vec<u8>> { Ok(c[1..].to_vec()) };
        assert_eq!(
            recover_plaintext_with_edit(b"abcd", &truncating),
            Err(Error::Attack(AttackError::PreconditionViolated(
                "edit oracle changed the ciphertext length"
            )))
        );
        let refusing =
            |_: &[u8], _: usize, _: &[u8]| -> Res<Vec<u8>> { Err(CipherError::SizeMismatch.into()) };
        assert_eq!(
            recover_plaintext_with_edit(b"abcd", &refusing),
            Err(Error::Attack(AttackError::PreconditionViolated(
                "edit oracle refused a full length edit"
            )))
        );
    }

    fn fixed_nonce_corpus() -> Vec<Vec<u8>> {
        include_str!("../../resources/fixed_nonce_ctr.txt")
            .lines()
            .map(|line| base64::decode(line).unwrap())
            .collect()
    }

    #[test]
    fn test_break_fixed_nonce_ctr_statistically() {
        let plaintexts = fixed_nonce_corpus();
        let server = FixedNonceCtrServer::new();
        let ciphertexts: Vec<Vec<u8>> = plaintexts
            .iter()
            .map(|p| server.encrypt(p).unwrap())
            .collect();

        let shortest = plaintexts.iter().map(|p| p.len()).min().unwrap();
        let keystream = recover_fixed_nonce_keystream(&ciphertexts, ciphertexts.len()).unwrap();
        assert_eq!(keystream.len(), shortest);

        // the first column is all capitals, so only its case is a guess
        let real_keystream = server.keystream(shortest).unwrap();
        assert_eq!(keystream[1..], real_keystream[1..]);
        assert_eq!(keystream[0] | 0x20, real_keystream[0] | 0x20);
    }

    #[test]
    fn test_break_fixed_nonce_ctr_past_the_shortest() {
        let plaintexts = fixed_nonce_corpus();
        let server = FixedNonceCtrServer::new();
        let ciphertexts: Vec<Vec<u8>> = plaintexts
            .iter()
            .map(|p| server.encrypt(p).unwrap())
            .collect();

        let recovered = break_fixed_nonce(&ciphertexts, 10).unwrap();
        assert_eq!(recovered.len(), plaintexts.len());
        assert!(recovered.iter().any(|r| r.len() > 20));
        for (guess, plaintext) in recovered.iter().zip(&plaintexts) {
            assert!(guess.eq_ignore_ascii_case(&plaintext[..guess.len()]));
        }
        assert_eq!(
            &recovered[0][1..],
            &b"I have met them at close of day"[1..recovered[0].len()]
        );
    }

    #[test]
    fn test_fixed_nonce_needs_several_ciphertexts() {
        assert_eq!(
            recover_fixed_nonce_keystream(&[b"lonely".to_vec()], 1),
            Err(Error::Attack(AttackError::PreconditionViolated(
                "need at least two ciphertexts under one nonce"
            )))
        );
        let binary = vec![vec![0u8; 4]; 3];
        let keystream = recover_fixed_nonce_keystream(&binary, 3).unwrap();
        assert_eq!(keystream.len(), 4);
    }

    #[test]
    fn test_keystream_reuse() {
        let key = [3u8; 16];
        let first = b"thirty two bytes of plaintext!!!";
        let second = b"and another thirty two of them..";
        let first_ciphertext = CtrCipher::new(&key, 9).unwrap().encrypt(first).unwrap();
        let second_ciphertext = CtrCipher::new(&key, 9).unwrap().encrypt(second).unwrap();
        assert_eq!(
            xor::fixed_xor(&first_ciphertext, &second_ciphertext),
            xor::fixed_xor(first, second)
        );
    }
}

/// In CTR the first byte that differs between two encryptions of one-byte
/// userdata is where the userdata starts.
pub fn find_userdata_offset<F>(encrypt: &F) -> Res<usize>
where
    F: Fn(&[u8]) -> Res<Vec<u8>>,
{
    let first = encrypt(b"A")?;
    let second = encrypt(b"B")?;
    let offset = first
        .iter()
        .zip(&second)
        .position(|(a, b)| a != b)
        .ok_or(AttackError::PreconditionViolated(
            "userdata does not reach the ciphertext",
        ))?;
    debug!("userdata starts at offset {}", offset);
    Ok(offset)
}

/// XORs `known ^ desired` into the ciphertext at `offset`. The keystream
/// cancels, so only those bytes change.
pub fn flip_bytes(ciphertext: &[u8], offset: usize, known: &[u8], desired: &[u8]) -> Res<Vec<u8>> {
    if known.len() != desired.len() {
        return Err(AttackError::PreconditionViolated("known and desired lengths differ").into());
    }
    let end = offset
        .checked_add(desired.len())
        .filter(|&end| end <= ciphertext.len())
        .ok_or(AttackError::PreconditionViolated(
            "flip runs past the ciphertext",
        ))?;

    let mut modified_ciphertext = ciphertext.to_vec();
    xor::xor_in_place(
        &mut modified_ciphertext[offset..end],
        &xor::fixed_xor(known, desired),
    );
    Ok(modified_ciphertext)
}

/// Sends filler of the payload's length as userdata and rewrites it into
/// `payload` after encryption.
pub fn inject<F>(encrypt: &F, payload: &[u8]) -> Res<Vec<u8>>
where
    F: Fn(&[u8]) -> Res<Vec<u8>>,
{
    let offset = find_userdata_offset(encrypt)?;
    let filler = vec![b'a'; payload.len()];
    let ciphertext = encrypt(&filler)?;
    flip_bytes(&ciphertext, offset, &filler, payload)
}

/// Asks the edit oracle to overwrite the whole ciphertext with zeros. The
/// answer is the bare keystream, and XOR with the original gives the
/// plaintext.
pub fn recover_plaintext_with_edit<F>(ciphertext: &[u8], edit: &F) -> Res<Vec<u8>>
where
    F: Fn(&[u8], usize, &[u8]) -> Res<Vec<u8>>,
{
    let zeros = vec![0u8; ciphertext.len()];
    let keystream = match edit(ciphertext, 0, &zeros) {
        Ok(keystream) => keystream,
        Err(Error::Cipher(CipherError::SizeMismatch)) => {
            return Err(AttackError::PreconditionViolated(
                "edit oracle refused a full length edit",
            )
            .into())
        }
        Err(e) => return Err(e),
    };
    if keystream.len() != ciphertext.len() {
        return Err(AttackError::PreconditionViolated(
            "edit oracle changed the ciphertext length",
        )
        .into());
    }

    Ok(xor::fixed_xor(ciphertext, &keystream))
}

// Rough English letter weights; lowercase counts double and anything outside
// printable ASCII rules the candidate out.
fn english_score(column: &[u8]) -> Option<usize> {
    const LETTER_WEIGHTS: [usize; 26] = [
        8, 1, 3, 4, 12, 2, 2, 6, 7, 1, 1, 4, 2, 7, 8, 2, 1, 6, 6, 9, 3, 1, 2, 1, 2, 1,
    ];
    let mut score = 0;
    for &b in column {
        score += match b {
            b' ' => 13,
            b'a'..=b'z' => LETTER_WEIGHTS[(b - b'a') as usize] * 2,
            b'A'..=b'Z' => LETTER_WEIGHTS[(b - b'A') as usize],
            b'!'..=b'~' => 1,
            _ => return None,
        };
    }
    Some(score)
}

/// Recovers the keystream shared by ciphertexts encrypted under one key and
/// one nonce. Every keystream byte is the single-byte XOR key that makes its
/// column look most like English text. Columns are taken while at least
/// `min_samples` ciphertexts reach them.
pub fn recover_fixed_nonce_keystream(ciphertexts: &[Vec<u8>], min_samples: usize) -> Res<Vec<u8>> {
    if ciphertexts.len() < 2 {
        return Err(AttackError::PreconditionViolated(
            "need at least two ciphertexts under one nonce",
        )
        .into());
    }
    let min_samples = min_samples.max(2);

    let mut keystream = Vec::new();
    loop {
        let position = keystream.len();
        let column: Vec<u8> = ciphertexts
            .iter()
            .filter_map(|c| c.get(position).copied())
            .collect();
        if column.len() < min_samples {
            break;
        }

        let mut best: Option<(usize, u8)> = None;
        for candidate in 0..=u8::MAX {
            let decrypted: Vec<u8> = column.iter().map(|b| b ^ candidate).collect();
            if let Some(score) = english_score(&decrypted) {
                if best.map_or(true, |(best_score, _)| score > best_score) {
                    best = Some((score, candidate));
                }
            }
        }
        let (_, key_byte) = best.ok_or(AttackError::BruteForceExhausted {
            block: position / 16,
            recovered: position,
        })?;
        trace!("keystream byte {} is {:#04x}", position, key_byte);
        keystream.push(key_byte);
    }

    debug!(
        "recovered {} keystream bytes from {} ciphertexts",
        keystream.len(),
        ciphertexts.len()
    );
    Ok(keystream)
}

/// Decrypts every ciphertext as far as the recovered keystream reaches.
pub fn break_fixed_nonce(ciphertexts: &[Vec<u8>], min_samples: usize) -> Res<Vec<Vec<u8>>> {
    let keystream = recover_fixed_nonce_keystream(ciphertexts, min_samples)?;
    Ok(ciphertexts
        .iter()
        .map(|c| xor::fixed_xor(c, &keystream))
        .collect())
}

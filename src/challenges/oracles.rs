use crate::aes::{CbcCipher, AES_BLOCK_SIZE};
use crate::ctr::CtrCipher;
use crate::error::{CipherError, ConfigError, DecryptionError, Error, Res};
use crate::padding;
use log::debug;
use rand::prelude::*;
use zeroize::Zeroizing;


pub const USERDATA_PREFIX: &[u8] = b"comment1=cooking%20MCs;userdata=";
pub const USERDATA_SUFFIX: &[u8] = b";comment2=%20like%20a%20pound%20of%20bacon";
pub const ADMIN_MARKER: &str = ";admin=true;";

const PADDING_ORACLE_POOL: [&str; 10] = [
    "MDAwMDAwTm93IHRoYXQgdGhlIHBhcnR5IGlzIGp1bXBpbmc=",
    "MDAwMDAxV2l0aCB0aGUgYmFzcyBraWNrZWQgaW4gYW5kIHRoZSBWZWdhJ3MgYXJlIHB1bXBpbic=",
    "MDAwMDAyUXVpY2sgdG8gdGhlIHBvaW50LCB0byB0aGUgcG9pbnQsIG5vIGZha2luZw==",
    "MDAwMDAzQ29va2luZyBNQydzIGxpa2UgYSBwb3VuZCBvZiBiYWNvbg==",
    "MDAwMDA0QnVybmluZyAnZW0sIGlmIHlvdSBhaW4ndCBxdWljayBhbmQgbmltYmxl",
    "MDAwMDA1SSBnbyBjcmF6eSB3aGVuIEkgaGVhciBhIGN5bWJhbA==",
    "MDAwMDA2QW5kIGEgaGlnaCBoYXQgd2l0aCBhIHNvdXBlZCB1cCB0ZW1wbw==",
    "MDAwMDA3SSdtIG9uIGEgcm9sbCwgaXQncyB0aW1lIHRvIGdvIHNvbG8=",
    "MDAwMDA4b2xsaW4nIGluIG15IGZpdmUgcG9pbnQgb2g=",
    "MDAwMDA5aXRoIG15IHJhZy10b3AgZG93biBzbyBteSBoYWlyIGNhbiBibG93",
];

pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn random_key() -> Zeroizing<Vec<u8>> {
    Zeroizing::new(random_bytes(AES_BLOCK_SIZE))
}

/// Holds a secret AES-128 key and answers one question about a ciphertext:
/// does it decrypt to valid PKCS#7 padding.
pub struct PaddingOracleServer {
    key: Zeroizing<Vec<u8>>,
}

impl Default for PaddingOracleServer {
    fn default() -> Self {
        PaddingOracleServer::new()
    }
}

impl PaddingOracleServer {
    pub fn new() -> PaddingOracleServer {
        PaddingOracleServer { key: random_key() }
    }

    pub fn plaintexts(&self) -> Vec<Vec<u8>> {
        PADDING_ORACLE_POOL
            .iter()
            .filter_map(|encoded| base64::decode(encoded).ok())
            .collect()
    }

    /// Encrypts one of the pool strings, picked at random, under a fresh IV.
    pub fn ciphertext(&self) -> Res<(Vec<u8>, Vec<u8>)> {
        let encoded = PADDING_ORACLE_POOL
            .choose(&mut rand::thread_rng())
            .ok_or(ConfigError::MissingParameter("plaintext pool"))?;
        let plaintext = Zeroizing::new(
            base64::decode(encoded)
                .map_err(|_| ConfigError::Malformed(encoded.to_string()))?,
        );
        let iv = random_bytes(AES_BLOCK_SIZE);
        Ok((self.encrypt(&plaintext, &iv)?, iv))
    }

    pub fn encrypt(&self, plaintext: &[u8], iv: &[u8]) -> Res<Vec<u8>> {
        CbcCipher::new(&self.key, iv)?.encrypt(plaintext)
    }

    pub fn is_valid_padding(&self, iv: &[u8], ciphertext: &[u8]) -> bool {
        CbcCipher::new(&self.key, iv)
            .and_then(|cipher| cipher.decrypt_raw(ciphertext))
            .map(|plaintext| padding::has_valid_pkcs7(&Zeroizing::new(plaintext), AES_BLOCK_SIZE))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserdataMode {
    Cbc,
    Ctr,
    /// CBC that reuses the key as IV and rejects plaintexts with high-ASCII
    /// bytes, echoing the offending plaintext back.
    CbcKeyAsIv,
}

/// Wraps attacker userdata between a fixed prefix and suffix, escaping `;`
/// and `=`, and encrypts the result under a key only the server knows.
pub struct UserdataServer {
    mode: UserdataMode,
    key: Zeroizing<Vec<u8>>,
    iv: Vec<u8>,
    nonce: u64,
}

pub(crate) fn quote(unescaped: &[u8]) -> Vec<u8> {
    let mut escaped: Vec<u8> = Vec::with_capacity(unescaped.len());
    for b in unescaped {
        if *b == b';' || *b == b'=' {
            escaped.push(b'"');
            escaped.push(*b);
            escaped.push(b'"');
        } else {
            escaped.push(*b);
        }
    }
    escaped
}

impl UserdataServer {
    pub fn new(mode: UserdataMode) -> UserdataServer {
        let key = random_key();
        let iv = match mode {
            UserdataMode::CbcKeyAsIv => key.to_vec(),
            _ => random_bytes(AES_BLOCK_SIZE),
        };
        UserdataServer {
            mode,
            key,
            iv,
            nonce: rand::thread_rng().gen(),
        }
    }

    pub fn mode(&self) -> UserdataMode {
        self.mode
    }

    /// Lets a test compare a recovered key against the real one.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn generate(&self, userdata: &[u8]) -> Res<Vec<u8>> {
        let mut plaintext = Zeroizing::new(USERDATA_PREFIX.to_vec());
        plaintext.extend(quote(userdata));
        plaintext.extend_from_slice(USERDATA_SUFFIX);

        match self.mode {
            UserdataMode::Ctr => Ok(CtrCipher::new(&self.key, self.nonce)?.encrypt(&plaintext)?),
            UserdataMode::Cbc | UserdataMode::CbcKeyAsIv => {
                CbcCipher::new(&self.key, &self.iv)?.encrypt(&plaintext)
            }
        }
    }

    pub fn is_admin(&self, ciphertext: &[u8]) -> Res<bool> {
        let plaintext = match self.mode {
            UserdataMode::Ctr => CtrCipher::new(&self.key, self.nonce)?.decrypt(ciphertext)?,
            UserdataMode::Cbc | UserdataMode::CbcKeyAsIv => {
                CbcCipher::new(&self.key, &self.iv)?.decrypt(ciphertext)?
            }
        };

        if self.mode == UserdataMode::CbcKeyAsIv && plaintext.iter().any(|&b| b > 127) {
            debug!("rejecting userdata plaintext with high ascii bytes");
            return Err(DecryptionError {
                invalid_plaintext: plaintext,
            }
            .into());
        }

        let plaintext = Zeroizing::new(plaintext);
        Ok(String::from_utf8_lossy(&plaintext).contains(ADMIN_MARKER))
    }
}

/// Encrypts every message under one key and one nonce, each starting at
/// counter 0, so all of them share a keystream.
pub struct FixedNonceCtrServer {
    key: Zeroizing<Vec<u8>>,
    nonce: u64,
}

impl Default for FixedNonceCtrServer {
    fn default() -> Self {
        FixedNonceCtrServer::new()
    }
}

impl FixedNonceCtrServer {
    pub fn new() -> FixedNonceCtrServer {
        FixedNonceCtrServer {
            key: random_key(),
            nonce: rand::thread_rng().gen(),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Res<Vec<u8>> {
        Ok(CtrCipher::new(&self.key, self.nonce)?.encrypt(plaintext)?)
    }

    /// The keystream prefix every ciphertext starts with.
    pub fn keystream(&self, length: usize) -> Res<Vec<u8>> {
        self.encrypt(&vec![0u8; length])
    }
}

/// Keeps a CTR ciphertext of a secret plaintext and lets anyone rewrite
/// parts of it in place.
pub struct CtrEditServer {
    cipher: CtrCipher,
    ciphertext: Vec<u8>,
}

impl CtrEditServer {
    pub fn new(plaintext: &[u8]) -> Res<CtrEditServer> {
        let key = random_key();
        let mut cipher = CtrCipher::new(&key, rand::thread_rng().gen())?;
        let ciphertext = cipher.encrypt(plaintext)?;
        cipher.reset();
        Ok(CtrEditServer { cipher, ciphertext })
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn edit(&self, ciphertext: &[u8], offset: usize, newtext: &[u8]) -> Res<Vec<u8>> {
        Ok(self.cipher.edit(ciphertext, offset, newtext)?)
    }
}

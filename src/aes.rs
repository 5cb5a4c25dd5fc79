use crate::error::{CipherError, Res};
use crate::padding;
use crate::xor;
use openssl::symm::{Cipher, Crypter, Mode};
use zeroize::Zeroizing;


/// A keyed block permutation. Both directions work on exactly one block.
pub trait BlockCipher {
    fn block_size(&self) -> usize;
    fn encrypt_block(&self, block: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn decrypt_block(&self, block: &[u8]) -> Result<Vec<u8>, CipherError>;
}

pub const AES_BLOCK_SIZE: usize = 16;

/// AES in single-block ECB through openssl. The key length picks the variant.
pub struct Aes {
    key: Zeroizing<Vec<u8>>,
}

impl Aes {
    pub fn new(key: &[u8]) -> Result<Aes, CipherError> {
        match key.len() {
            16 | 24 | 32 => Ok(Aes {
                key: Zeroizing::new(key.to_vec()),
            }),
            _ => Err(CipherError::InitializationFailed),
        }
    }

    fn cipher(&self) -> Cipher {
        match self.key.len() {
            16 => Cipher::aes_128_ecb(),
            24 => Cipher::aes_192_ecb(),
            _ => Cipher::aes_256_ecb(),
        }
    }

    fn apply(&self, mode: Mode, block: &[u8]) -> Result<Vec<u8>, CipherError> {
        if block.len() != AES_BLOCK_SIZE {
            return Err(CipherError::SizeMismatch);
        }

        let mut crypter = Crypter::new(self.cipher(), mode, &self.key, None)
            .map_err(|_| CipherError::InitializationFailed)?;
        crypter.pad(false);

        let mut output = vec![0; block.len() + AES_BLOCK_SIZE];
        let mut count = crypter.update(block, &mut output)?;
        count += crypter.finalize(&mut output[count..])?;
        output.truncate(count);

        Ok(output)
    }
}

impl BlockCipher for Aes {
    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn encrypt_block(&self, block: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.apply(Mode::Encrypt, block)
    }

    fn decrypt_block(&self, block: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.apply(Mode::Decrypt, block)
    }
}

/// CBC with PKCS#7 padding. Chaining starts from the stored IV on every call.
pub struct CbcCipher<C: BlockCipher = Aes> {
    cipher: C,
    iv: Vec<u8>,
}

impl CbcCipher<Aes> {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CipherError> {
        CbcCipher::with_cipher(Aes::new(key)?, iv)
    }
}

impl<C: BlockCipher> CbcCipher<C> {
    pub fn with_cipher(cipher: C, iv: &[u8]) -> Result<Self, CipherError> {
        if iv.len() != cipher.block_size() {
            return Err(CipherError::SizeMismatch);
        }
        Ok(CbcCipher {
            cipher,
            iv: iv.to_vec(),
        })
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Res<Vec<u8>> {
        let block_length = self.cipher.block_size();
        let padded = padding::pkcs7(plaintext, block_length)?;

        let mut encrypted_data = Vec::with_capacity(padded.len());
        let mut last_encrypted_block = self.iv.clone();
        for chunk in padded.chunks(block_length) {
            let input_to_block_cipher = xor::fixed_xor(chunk, &last_encrypted_block);
            last_encrypted_block = self.cipher.encrypt_block(&input_to_block_cipher)?;
            encrypted_data.extend_from_slice(&last_encrypted_block);
        }

        Ok(encrypted_data)
    }

    /// Decrypts without touching the padding. Oracles and attacks that need
    /// to look at the raw final block go through here.
    pub fn decrypt_raw(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let block_length = self.cipher.block_size();
        if ciphertext.is_empty() || ciphertext.len() % block_length != 0 {
            return Err(CipherError::SizeMismatch);
        }

        let mut decrypted_data = Vec::with_capacity(ciphertext.len());
        let mut last_chunk: &[u8] = &self.iv;
        for chunk in ciphertext.chunks(block_length) {
            let cipher_decrypted = self.cipher.decrypt_block(chunk)?;
            decrypted_data.extend(xor::fixed_xor(&cipher_decrypted, last_chunk));
            last_chunk = chunk;
        }

        Ok(decrypted_data)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Res<Vec<u8>> {
        let decrypted_data = Zeroizing::new(self.decrypt_raw(ciphertext)?);
        Ok(padding::remove_pkcs7(
            &decrypted_data,
            self.cipher.block_size(),
        )?)
    }
}

pub fn encrypt_cbc(data: &[u8], key: &[u8], iv: &[u8]) -> Res<Vec<u8>> {
    CbcCipher::new(key, iv)?.encrypt(data)
}

pub fn decrypt_cbc(data: &[u8], key: &[u8], iv: &[u8]) -> Res<Vec<u8>> {
    CbcCipher::new(key, iv)?.decrypt(data)
}

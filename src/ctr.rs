#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 16] = b"YELLOW SUBMARINE";

    #[test]
    fn test_number_to_bit_string() {
        assert_eq!(
            Counter::new(2).to_bit_string::<LittleEndian>(0),
            b"\x00\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x00\x00\x00\x00\x00"
        );
        assert_eq!(
            Counter::new(1).to_bit_string::<LittleEndian>(0x0102),
            b"\x02\x01\x00\x00\x00\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00"
        );
    }

    #[test]
    fn test_apply_ctr() {
        assert_eq!(
            String::from_utf8(
                apply_ctr(
                    &base64::decode(
                        "L77na/nrFsKvynd6HzOoG7GHTLXsTVu9qvY/2syLXzhPweyyMTJULu/6/kXX0KSvoOLSFQ==",
                    )
                    .unwrap(),
                    KEY,
                )
                .unwrap(),
            )
            .unwrap(),
            "Yo, VIP Let's kick it Ice, Ice, baby Ice, Ice, baby "
        );
    }

    #[test]
    fn test_apply_ctr_encrypt_decrypt() {
        const DATA: &[u8] = b"Hello? is it my you're looking for?";
        let ciphertext = apply_ctr(DATA, KEY).unwrap();
        let plaintext = apply_ctr(&ciphertext, KEY).unwrap();
        assert_eq!(plaintext, DATA);
    }

    #[test]
    fn test_save_restore_replays_keystream() {
        let mut ctr = CtrCipher::new(KEY, 7).unwrap();
        ctr.save();
        let ciphertext = ctr.encrypt(b"attack at dawn, attack at dusk").unwrap();
        assert_eq!(ctr.counter(), 2);

        ctr.restore();
        assert_eq!(ctr.counter(), 0);
        assert_eq!(
            ctr.decrypt(&ciphertext).unwrap(),
            b"attack at dawn, attack at dusk"
        );

        ctr.reset();
        assert_eq!(ctr.counter(), 0);
    }

    #[test]
    fn test_set_counter_saves_previous_position() {
        let mut ctr = CtrCipher::new(KEY, 0).unwrap();
        ctr.encrypt(&[0; 48]).unwrap();
        ctr.set_counter(10);
        assert_eq!(ctr.counter(), 10);
        ctr.restore();
        assert_eq!(ctr.counter(), 3);
    }

    #[test]
    fn test_keystream_reuse_cancels_out() {
        let first = b"0123456789abcdef0123456789abcdef";
        let second = b"the quick brown fox jumps over i";
        let c1 = CtrCipher::new(KEY, 42).unwrap().encrypt(first).unwrap();
        let c2 = CtrCipher::new(KEY, 42).unwrap().encrypt(second).unwrap();
        assert_eq!(
            xor::fixed_xor(&c1, &c2),
            xor::fixed_xor(&first[..], &second[..])
        );
    }

    #[test]
    fn test_counter_overflow_is_an_error() {
        let mut ctr = CtrCipher::new(KEY, 0).unwrap();
        ctr.set_counter(u64::MAX - 1);
        assert!(ctr.encrypt(&[0; 16]).is_ok());
        assert_eq!(ctr.encrypt(b"x"), Err(CipherError::CounterOverflow));
    }

    #[test]
    fn test_overflow_leaves_counter_untouched() {
        let mut ctr = CtrCipher::new(KEY, 0).unwrap();
        ctr.set_counter(u64::MAX - 2);
        assert_eq!(ctr.encrypt(&[0; 48]), Err(CipherError::CounterOverflow));
        assert_eq!(ctr.counter(), u64::MAX - 2);

        let ciphertext = ctr.encrypt(&[0; 32]).unwrap();
        ctr.set_counter(u64::MAX - 2);
        assert_eq!(ctr.keystream_block().unwrap(), ciphertext[..16].to_vec());
        assert_eq!(ctr.keystream_block().unwrap(), ciphertext[16..].to_vec());
        assert_eq!(ctr.keystream_block(), Err(CipherError::CounterOverflow));
    }

    #[test]
    fn test_ctr_edit() {
        const DATA: &[u8] = b"Hello? is it my you're looking for?";
        let ctr = CtrCipher::new(KEY, 0).unwrap();
        let ciphertext = apply_ctr(DATA, KEY).unwrap();
        let new_ciphertext = ctr
            .edit(&ciphertext[..], 5, b"! it is me you're looking for!")
            .unwrap();
        let plaintext = apply_ctr(&new_ciphertext[..], KEY).unwrap();
        assert_eq!(plaintext, b"Hello! it is me you're looking for!");
    }

    #[test]
    fn test_ctr_edit_out_of_range() {
        let ctr = CtrCipher::new(KEY, 0).unwrap();
        let ciphertext = apply_ctr(b"short", KEY).unwrap();
        assert_eq!(
            ctr.edit(&ciphertext, 3, b"too long"),
            Err(CipherError::SizeMismatch)
        );
        assert_eq!(
            ctr.edit(&ciphertext, usize::MAX, b"x"),
            Err(CipherError::SizeMismatch)
        );
    }
}

use crate::aes::{Aes, BlockCipher};
use crate::error::CipherError;
use crate::xor;
use byteorder::{ByteOrder, LittleEndian};
use log::trace;

/// CTR mode keyed by an 8-byte nonce and an 8-byte little-endian block
/// counter. Encryption and decryption are the same operation.
pub struct CtrCipher<C: BlockCipher = Aes> {
    cipher: C,
    nonce: u64,
    counter: u64,
    saved_counter: u64,
}

impl CtrCipher<Aes> {
    pub fn new(key: &[u8], nonce: u64) -> Result<Self, CipherError> {
        CtrCipher::with_cipher(Aes::new(key)?, nonce)
    }
}

impl<C: BlockCipher> CtrCipher<C> {
    pub fn with_cipher(cipher: C, nonce: u64) -> Result<Self, CipherError> {
        if cipher.block_size() != 16 {
            return Err(CipherError::SizeMismatch);
        }
        Ok(CtrCipher {
            cipher,
            nonce,
            counter: 0,
            saved_counter: 0,
        })
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn save(&mut self) {
        self.saved_counter = self.counter;
    }

    pub fn restore(&mut self) {
        self.counter = self.saved_counter;
    }

    /// Jumps to `counter`, saving the current position first so `restore`
    /// returns to it.
    pub fn set_counter(&mut self, counter: u64) {
        self.save();
        self.counter = counter;
    }

    fn keystream_at(&self, counter: u64) -> Result<Vec<u8>, CipherError> {
        self.cipher
            .encrypt_block(&Counter::new(counter).to_bit_string::<LittleEndian>(self.nonce))
    }

    /// Produces the keystream block for the current counter and advances it.
    /// The last counter value is reserved; reaching it means the nonce is
    /// used up and a new cipher is needed.
    pub fn keystream_block(&mut self) -> Result<Vec<u8>, CipherError> {
        if self.counter == u64::MAX {
            return Err(CipherError::CounterOverflow);
        }
        let block = self.keystream_at(self.counter)?;
        self.counter += 1;
        Ok(block)
    }

    /// XORs `data` with the keystream from the current counter on. On any
    /// error the counter stays where it was.
    pub fn apply(&mut self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        let blocks = ((data.len() + 15) / 16) as u64;
        let end = self
            .counter
            .checked_add(blocks)
            .ok_or(CipherError::CounterOverflow)?;

        let mut output = Vec::with_capacity(data.len());
        for (counter, block) in (self.counter..end).zip(data.chunks(16)) {
            let keystream_for_block = self.keystream_at(counter)?;
            output.extend(xor::fixed_xor(block, &keystream_for_block));
        }
        self.counter = end;
        Ok(output)
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.apply(plaintext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.apply(ciphertext)
    }

    /// Replaces the plaintext under `ciphertext[offset..offset + newtext.len()]`
    /// with `newtext`, reusing the keystream. The ciphertext is taken to start
    /// at counter 0 of this nonce. The counter state is not touched.
    pub fn edit(
        &self,
        ciphertext: &[u8],
        offset: usize,
        newtext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let end = offset
            .checked_add(newtext.len())
            .filter(|&end| end <= ciphertext.len())
            .ok_or(CipherError::SizeMismatch)?;
        trace!("ctr edit of {} bytes at offset {}", newtext.len(), offset);

        let mut edited_ciphertext = ciphertext.to_vec();
        if newtext.is_empty() {
            return Ok(edited_ciphertext);
        }

        let initial_block_counter = offset / 16;
        let ending_block_counter = (end - 1) / 16;
        let mut ctr_keystream = Vec::new();
        for c in initial_block_counter..=ending_block_counter {
            ctr_keystream.extend(self.keystream_at(c as u64)?);
        }

        for (i, b) in newtext.iter().enumerate() {
            edited_ciphertext[offset + i] = b ^ ctr_keystream[offset % 16 + i];
        }

        Ok(edited_ciphertext)
    }
}

/// One-shot CTR with a zero nonce.
pub fn apply_ctr(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    CtrCipher::new(key, 0)?.apply(data)
}

struct Counter {
    counter: u64,
}

impl Counter {
    fn new(counter: u64) -> Counter {
        Counter { counter }
    }

    fn to_bit_string<E>(&self, nonce: u64) -> Vec<u8>
    where
        E: ByteOrder,
    {
        let mut nonce_correct_endianity = [0; 8];
        E::write_u64(&mut nonce_correct_endianity, nonce);
        let mut n_correct_endianity = [0; 8];
        E::write_u64(&mut n_correct_endianity, self.counter);
        [nonce_correct_endianity, n_correct_endianity].concat()
    }
}

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use zeroize::Zeroizing;

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::ToBigUint;

    #[test]
    fn test_modexp() {
        let mut rng = rand::thread_rng();
        let a: BigUint = rng.gen_biguint(32);
        let small_e = (rand::random::<u8>() % 4) as u32;
        let small_e_as_biguint = BigUint::from(small_e);
        let modulus: BigUint = rng.gen_biguint(8) + 2u8;
        assert_eq!(
            a.modexp(&small_e_as_biguint, &modulus),
            a.pow(small_e) % modulus
        )
    }

    #[test]
    fn test_modexp_degenerate_modulus() {
        let a = ToBigUint::to_biguint(&5).unwrap();
        let e = ToBigUint::to_biguint(&3).unwrap();
        assert_eq!(a.modexp(&e, &BigUint::one()), BigUint::zero());
        assert_eq!(a.modexp(&e, &BigUint::zero()), BigUint::zero());
    }

    #[test]
    fn test_bytes_of_zero_is_empty() {
        assert_eq!(to_bytes(&BigUint::zero()), Vec::<u8>::new());
        assert_eq!(to_bytes(&ToBigUint::to_biguint(&258).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_pad_to() {
        let n = ToBigUint::to_biguint(&258).unwrap();
        assert_eq!(pad_to(&n, 4), vec![0, 0, 1, 2]);
        assert_eq!(pad_to(&BigUint::zero(), 3), vec![0, 0, 0]);
        assert_eq!(pad_to(&n, 1), vec![1, 2]);
    }

    #[test]
    fn test_hex_round_trip() {
        let n = from_hex("0A0b").unwrap();
        assert_eq!(n, ToBigUint::to_biguint(&0x0a0b).unwrap());
        assert_eq!(to_hex(&n), "A0B");
        assert_eq!(from_hex("xyz"), None);
        assert_eq!(from_hex(""), None);
    }

    #[test]
    fn test_random_in_range() {
        let low = ToBigUint::to_biguint(&2).unwrap();
        let high = ToBigUint::to_biguint(&5).unwrap();
        for _ in 0..100 {
            let r = random_in_range(&low, &high);
            assert!(r >= low && r < high);
        }
    }

    #[test]
    fn test_secret_biguint_round_trip() {
        let n = ToBigUint::to_biguint(&123456789u64).unwrap();
        let secret = SecretBigUint::new(&n);
        assert_eq!(secret.value(), n);
    }
}

pub trait ModExp {
    fn modexp(&self, exponent: &BigUint, modulus: &BigUint) -> BigUint;
}

impl ModExp for BigUint {
    /// `self ^ exponent mod modulus`. A zero or unit modulus yields zero.
    fn modexp(&self, exponent: &BigUint, modulus: &BigUint) -> BigUint {
        if modulus.is_zero() || modulus.is_one() {
            return Zero::zero();
        }
        self.modpow(exponent, modulus)
    }
}

/// Big-endian magnitude bytes with no leading zeros. Zero encodes as no bytes.
pub fn to_bytes(n: &BigUint) -> Vec<u8> {
    if n.is_zero() {
        return Vec::new();
    }
    n.to_bytes_be()
}

pub fn from_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Left-pads the big-endian encoding of `n` with zeros to `length` bytes.
/// Longer encodings are returned unchanged.
pub fn pad_to(n: &BigUint, length: usize) -> Vec<u8> {
    let bytes = to_bytes(n);
    if bytes.len() >= length {
        return bytes;
    }
    let mut padded = vec![0; length - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}

pub fn byte_length(n: &BigUint) -> usize {
    ((n.bits() + 7) / 8) as usize
}

pub fn to_hex(n: &BigUint) -> String {
    n.to_str_radix(16).to_uppercase()
}

pub fn from_hex(hex: &str) -> Option<BigUint> {
    if hex.is_empty() {
        return None;
    }
    BigUint::parse_bytes(hex.as_bytes(), 16)
}

/// Uniform sample from `[low, high)`.
pub fn random_in_range(low: &BigUint, high: &BigUint) -> BigUint {
    rand::thread_rng().gen_biguint_range(low, high)
}

/// A big integer kept as a zeroize-on-drop byte buffer. The value is only
/// materialized for the duration of a computation.
pub struct SecretBigUint {
    bytes: Zeroizing<Vec<u8>>,
}

impl SecretBigUint {
    pub fn new(n: &BigUint) -> SecretBigUint {
        SecretBigUint {
            bytes: Zeroizing::new(n.to_bytes_be()),
        }
    }

    pub fn value(&self) -> BigUint {
        BigUint::from_bytes_be(&self.bytes)
    }

    pub fn bits(&self) -> u64 {
        self.value().bits()
    }
}

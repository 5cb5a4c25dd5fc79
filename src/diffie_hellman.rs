use crate::error::{ConfigError, ProtocolViolation, Res};
use crate::hash::HashAlgorithm;
use crate::number::{self, ModExp, SecretBigUint};
use log::debug;
use num_bigint::BigUint;
use num_traits::One;
use std::borrow::Cow;
use zeroize::Zeroizing;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::params::DhRegistry;
    use num_bigint::ToBigUint;

    fn cryptopals_p() -> BigUint {
        BigUint::parse_bytes(b"ffffffffffffffffc90fdaa22168c234c4c6628b80dc1cd129024e088a67cc74020bbea63b139b22514a08798e3404ddef9519b3cd3a431b302b0a6df25f14374fe1356d6d51c245e485b576625e7ec6f44c42e9a637ed6b0bff5cb6f406b7edee386bfb5a899fa5ae9f24117c4b1fe649286651ece45b3dc2007cb8a163bf0598da48361c55d39a69163fa8fd24cf5f83655d23dca3ad961c62f356208552bb9ed529077096966d670c354e4abc9804f1746c08ca237327ffffffffffffffff", 16).unwrap()
    }

    #[test]
    fn test_diffie_hellman() {
        let p = cryptopals_p();
        let g = BigUint::from(2u8);
        let mut alice_diffie_hellman = DiffieHellman::non_owning_new(&p, &g).unwrap();
        let alice_public_key = alice_diffie_hellman.get_public_key().unwrap().clone();
        let mut bob_diffie_hellman = DiffieHellman::non_owning_new(&p, &g).unwrap();
        let bob_public_key = bob_diffie_hellman.get_public_key().unwrap().clone();

        let bob_key = bob_diffie_hellman
            .derive_shared_secret(&alice_public_key, b"client", b"server")
            .unwrap();
        let alice_key = alice_diffie_hellman
            .derive_shared_secret(&bob_public_key, b"client", b"server")
            .unwrap();

        assert_eq!(bob_key, alice_key);
        assert_eq!(alice_key.len(), 32);
        assert_eq!(
            bob_diffie_hellman.get_shared_secret(),
            alice_diffie_hellman.get_shared_secret()
        );
        assert_eq!(alice_diffie_hellman.state(), DhState::SymmetricKeyDerived);
    }

    #[test]
    fn test_nonces_bind_the_key() {
        let p = cryptopals_p();
        let g = BigUint::from(2u8);
        let mut alice = DiffieHellman::non_owning_new(&p, &g).unwrap();
        let bob = DiffieHellman::non_owning_new(&p, &g).unwrap();
        let bob_public_key = bob.get_public_key().unwrap().clone();
        let first = alice
            .derive_shared_secret(&bob_public_key, b"n1", b"n2")
            .unwrap();
        let second = alice
            .derive_shared_secret(&bob_public_key, b"n1", b"n3")
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_state_machine() {
        let registry = DhRegistry::builtin().unwrap();
        let group = registry.lookup("modp-1536").unwrap();
        let mut dh = DiffieHellman::uninitialized(&group.p, &group.g).unwrap();
        assert_eq!(dh.state(), DhState::Uninitialized);
        assert!(dh.generate_public_key().is_err());
        assert!(dh
            .derive_shared_secret(&BigUint::from(5u8), b"", b"")
            .is_err());

        dh.generate_private_key();
        assert_eq!(dh.state(), DhState::PrivateKeyGenerated);
        dh.generate_public_key().unwrap();
        assert_eq!(dh.state(), DhState::PublicKeyGenerated);
    }

    #[test]
    fn test_private_key_range() {
        let p = ToBigUint::to_biguint(&5).unwrap();
        let g = ToBigUint::to_biguint(&2).unwrap();
        for _ in 0..50 {
            let dh = DiffieHellman::owning_new(p.clone(), g.clone()).unwrap();
            let private_key = dh.private_key.as_ref().unwrap().value();
            assert!(private_key >= ToBigUint::to_biguint(&2).unwrap());
            assert!(private_key <= ToBigUint::to_biguint(&3).unwrap());
        }
    }

    #[test]
    fn test_rejects_tiny_modulus() {
        let g = ToBigUint::to_biguint(&2).unwrap();
        assert_eq!(
            DiffieHellman::owning_new(ToBigUint::to_biguint(&3).unwrap(), g).err(),
            Some(Error::Config(ConfigError::InvalidParameter("p")))
        );
    }

    #[test]
    fn test_generator_one_forces_secret_one() {
        let p = cryptopals_p();
        let g = BigUint::one();
        let mut alice = DiffieHellman::non_owning_new(&p, &g).unwrap();
        let mut bob = DiffieHellman::non_owning_new(&p, &g).unwrap();
        assert_eq!(alice.get_public_key(), Some(&BigUint::one()));

        let bob_public_key = bob.get_public_key().unwrap().clone();
        let alice_public_key = alice.get_public_key().unwrap().clone();
        let expected = kdf(&BigUint::one(), b"client", b"server");
        assert_eq!(
            alice
                .derive_shared_secret(&bob_public_key, b"client", b"server")
                .unwrap(),
            expected
        );
        assert_eq!(
            bob.derive_shared_secret(&alice_public_key, b"client", b"server")
                .unwrap(),
            expected
        );
    }

    #[test]
    fn test_kdf_of_zero_hashes_only_nonces() {
        assert_eq!(
            *kdf(&BigUint::from(0u8), b"ab", b"c"),
            HashAlgorithm::Sha256.digest(b"abc")
        );
        assert_eq!(
            *kdf(&BigUint::from(0x0102u16), b"", b""),
            HashAlgorithm::Sha256.digest(&[1, 2])
        );
    }

    #[test]
    fn test_validate_public_key() {
        let p = ToBigUint::to_biguint(&23).unwrap();
        for bad in [0u8, 1, 22, 23, 24].iter() {
            assert_eq!(
                validate_public_key(&BigUint::from(*bad), &p),
                Err(ProtocolViolation::PublicKeyInvalid)
            );
        }
        assert_eq!(validate_public_key(&BigUint::from(5u8), &p), Ok(()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhState {
    Uninitialized,
    PrivateKeyGenerated,
    PublicKeyGenerated,
    SharedSecretDerived,
    SymmetricKeyDerived,
}

/// One side of a Diffie-Hellman exchange over `(p, g)`.
pub struct DiffieHellman<'a> {
    p: Cow<'a, BigUint>,
    g: Cow<'a, BigUint>,
    private_key: Option<SecretBigUint>,
    public_key: Option<BigUint>,
    shared_secret: Option<SecretBigUint>,
    symmetric_key: Option<Zeroizing<Vec<u8>>>,
}

impl<'a> DiffieHellman<'a> {
    fn with_group(p: Cow<'a, BigUint>, g: Cow<'a, BigUint>) -> Res<DiffieHellman<'a>> {
        // the private key range [2, p - 2] must not be empty
        if *p < BigUint::from(4u8) {
            return Err(ConfigError::InvalidParameter("p").into());
        }
        Ok(DiffieHellman {
            p,
            g,
            private_key: None,
            public_key: None,
            shared_secret: None,
            symmetric_key: None,
        })
    }

    pub fn uninitialized(p: &'a BigUint, g: &'a BigUint) -> Res<DiffieHellman<'a>> {
        DiffieHellman::with_group(Cow::Borrowed(p), Cow::Borrowed(g))
    }

    /// Borrows the group and generates a key pair.
    pub fn non_owning_new(p: &'a BigUint, g: &'a BigUint) -> Res<DiffieHellman<'a>> {
        let mut diffie_hellman = DiffieHellman::uninitialized(p, g)?;
        diffie_hellman.generate_private_key();
        diffie_hellman.generate_public_key()?;
        Ok(diffie_hellman)
    }

    pub fn owning_new(p: BigUint, g: BigUint) -> Res<DiffieHellman<'a>> {
        let mut diffie_hellman = DiffieHellman::with_group(Cow::Owned(p), Cow::Owned(g))?;
        diffie_hellman.generate_private_key();
        diffie_hellman.generate_public_key()?;
        Ok(diffie_hellman)
    }

    pub fn state(&self) -> DhState {
        if self.symmetric_key.is_some() {
            DhState::SymmetricKeyDerived
        } else if self.shared_secret.is_some() {
            DhState::SharedSecretDerived
        } else if self.public_key.is_some() {
            DhState::PublicKeyGenerated
        } else if self.private_key.is_some() {
            DhState::PrivateKeyGenerated
        } else {
            DhState::Uninitialized
        }
    }

    /// Draws the private key uniformly from `[2, p - 2]`. Anything derived
    /// from a previous key is dropped.
    pub fn generate_private_key(&mut self) {
        let two = BigUint::from(2u8);
        let upper = &*self.p - BigUint::one();
        self.private_key = Some(SecretBigUint::new(&number::random_in_range(&two, &upper)));
        self.public_key = None;
        self.shared_secret = None;
        self.symmetric_key = None;
    }

    pub fn generate_public_key(&mut self) -> Res<&BigUint> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(ConfigError::MissingParameter("private key"))?;
        let public_key = self.g.modexp(&private_key.value(), &self.p);
        Ok(&*self.public_key.insert(public_key))
    }

    pub fn get_p(&self) -> &BigUint {
        &self.p
    }

    pub fn get_g(&self) -> &BigUint {
        &self.g
    }

    pub fn get_public_key(&self) -> Option<&BigUint> {
        self.public_key.as_ref()
    }

    pub fn get_shared_secret(&self) -> Option<BigUint> {
        self.shared_secret.as_ref().map(SecretBigUint::value)
    }

    pub fn get_symmetric_key(&self) -> Option<&[u8]> {
        self.symmetric_key.as_ref().map(|key| key.as_slice())
    }

    /// Computes `peer ^ private mod p` and the nonce-bound symmetric key.
    /// The peer key is not range checked here; see `validate_public_key`.
    pub fn derive_shared_secret(
        &mut self,
        peer_public_key: &BigUint,
        client_nonce: &[u8],
        server_nonce: &[u8],
    ) -> Res<Zeroizing<Vec<u8>>> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(ConfigError::MissingParameter("private key"))?;

        let shared_secret = peer_public_key.modexp(&private_key.value(), &self.p);
        let symmetric_key = kdf(&shared_secret, client_nonce, server_nonce);
        self.shared_secret = Some(SecretBigUint::new(&shared_secret));
        self.symmetric_key = Some(symmetric_key.clone());
        debug!("derived dh symmetric key over a {} bit group", self.p.bits());

        Ok(symmetric_key)
    }
}

/// `SHA-256(bytes(secret) || client_nonce || server_nonce)` where
/// `bytes(secret)` is the minimal big-endian encoding.
pub fn kdf(shared_secret: &BigUint, client_nonce: &[u8], server_nonce: &[u8]) -> Zeroizing<Vec<u8>> {
    let secret_bytes = Zeroizing::new(number::to_bytes(shared_secret));
    Zeroizing::new(HashAlgorithm::Sha256.digest_parts(&[
        secret_bytes.as_slice(),
        client_nonce,
        server_nonce,
    ]))
}

/// Public keys must lie strictly between 1 and p - 1.
pub fn validate_public_key(public_key: &BigUint, p: &BigUint) -> Result<(), ProtocolViolation> {
    let p_minus_one = p - BigUint::one();
    if *public_key <= BigUint::one() || *public_key >= p_minus_one {
        return Err(ProtocolViolation::PublicKeyInvalid);
    }
    Ok(())
}

use crate::compare::constant_time_equals;
use crate::error::{ProtocolViolation, Res};
use crate::number;
use crate::params::SrpRegistry;
use crate::protocols::diffie_hellman::secure_remote_password::{
    client_evidence, compute_session_key, server_evidence, AuthenticationRequest,
    EvidenceRequest, SrpServerFacade,
};
use crate::protocols::diffie_hellman::{parse_biguint_field, parse_hex_field};
use crate::session::SessionId;
use log::debug;
use num_bigint::BigUint;
use num_traits::Zero;
use zeroize::Zeroizing;


/// Client public keys that are congruent to zero mod `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgedPublicKey {
    Zero,
    Modulus,
    MultipleOfModulus(u32),
}

impl ForgedPublicKey {
    pub fn value(&self, n: &BigUint) -> BigUint {
        match self {
            ForgedPublicKey::Zero => BigUint::zero(),
            ForgedPublicKey::Modulus => n.clone(),
            ForgedPublicKey::MultipleOfModulus(factor) => n * BigUint::from(*factor),
        }
    }
}

/// Logs in as `client_id` without the password. Any `A` that is a multiple
/// of `N` makes the server's premaster secret `(A * v^u)^b` zero, so the
/// session key is `H(PAD(0))` whatever `v` and `b` are.
pub struct MaliciousClient<'a, T> {
    server: &'a T,
    client_id: String,
    forged: ForgedPublicKey,
    registry: SrpRegistry,
    session_key: Option<Zeroizing<Vec<u8>>>,
}

impl<'a, T> MaliciousClient<'a, T>
where
    T: SrpServerFacade,
{
    pub fn new(server: &'a T, client_id: &str, forged: ForgedPublicKey) -> Res<Self> {
        Ok(MaliciousClient {
            server,
            client_id: client_id.to_string(),
            forged,
            registry: SrpRegistry::builtin()?,
            session_key: None,
        })
    }

    pub fn authenticate(&mut self) -> Res<SessionId> {
        let challenge = self.server.begin_authentication(&AuthenticationRequest {
            client_id: self.client_id.clone(),
        })?;
        let params = self.registry.lookup(challenge.group_id)?;
        let salt = parse_hex_field(&challenge.salt, "salt")?;
        let b_public = parse_biguint_field(&challenge.public_key_b, "publicKeyB")?;

        let a_public = self.forged.value(&params.n);
        let key = compute_session_key(params, &BigUint::zero());
        let evidence = client_evidence(
            params,
            &self.client_id,
            &salt,
            &a_public,
            &b_public,
            &key,
        );

        let response = self.server.verify(&EvidenceRequest {
            session_id: challenge.session_id.clone(),
            client_id: self.client_id.clone(),
            public_key_a: number::to_hex(&a_public),
            evidence: hex::encode(&evidence),
        })?;

        let server_proof = parse_hex_field(&response.evidence, "evidence")?;
        if !constant_time_equals(
            &server_evidence(params, &a_public, &evidence, &key),
            &server_proof,
        ) {
            return Err(ProtocolViolation::EvidenceMismatch.into());
        }
        debug!(
            "authenticated as {} with a forged public key {:?}",
            self.client_id, self.forged
        );

        self.session_key = Some(key);
        Ok(challenge.session_id)
    }

    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_ref().map(|key| key.as_slice())
    }
}

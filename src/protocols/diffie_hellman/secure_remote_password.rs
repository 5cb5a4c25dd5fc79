use crate::compare::constant_time_equals;
use crate::error::{ConfigError, ProtocolViolation, Res};
use crate::hash::HashAlgorithm;
use crate::number::{self, ModExp, SecretBigUint};
use crate::params::{SrpParameters, SrpRegistry};
use crate::protocols::diffie_hellman::{parse_biguint_field, parse_hex_field, random_nonce};
use crate::session::{SessionId, SessionTable};
use log::{debug, warn};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;


pub const REGISTRATION_COMPLETE: &str = "Registration complete";

#[derive(Debug, Clone, PartialEq)]
pub struct SrpServerConfig {
    /// Smallest group id handed out at registration.
    pub default_group_id: u32,
    /// Refuse client public keys with `A mod N == 0`.
    pub enforce_public_key_check: bool,
    pub min_private_key_bits: u64,
    /// Unanswered challenges older than this are dropped.
    pub challenge_timeout: Duration,
    /// At most this many challenges wait for evidence at once; the oldest
    /// one makes room for a new one.
    pub max_pending_challenges: usize,
}

impl Default for SrpServerConfig {
    fn default() -> Self {
        SrpServerConfig {
            default_group_id: 2,
            enforce_public_key_check: true,
            min_private_key_bits: 256,
            challenge_timeout: Duration::from_secs(60),
            max_pending_challenges: 1024,
        }
    }
}

impl SrpServerConfig {
    /// A server that trusts whatever `A` it receives.
    pub fn naive() -> Self {
        SrpServerConfig {
            enforce_public_key_check: false,
            ..SrpServerConfig::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub client_id: String,
    #[serde(default)]
    pub requested_group: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub group_id: u32,
    #[serde(rename = "N")]
    pub n: String,
    pub g: String,
    pub salt: String,
    pub hash: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifierUpload {
    pub client_id: String,
    pub verifier: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRequest {
    pub client_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationChallenge {
    pub session_id: SessionId,
    pub group_id: u32,
    pub salt: String,
    pub public_key_b: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRequest {
    pub session_id: SessionId,
    pub client_id: String,
    pub public_key_a: String,
    pub evidence: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceResponse {
    pub session_id: SessionId,
    pub evidence: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub session_id: SessionId,
    pub client_id: String,
}

fn pad(params: &SrpParameters, n: &BigUint) -> Vec<u8> {
    number::pad_to(n, params.n_length())
}

fn hash_to_biguint(hash: HashAlgorithm, parts: &[&[u8]]) -> BigUint {
    BigUint::from_bytes_be(&hash.digest_parts(parts))
}

/// `k = H(N | PAD(g))`
pub fn compute_k(params: &SrpParameters) -> BigUint {
    hash_to_biguint(
        params.hash,
        &[&number::to_bytes(&params.n), &pad(params, &params.g)],
    )
}

/// `x = H(s | H(I | ":" | P))`
pub fn compute_x(hash: HashAlgorithm, salt: &[u8], identity: &str, password: &[u8]) -> BigUint {
    let inner = Zeroizing::new(hash.digest_parts(&[identity.as_bytes(), b":", password]));
    hash_to_biguint(hash, &[salt, &inner])
}

/// `v = g^x mod N`
pub fn compute_verifier(params: &SrpParameters, x: &BigUint) -> BigUint {
    params.g.modexp(x, &params.n)
}

/// `B = (k * v + g^b) mod N`
pub fn compute_server_public_key(
    params: &SrpParameters,
    k: &BigUint,
    verifier: &BigUint,
    b: &BigUint,
) -> BigUint {
    (k * verifier + params.g.modexp(b, &params.n)) % &params.n
}

/// `u = H(PAD(A) | PAD(B))`
pub fn compute_u(params: &SrpParameters, a_public: &BigUint, b_public: &BigUint) -> BigUint {
    hash_to_biguint(
        params.hash,
        &[&pad(params, a_public), &pad(params, b_public)],
    )
}

/// `S = (B - k * g^x) ^ (a + u * x) mod N`
pub fn client_premaster_secret(
    params: &SrpParameters,
    k: &BigUint,
    b_public: &BigUint,
    x: &BigUint,
    a: &BigUint,
    u: &BigUint,
) -> BigUint {
    let n = &params.n;
    let subtrahend = (k * params.g.modexp(x, n)) % n;
    // lift B by N so the difference stays non-negative
    let base = (b_public % n + n - subtrahend) % n;
    base.modexp(&(a + u * x), n)
}

/// `S = (A * v^u) ^ b mod N`
pub fn server_premaster_secret(
    params: &SrpParameters,
    a_public: &BigUint,
    verifier: &BigUint,
    u: &BigUint,
    b: &BigUint,
) -> BigUint {
    let n = &params.n;
    ((a_public * verifier.modexp(u, n)) % n).modexp(b, n)
}

/// `K = H(PAD(S))`
pub fn compute_session_key(params: &SrpParameters, premaster_secret: &BigUint) -> Zeroizing<Vec<u8>> {
    let padded = Zeroizing::new(pad(params, premaster_secret));
    Zeroizing::new(params.hash.digest(&padded))
}

/// `M1 = H(H(N) xor H(g) | H(I) | s | A | B | K)`
pub fn client_evidence(
    params: &SrpParameters,
    identity: &str,
    salt: &[u8],
    a_public: &BigUint,
    b_public: &BigUint,
    session_key: &[u8],
) -> Vec<u8> {
    let hash = params.hash;
    let group_hash: Vec<u8> = hash
        .digest(&number::to_bytes(&params.n))
        .iter()
        .zip(hash.digest(&number::to_bytes(&params.g)))
        .map(|(a, b)| a ^ b)
        .collect();
    hash.digest_parts(&[
        &group_hash,
        &hash.digest(identity.as_bytes()),
        salt,
        &number::to_bytes(a_public),
        &number::to_bytes(b_public),
        session_key,
    ])
}

/// `M2 = H(PAD(A) | M1 | K)`
pub fn server_evidence(
    params: &SrpParameters,
    a_public: &BigUint,
    client_evidence: &[u8],
    session_key: &[u8],
) -> Vec<u8> {
    params
        .hash
        .digest_parts(&[&pad(params, a_public), client_evidence, session_key])
}

/// Private exponent of at least `min_bits` bits, below `N - 1`.
pub fn generate_private_key(params: &SrpParameters, min_bits: u64) -> Res<SecretBigUint> {
    let bits = min_bits.max(2);
    if params.n.bits() <= bits {
        return Err(ConfigError::InvalidParameter("min_private_key_bits").into());
    }
    let low = BigUint::one() << (bits - 1) as usize;
    let high = &params.n - 1u8;
    Ok(SecretBigUint::new(&number::random_in_range(&low, &high)))
}

// sends the client id and receives the group, then uploads the verifier;
// authentication is a challenge followed by the evidence exchange
pub trait SrpServerFacade {
    fn register(&self, request: &RegistrationRequest) -> Res<RegistrationResponse>;
    fn upload_verifier(&self, upload: &VerifierUpload) -> Res<String>;
    fn begin_authentication(&self, request: &AuthenticationRequest)
        -> Res<AuthenticationChallenge>;
    fn verify(&self, request: &EvidenceRequest) -> Res<EvidenceResponse>;
    fn logout(&self, request: &LogoutRequest) -> Res<()>;
}

struct UserRecord {
    group_id: u32,
    salt: Vec<u8>,
    verifier: Option<BigUint>,
}

struct PendingAuthentication {
    client_id: String,
    group_id: u32,
    salt: Vec<u8>,
    verifier: BigUint,
    private_key: SecretBigUint,
    public_key: BigUint,
    issued: Instant,
}

struct AuthenticatedSession {
    client_id: String,
    key: Zeroizing<Vec<u8>>,
}

pub struct SrpServer {
    config: SrpServerConfig,
    registry: SrpRegistry,
    users: Mutex<HashMap<String, UserRecord>>,
    pending: SessionTable<PendingAuthentication>,
    authenticated: SessionTable<AuthenticatedSession>,
}

impl SrpServer {
    pub fn new(config: SrpServerConfig) -> Res<SrpServer> {
        Ok(SrpServer::with_registry(config, SrpRegistry::builtin()?))
    }

    pub fn with_registry(config: SrpServerConfig, registry: SrpRegistry) -> SrpServer {
        SrpServer {
            config,
            registry,
            users: Mutex::new(HashMap::new()),
            pending: SessionTable::new(),
            authenticated: SessionTable::new(),
        }
    }

    fn users(&self) -> MutexGuard<'_, HashMap<String, UserRecord>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The client a session was authenticated for, if any.
    pub fn authenticated_client(&self, session_id: &SessionId) -> Option<String> {
        self.authenticated
            .get(session_id)
            .map(|session| session.client_id.clone())
    }

    pub fn session_key(&self, session_id: &SessionId) -> Option<Zeroizing<Vec<u8>>> {
        self.authenticated
            .get(session_id)
            .map(|session| session.key.clone())
    }

    pub fn session_count(&self) -> usize {
        self.authenticated.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn expire_challenges(&self) {
        let timeout = self.config.challenge_timeout;
        let expired = self
            .pending
            .retain(|pending| pending.issued.elapsed() < timeout);
        if expired > 0 {
            debug!("dropped {} expired srp challenges", expired);
        }
        while self.config.max_pending_challenges > 0
            && self.pending.len() >= self.config.max_pending_challenges
        {
            match self.pending.remove_min_by_key(|pending| pending.issued) {
                Some((id, _)) => warn!("too many pending srp challenges, dropping {}", id),
                None => break,
            }
        }
    }
}

impl SrpServerFacade for SrpServer {
    fn register(&self, request: &RegistrationRequest) -> Res<RegistrationResponse> {
        let group_id = self
            .registry
            .clamp_group(request.requested_group, self.config.default_group_id);
        let params = self.registry.lookup(group_id)?;
        let salt = random_nonce(params.salt_length());

        self.users().insert(
            request.client_id.clone(),
            UserRecord {
                group_id,
                salt: salt.clone(),
                verifier: None,
            },
        );
        debug!(
            "registering {} in srp group {}",
            request.client_id, group_id
        );

        Ok(RegistrationResponse {
            group_id,
            n: number::to_hex(&params.n),
            g: number::to_hex(&params.g),
            salt: hex::encode(salt),
            hash: params.hash.name().to_string(),
        })
    }

    fn upload_verifier(&self, upload: &VerifierUpload) -> Res<String> {
        let verifier = parse_biguint_field(&upload.verifier, "verifier")?;
        let mut users = self.users();
        let record = users
            .get_mut(&upload.client_id)
            .ok_or(ProtocolViolation::UnknownClient)?;
        record.verifier = Some(verifier);
        Ok(REGISTRATION_COMPLETE.to_string())
    }

    fn begin_authentication(
        &self,
        request: &AuthenticationRequest,
    ) -> Res<AuthenticationChallenge> {
        let (group_id, salt, verifier) = {
            let users = self.users();
            let record = users
                .get(&request.client_id)
                .ok_or(ProtocolViolation::UnknownClient)?;
            let verifier = record
                .verifier
                .clone()
                .ok_or(ProtocolViolation::UnknownClient)?;
            (record.group_id, record.salt.clone(), verifier)
        };
        let params = self.registry.lookup(group_id)?;

        let private_key = generate_private_key(params, self.config.min_private_key_bits)?;
        let public_key =
            compute_server_public_key(params, &compute_k(params), &verifier, &private_key.value());

        self.expire_challenges();
        let session_id = self.pending.insert(PendingAuthentication {
            client_id: request.client_id.clone(),
            group_id,
            salt: salt.clone(),
            verifier,
            private_key,
            public_key: public_key.clone(),
            issued: Instant::now(),
        });

        Ok(AuthenticationChallenge {
            session_id,
            group_id,
            salt: hex::encode(salt),
            public_key_b: number::to_hex(&public_key),
        })
    }

    fn verify(&self, request: &EvidenceRequest) -> Res<EvidenceResponse> {
        let pending = self
            .pending
            .remove(&request.session_id)
            .ok_or(ProtocolViolation::UnknownSession)?;
        if pending.issued.elapsed() >= self.config.challenge_timeout {
            debug!("srp challenge {} expired", request.session_id);
            return Err(ProtocolViolation::UnknownSession.into());
        }
        if pending.client_id != request.client_id {
            return Err(ProtocolViolation::UnknownClient.into());
        }
        let params = self.registry.lookup(pending.group_id)?;
        let a_public = parse_biguint_field(&request.public_key_a, "publicKeyA")?;
        let evidence = parse_hex_field(&request.evidence, "evidence")?;

        let u = compute_u(params, &a_public, &pending.public_key);
        if self.config.enforce_public_key_check
            && ((&a_public % &params.n).is_zero() || u.is_zero())
        {
            warn!(
                "rejecting degenerate public key from {}",
                request.client_id
            );
            return Err(ProtocolViolation::PublicKeyInvalid.into());
        }

        let premaster_secret = SecretBigUint::new(&server_premaster_secret(
            params,
            &a_public,
            &pending.verifier,
            &u,
            &pending.private_key.value(),
        ));
        let key = compute_session_key(params, &premaster_secret.value());
        let expected = client_evidence(
            params,
            &pending.client_id,
            &pending.salt,
            &a_public,
            &pending.public_key,
            &key,
        );
        if !constant_time_equals(&expected, &evidence) {
            warn!("evidence mismatch for {}", request.client_id);
            return Err(ProtocolViolation::EvidenceMismatch.into());
        }

        let response = EvidenceResponse {
            session_id: request.session_id.clone(),
            evidence: hex::encode(server_evidence(params, &a_public, &evidence, &key)),
        };
        self.authenticated.insert_with_id(
            request.session_id.clone(),
            AuthenticatedSession {
                client_id: pending.client_id.clone(),
                key,
            },
        );
        debug!(
            "srp session {} authenticated for {}",
            request.session_id, pending.client_id
        );
        Ok(response)
    }

    fn logout(&self, request: &LogoutRequest) -> Res<()> {
        let session = self
            .authenticated
            .get(&request.session_id)
            .ok_or(ProtocolViolation::UnknownSession)?;
        if session.client_id != request.client_id {
            warn!(
                "{} tried to end a session of {}",
                request.client_id, session.client_id
            );
            return Err(ProtocolViolation::UnknownClient.into());
        }
        self.authenticated.remove(&request.session_id);
        debug!("srp session {} ended", request.session_id);
        Ok(())
    }
}

struct ClientSession {
    session_id: SessionId,
    key: Zeroizing<Vec<u8>>,
}

pub struct SrpClient<'a, T> {
    server: &'a T,
    client_id: String,
    password: Zeroizing<Vec<u8>>,
    registry: SrpRegistry,
    min_private_key_bits: u64,
    session: Option<ClientSession>,
}

impl<'a, T> SrpClient<'a, T>
where
    T: SrpServerFacade,
{
    pub fn new(server: &'a T, client_id: &str, password: &[u8]) -> Res<Self> {
        Ok(SrpClient {
            server,
            client_id: client_id.to_string(),
            password: Zeroizing::new(password.to_vec()),
            registry: SrpRegistry::builtin()?,
            min_private_key_bits: SrpServerConfig::default().min_private_key_bits,
            session: None,
        })
    }

    fn group(&self, group_id: u32, salt: &[u8]) -> Res<&SrpParameters> {
        let params = self.registry.lookup(group_id)?;
        if salt.len() < params.salt_length() {
            return Err(ProtocolViolation::Malformed("salt").into());
        }
        Ok(params)
    }

    /// Registers with the server and uploads the verifier. Returns the
    /// group the server picked.
    pub fn register(&mut self, requested_group: Option<u32>) -> Res<u32> {
        let response = self.server.register(&RegistrationRequest {
            client_id: self.client_id.clone(),
            requested_group,
        })?;
        let salt = parse_hex_field(&response.salt, "salt")?;
        let params = self.group(response.group_id, &salt)?;
        if parse_biguint_field(&response.n, "N")? != params.n
            || parse_biguint_field(&response.g, "g")? != params.g
        {
            return Err(ProtocolViolation::Malformed("N/g").into());
        }

        let x = SecretBigUint::new(&compute_x(
            params.hash,
            &salt,
            &self.client_id,
            &self.password,
        ));
        let verifier = compute_verifier(params, &x.value());
        let confirmation = self.server.upload_verifier(&VerifierUpload {
            client_id: self.client_id.clone(),
            verifier: number::to_hex(&verifier),
        })?;
        if confirmation != REGISTRATION_COMPLETE {
            return Err(ProtocolViolation::Malformed("confirmation").into());
        }
        Ok(response.group_id)
    }

    pub fn authenticate(&mut self) -> Res<SessionId> {
        let challenge = self.server.begin_authentication(&AuthenticationRequest {
            client_id: self.client_id.clone(),
        })?;
        let salt = parse_hex_field(&challenge.salt, "salt")?;
        let params = self.group(challenge.group_id, &salt)?;
        let b_public = parse_biguint_field(&challenge.public_key_b, "publicKeyB")?;
        if (&b_public % &params.n).is_zero() {
            return Err(ProtocolViolation::PublicKeyInvalid.into());
        }

        let a = generate_private_key(params, self.min_private_key_bits)?;
        let a_public = params.g.modexp(&a.value(), &params.n);
        let u = compute_u(params, &a_public, &b_public);
        if u.is_zero() {
            return Err(ProtocolViolation::PublicKeyInvalid.into());
        }
        let x = SecretBigUint::new(&compute_x(
            params.hash,
            &salt,
            &self.client_id,
            &self.password,
        ));
        let premaster_secret = SecretBigUint::new(&client_premaster_secret(
            params,
            &compute_k(params),
            &b_public,
            &x.value(),
            &a.value(),
            &u,
        ));
        let key = compute_session_key(params, &premaster_secret.value());
        let evidence = client_evidence(params, &self.client_id, &salt, &a_public, &b_public, &key);

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

        self.session = Some(ClientSession {
            session_id: challenge.session_id.clone(),
            key,
        });
        Ok(challenge.session_id)
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|session| &session.session_id)
    }

    pub fn session_key(&self) -> Option<&[u8]> {
        self.session.as_ref().map(|session| session.key.as_slice())
    }

    /// Ends the authenticated session on the server and drops the key.
    pub fn logout(&mut self) -> Res<()> {
        let session = self
            .session
            .take()
            .ok_or(ProtocolViolation::UnknownSession)?;
        self.server.logout(&LogoutRequest {
            session_id: session.session_id.clone(),
            client_id: self.client_id.clone(),
        })
    }
}

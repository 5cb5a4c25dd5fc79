pub mod secure_remote_password;

use crate::diffie_hellman::{kdf, DiffieHellman};
use crate::error::{AttackError, ConfigError, ProtocolViolation, Res};
use crate::number::{self, SecretBigUint};
use crate::params::DhRegistry;
use crate::protocols::diffie_hellman::{
    decrypt_message, encrypt_message, open_confirmation, parse_biguint_field, parse_hex_field,
    CloseSessionRequest, ConfirmationPayload, EncryptedPayload, GroupSelection, KeyExchangeRequest, KeyExchangeResponse,
    MessageRequest, MessageResponse, ServerFacade,
};
use crate::session::{SessionId, SessionTable};
use log::{debug, trace};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use std::sync::{Mutex, MutexGuard};
use zeroize::Zeroizing;


/// Degenerate generators that pin the shared secret to a tiny known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorSubstitution {
    One,
    P,
    PMinusOne,
}

impl GeneratorSubstitution {
    pub fn generator(&self, p: &BigUint) -> BigUint {
        match self {
            GeneratorSubstitution::One => BigUint::one(),
            GeneratorSubstitution::P => p.clone(),
            GeneratorSubstitution::PMinusOne => p - BigUint::one(),
        }
    }

    /// Every value the shared secret can take once the generator is replaced.
    pub fn secret_hypotheses(&self, p: &BigUint) -> Vec<BigUint> {
        match self {
            GeneratorSubstitution::One => vec![BigUint::one()],
            GeneratorSubstitution::P => vec![BigUint::zero()],
            // (p - 1)^k is 1 for even k and p - 1 for odd k
            GeneratorSubstitution::PMinusOne => vec![BigUint::one(), p - BigUint::one()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPolicy {
    /// Two honest exchanges, one with each side.
    Transparent,
    /// The upstream exchange runs over a degenerate generator and the
    /// server's key is recovered by guessing the shared secret.
    SubstituteGenerator(GeneratorSubstitution),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterceptedMessage {
    pub session_id: SessionId,
    pub direction: Direction,
    pub plaintext: Vec<u8>,
}

struct MitmSession {
    client_id: String,
    client_key: Zeroizing<Vec<u8>>,
    server_key: Zeroizing<Vec<u8>>,
    server_secret: SecretBigUint,
}

/// Sits in front of a server and looks like one to the client. Each side
/// gets its own key; everything relayed is decrypted and recorded.
pub struct ProtocolMitm<'b, T> {
    server: &'b T,
    policy: RelayPolicy,
    registry: DhRegistry,
    sessions: SessionTable<MitmSession>,
    intercepted: Mutex<Vec<InterceptedMessage>>,
}

impl<'b, T> ProtocolMitm<'b, T>
where
    T: ServerFacade,
{
    pub fn new(server: &'b T, policy: RelayPolicy) -> Res<ProtocolMitm<'b, T>> {
        Ok(ProtocolMitm::with_registry(
            server,
            policy,
            DhRegistry::builtin()?,
        ))
    }

    pub fn with_registry(
        server: &'b T,
        policy: RelayPolicy,
        registry: DhRegistry,
    ) -> ProtocolMitm<'b, T> {
        ProtocolMitm {
            server,
            policy,
            registry,
            sessions: SessionTable::new(),
            intercepted: Mutex::new(Vec::new()),
        }
    }

    pub fn intercepted(&self) -> Vec<InterceptedMessage> {
        self.log().iter().cloned().collect()
    }

    /// Hands over everything recorded so far and clears the log.
    pub fn take_intercepted(&self) -> Vec<InterceptedMessage> {
        self.log().drain(..).collect()
    }

    /// The shared secret of the server-facing exchange.
    pub fn recovered_secret(&self, session_id: &SessionId) -> Option<BigUint> {
        self.sessions
            .get(session_id)
            .map(|session| session.server_secret.value())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn log(&self) -> MutexGuard<'_, Vec<InterceptedMessage>> {
        self.intercepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, session_id: &SessionId, direction: Direction, plaintext: &[u8]) {
        trace!(
            "intercepted {} bytes {:?} in session {}",
            plaintext.len(),
            direction,
            session_id
        );
        self.log().push(InterceptedMessage {
            session_id: session_id.clone(),
            direction,
            plaintext: plaintext.to_vec(),
        });
    }

    /// Tries each possible shared secret until one opens the confirmation.
    fn guess_server_key(
        hypotheses: Vec<BigUint>,
        client_nonce: &[u8],
        server_nonce: &[u8],
        confirmation: &EncryptedPayload,
        expected: &ConfirmationPayload,
    ) -> Res<(BigUint, Zeroizing<Vec<u8>>, ConfirmationPayload)> {
        let tried = hypotheses.len();
        for secret in hypotheses {
            let key = kdf(&secret, client_nonce, server_nonce);
            if let Ok(payload) = open_confirmation(&key, confirmation, expected) {
                debug!("server key recovered from a guessed shared secret");
                return Ok((secret, key, payload));
            }
        }
        Err(AttackError::KeyHypothesesExhausted { tried }.into())
    }
}

impl<'b, T> ServerFacade for ProtocolMitm<'b, T>
where
    T: ServerFacade,
{
    fn key_exchange(&self, request: &KeyExchangeRequest) -> Res<KeyExchangeResponse> {
        let client_nonce = parse_hex_field(&request.nonce, "nonce")?;
        let client_public_key = request.diffie_hellman.public_key()?;
        let selection = request.diffie_hellman.selection()?;
        let (p, g) = selection.resolve(&self.registry)?;

        let mut client_side = DiffieHellman::owning_new(p.clone(), g.clone())?;
        let client_side_public_key = client_side
            .get_public_key()
            .cloned()
            .ok_or(ConfigError::MissingParameter("public key"))?;

        let (mut server_side, upstream_selection) = match self.policy {
            RelayPolicy::Transparent => (DiffieHellman::owning_new(p.clone(), g)?, selection),
            RelayPolicy::SubstituteGenerator(substitution) => {
                let forged_g = substitution.generator(&p);
                let upstream_selection = GroupSelection::Explicit {
                    p: p.clone(),
                    g: forged_g.clone(),
                };
                (
                    DiffieHellman::owning_new(p.clone(), forged_g)?,
                    upstream_selection,
                )
            }
        };
        let server_side_public_key = server_side
            .get_public_key()
            .cloned()
            .ok_or(ConfigError::MissingParameter("public key"))?;

        let upstream_request = KeyExchangeRequest {
            client_id: request.client_id.clone(),
            nonce: request.nonce.clone(),
            diffie_hellman: upstream_selection.to_offer(&server_side_public_key),
        };
        let response = self.server.key_exchange(&upstream_request)?;
        let server_nonce = parse_hex_field(&response.nonce, "nonce")?;

        let expected = ConfirmationPayload {
            session_id: response.session_id.clone(),
            client_id: request.client_id.clone(),
            client_nonce: request.nonce.clone(),
            server_nonce: response.nonce.clone(),
            message: String::new(),
        };
        let (server_secret, server_key, confirmation) = match self.policy {
            RelayPolicy::Transparent => {
                let server_public_key = parse_biguint_field(&response.public_key_b, "publicKeyB")?;
                let key = server_side.derive_shared_secret(
                    &server_public_key,
                    &client_nonce,
                    &server_nonce,
                )?;
                let confirmation = open_confirmation(&key, &response.confirmation, &expected)?;
                let secret = server_side
                    .get_shared_secret()
                    .ok_or(ConfigError::MissingParameter("shared secret"))?;
                (secret, key, confirmation)
            }
            RelayPolicy::SubstituteGenerator(substitution) => Self::guess_server_key(
                substitution.secret_hypotheses(&p),
                &client_nonce,
                &server_nonce,
                &response.confirmation,
                &expected,
            )?,
        };

        let client_key =
            client_side.derive_shared_secret(&client_public_key, &client_nonce, &server_nonce)?;
        let confirmation_plaintext = Zeroizing::new(serde_json::to_vec(&confirmation)?);
        self.record(
            &response.session_id,
            Direction::ServerToClient,
            &confirmation_plaintext,
        );

        self.sessions.insert_with_id(
            response.session_id.clone(),
            MitmSession {
                client_id: request.client_id.clone(),
                client_key: client_key.clone(),
                server_key,
                server_secret: SecretBigUint::new(&server_secret),
            },
        );
        debug!(
            "relaying session {} for client {}",
            response.session_id, request.client_id
        );

        Ok(KeyExchangeResponse {
            session_id: response.session_id,
            nonce: response.nonce,
            public_key_b: number::to_hex(&client_side_public_key),
            confirmation: encrypt_message(&client_key, &confirmation_plaintext)?,
        })
    }

    fn exchange_message(&self, request: &MessageRequest) -> Res<MessageResponse> {
        let session = self
            .sessions
            .get(&request.session_id)
            .ok_or(ProtocolViolation::UnknownSession)?;
        if session.client_id != request.client_id {
            return Err(ProtocolViolation::UnknownClient.into());
        }

        let message = decrypt_message(&session.client_key, &request.message)?;
        self.record(&request.session_id, Direction::ClientToServer, &message);
        let response = self.server.exchange_message(&MessageRequest {
            session_id: request.session_id.clone(),
            client_id: request.client_id.clone(),
            message: encrypt_message(&session.server_key, &message)?,
        })?;

        let reply = decrypt_message(&session.server_key, &response.message)?;
        self.record(&request.session_id, Direction::ServerToClient, &reply);
        Ok(MessageResponse {
            session_id: response.session_id,
            message: encrypt_message(&session.client_key, &reply)?,
        })
    }

    fn close_session(&self, request: &CloseSessionRequest) -> Res<()> {
        let session = self
            .sessions
            .get(&request.session_id)
            .ok_or(ProtocolViolation::UnknownSession)?;
        if session.client_id != request.client_id {
            return Err(ProtocolViolation::UnknownClient.into());
        }
        self.sessions.remove(&request.session_id);
        debug!("dropping relayed session {}", request.session_id);
        self.server.close_session(request)
    }
}

pub mod secure_remote_password;

use crate::aes;
use crate::diffie_hellman::{validate_public_key, DiffieHellman};
use crate::error::{ConfigError, Error, ProtocolViolation, Res};
use crate::number;
use crate::params::DhRegistry;
use crate::session::{SessionId, SessionTable};
use log::{debug, warn};
use num_bigint::BigUint;
use num_traits::One;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;


pub const KEY_EXCHANGE_COMPLETE: &str = "Key exchange complete";
pub const DEFAULT_SERVER_ID: &str = "dh-server";
pub const NONCE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct DhServerConfig {
    pub server_id: String,
    pub nonce_size: usize,
    /// Refuse `g` and public keys outside `(1, p - 1)`.
    pub reject_degenerate_parameters: bool,
}

impl Default for DhServerConfig {
    fn default() -> Self {
        DhServerConfig {
            server_id: DEFAULT_SERVER_ID.to_string(),
            nonce_size: NONCE_SIZE,
            reject_degenerate_parameters: true,
        }
    }
}

impl DhServerConfig {
    /// A server that takes whatever group and public key it is offered.
    pub fn naive() -> Self {
        DhServerConfig {
            reject_degenerate_parameters: false,
            ..DhServerConfig::default()
        }
    }
}

/// AES-256-CBC ciphertext and its IV, both hex encoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DhOffer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g: Option<String>,
    pub public_key_a: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeRequest {
    pub client_id: String,
    pub nonce: String,
    pub diffie_hellman: DhOffer,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponse {
    pub session_id: SessionId,
    pub nonce: String,
    pub public_key_b: String,
    pub confirmation: EncryptedPayload,
}

/// Plaintext of the confirmation the server encrypts under the derived key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPayload {
    pub session_id: SessionId,
    pub client_id: String,
    pub client_nonce: String,
    pub server_nonce: String,
    pub message: String,
}

impl ConfirmationPayload {
    pub fn matches(&self, expected: &ConfirmationPayload) -> bool {
        self.session_id == expected.session_id
            && self.client_id == expected.client_id
            && self.client_nonce.eq_ignore_ascii_case(&expected.client_nonce)
            && self.server_nonce.eq_ignore_ascii_case(&expected.server_nonce)
            && self.message.starts_with(KEY_EXCHANGE_COMPLETE)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub session_id: SessionId,
    pub client_id: String,
    pub message: EncryptedPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub session_id: SessionId,
    pub message: EncryptedPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseSessionRequest {
    pub session_id: SessionId,
    pub client_id: String,
}

/// How a client names the group it wants to run the exchange over.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupSelection {
    Named(String),
    Explicit { p: BigUint, g: BigUint },
}

impl GroupSelection {
    pub fn resolve(&self, registry: &DhRegistry) -> Res<(BigUint, BigUint)> {
        match self {
            GroupSelection::Named(name) => {
                let group = registry.lookup(name)?;
                Ok((group.p.clone(), group.g.clone()))
            }
            GroupSelection::Explicit { p, g } => Ok((p.clone(), g.clone())),
        }
    }

    pub fn to_offer(&self, public_key: &BigUint) -> DhOffer {
        match self {
            GroupSelection::Named(name) => DhOffer {
                group_name: Some(name.clone()),
                p: None,
                g: None,
                public_key_a: number::to_hex(public_key),
            },
            GroupSelection::Explicit { p, g } => DhOffer {
                group_name: None,
                p: Some(number::to_hex(p)),
                g: Some(number::to_hex(g)),
                public_key_a: number::to_hex(public_key),
            },
        }
    }
}

impl DhOffer {
    pub fn selection(&self) -> Result<GroupSelection, ProtocolViolation> {
        match (&self.group_name, &self.p, &self.g) {
            (Some(name), _, _) => Ok(GroupSelection::Named(name.clone())),
            (None, Some(p), Some(g)) => Ok(GroupSelection::Explicit {
                p: parse_biguint_field(p, "p")?,
                g: parse_biguint_field(g, "g")?,
            }),
            _ => Err(ProtocolViolation::Malformed("diffieHellman")),
        }
    }

    pub fn public_key(&self) -> Result<BigUint, ProtocolViolation> {
        parse_biguint_field(&self.public_key_a, "publicKeyA")
    }
}

pub fn parse_hex_field(value: &str, field: &'static str) -> Result<Vec<u8>, ProtocolViolation> {
    hex::decode(value).map_err(|_| ProtocolViolation::Malformed(field))
}

pub fn parse_biguint_field(value: &str, field: &'static str) -> Result<BigUint, ProtocolViolation> {
    number::from_hex(value).ok_or(ProtocolViolation::Malformed(field))
}

pub fn random_nonce(size: usize) -> Vec<u8> {
    let mut nonce = vec![0; size];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypts under `key` with a fresh random IV.
pub fn encrypt_message(key: &[u8], message: &[u8]) -> Res<EncryptedPayload> {
    let iv = random_nonce(aes::AES_BLOCK_SIZE);
    let ciphertext = aes::encrypt_cbc(message, key, &iv)?;
    Ok(EncryptedPayload {
        ciphertext: hex::encode(ciphertext),
        iv: hex::encode(iv),
    })
}

pub fn decrypt_message(key: &[u8], payload: &EncryptedPayload) -> Res<Zeroizing<Vec<u8>>> {
    let ciphertext = parse_hex_field(&payload.ciphertext, "ciphertext")?;
    let iv = parse_hex_field(&payload.iv, "iv")?;
    Ok(Zeroizing::new(aes::decrypt_cbc(&ciphertext, key, &iv)?))
}

/// Decrypts a confirmation and checks it against what this side expects.
/// Any failure, including a wrong key, is a confirmation mismatch.
pub fn open_confirmation(
    key: &[u8],
    confirmation: &EncryptedPayload,
    expected: &ConfirmationPayload,
) -> Result<ConfirmationPayload, ProtocolViolation> {
    let plaintext =
        decrypt_message(key, confirmation).map_err(|_| ProtocolViolation::ConfirmationMismatch)?;
    let payload: ConfirmationPayload = serde_json::from_slice(&plaintext)
        .map_err(|_| ProtocolViolation::ConfirmationMismatch)?;
    if !payload.matches(expected) {
        return Err(ProtocolViolation::ConfirmationMismatch);
    }
    Ok(payload)
}

// a facade from the client eyes to communicate with the server
pub trait ServerFacade {
    fn key_exchange(&self, request: &KeyExchangeRequest) -> Res<KeyExchangeResponse>;
    fn exchange_message(&self, request: &MessageRequest) -> Res<MessageResponse>;
    fn close_session(&self, request: &CloseSessionRequest) -> Res<()>;
}

pub trait Client {
    fn key_exchange(&mut self) -> Res<SessionId>;
    fn send_message(&self, message: &[u8]) -> Res<Vec<u8>>;
    fn close_session(&mut self) -> Res<()>;
}

struct ServerSession {
    client_id: String,
    key: Zeroizing<Vec<u8>>,
}

pub struct ProtocolServer {
    config: DhServerConfig,
    registry: DhRegistry,
    sessions: SessionTable<ServerSession>,
}

impl ProtocolServer {
    pub fn new(config: DhServerConfig) -> Res<ProtocolServer> {
        Ok(ProtocolServer::with_registry(config, DhRegistry::builtin()?))
    }

    pub fn with_registry(config: DhServerConfig, registry: DhRegistry) -> ProtocolServer {
        ProtocolServer {
            config,
            registry,
            sessions: SessionTable::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn owned_session(
        &self,
        session_id: &SessionId,
        client_id: &str,
    ) -> Result<Arc<ServerSession>, ProtocolViolation> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(ProtocolViolation::UnknownSession)?;
        if session.client_id != client_id {
            warn!(
                "client {} used session {} of another client",
                client_id, session_id
            );
            return Err(ProtocolViolation::UnknownClient);
        }
        Ok(session)
    }

    fn check_group(&self, p: &BigUint, g: &BigUint) -> Result<(), ProtocolViolation> {
        if self.config.reject_degenerate_parameters && validate_public_key(g, p).is_err() {
            return Err(ProtocolViolation::Malformed("g"));
        }
        Ok(())
    }

    fn accept_key_exchange(&self, request: &KeyExchangeRequest) -> Res<KeyExchangeResponse> {
        let client_nonce = parse_hex_field(&request.nonce, "nonce")?;
        let client_public_key = request.diffie_hellman.public_key()?;
        let (p, g) = request
            .diffie_hellman
            .selection()?
            .resolve(&self.registry)?;
        self.check_group(&p, &g)?;
        if self.config.reject_degenerate_parameters {
            validate_public_key(&client_public_key, &p)?;
        }

        let mut diffie_hellman = DiffieHellman::owning_new(p, g)?;
        let public_key = diffie_hellman
            .get_public_key()
            .cloned()
            .ok_or(ConfigError::MissingParameter("public key"))?;
        let server_nonce = random_nonce(self.config.nonce_size);
        let key =
            diffie_hellman.derive_shared_secret(&client_public_key, &client_nonce, &server_nonce)?;

        let session_id = self.sessions.insert(ServerSession {
            client_id: request.client_id.clone(),
            key: key.clone(),
        });
        debug!(
            "dh session {} established for client {}",
            session_id, request.client_id
        );

        let confirmation = ConfirmationPayload {
            session_id: session_id.clone(),
            client_id: request.client_id.clone(),
            client_nonce: request.nonce.clone(),
            server_nonce: hex::encode(&server_nonce),
            message: format!("{} with {}", KEY_EXCHANGE_COMPLETE, self.config.server_id),
        };
        let confirmation_plaintext = Zeroizing::new(serde_json::to_vec(&confirmation)?);

        Ok(KeyExchangeResponse {
            session_id,
            nonce: hex::encode(&server_nonce),
            public_key_b: number::to_hex(&public_key),
            confirmation: encrypt_message(&key, &confirmation_plaintext)?,
        })
    }
}

impl ServerFacade for ProtocolServer {
    fn key_exchange(&self, request: &KeyExchangeRequest) -> Res<KeyExchangeResponse> {
        self.accept_key_exchange(request).map_err(|e| {
            warn!("rejecting key exchange from {}: {}", request.client_id, e);
            e
        })
    }

    fn exchange_message(&self, request: &MessageRequest) -> Res<MessageResponse> {
        let session = self.owned_session(&request.session_id, &request.client_id)?;
        let message = decrypt_message(&session.key, &request.message)?;
        let reply = format!(
            "Hello from server ID: {} at session ID: {} message received from client: '{}'",
            self.config.server_id,
            request.session_id,
            String::from_utf8_lossy(&message)
        );

        Ok(MessageResponse {
            session_id: request.session_id.clone(),
            message: encrypt_message(&session.key, reply.as_bytes())?,
        })
    }

    fn close_session(&self, request: &CloseSessionRequest) -> Res<()> {
        self.owned_session(&request.session_id, &request.client_id)?;
        self.sessions.remove(&request.session_id);
        debug!("dh session {} closed", request.session_id);
        Ok(())
    }
}

struct ClientSession {
    session_id: SessionId,
    key: Zeroizing<Vec<u8>>,
}

pub struct ProtocolClient<'b, T> {
    client_id: String,
    selection: GroupSelection,
    p: BigUint,
    g: BigUint,
    server: &'b T,
    session: Option<ClientSession>,
}

impl<'b, T> ProtocolClient<'b, T>
where
    T: ServerFacade,
{
    pub fn new(
        client_id: &str,
        server: &'b T,
        selection: GroupSelection,
    ) -> Res<ProtocolClient<'b, T>> {
        let (p, g) = selection.resolve(&DhRegistry::builtin()?)?;
        Ok(ProtocolClient {
            client_id: client_id.to_string(),
            selection,
            p,
            g,
            server,
            session: None,
        })
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|session| &session.session_id)
    }
}

impl<'b, T> Client for ProtocolClient<'b, T>
where
    T: ServerFacade,
{
    fn key_exchange(&mut self) -> Res<SessionId> {
        let mut diffie_hellman = DiffieHellman::owning_new(self.p.clone(), self.g.clone())?;
        let public_key = diffie_hellman
            .get_public_key()
            .cloned()
            .ok_or(ConfigError::MissingParameter("public key"))?;
        let client_nonce = random_nonce(NONCE_SIZE);

        let request = KeyExchangeRequest {
            client_id: self.client_id.clone(),
            nonce: hex::encode(&client_nonce),
            diffie_hellman: self.selection.to_offer(&public_key),
        };
        let response = self.server.key_exchange(&request)?;

        let server_nonce = parse_hex_field(&response.nonce, "nonce")?;
        let server_public_key = parse_biguint_field(&response.public_key_b, "publicKeyB")?;
        validate_public_key(&server_public_key, &self.p)?;
        let key =
            diffie_hellman.derive_shared_secret(&server_public_key, &client_nonce, &server_nonce)?;

        let expected = ConfirmationPayload {
            session_id: response.session_id.clone(),
            client_id: self.client_id.clone(),
            client_nonce: request.nonce,
            server_nonce: response.nonce.clone(),
            message: String::new(),
        };
        open_confirmation(&key, &response.confirmation, &expected)?;
        debug!("dh session {} confirmed", response.session_id);

        self.session = Some(ClientSession {
            session_id: response.session_id.clone(),
            key,
        });
        Ok(response.session_id)
    }

    fn send_message(&self, message: &[u8]) -> Res<Vec<u8>> {
        let session = self
            .session
            .as_ref()
            .ok_or(ProtocolViolation::UnknownSession)?;
        let response = self.server.exchange_message(&MessageRequest {
            session_id: session.session_id.clone(),
            client_id: self.client_id.clone(),
            message: encrypt_message(&session.key, message)?,
        })?;
        if response.session_id != session.session_id {
            return Err(Error::Protocol(ProtocolViolation::UnknownSession));
        }
        Ok(decrypt_message(&session.key, &response.message)?.to_vec())
    }

    /// Ends the session on the server and forgets the key. The local key
    /// is dropped even if the server no longer knows the session.
    fn close_session(&mut self) -> Res<()> {
        let session = self
            .session
            .take()
            .ok_or(ProtocolViolation::UnknownSession)?;
        self.server.close_session(&CloseSessionRequest {
            session_id: session.session_id.clone(),
            client_id: self.client_id.clone(),
        })
    }
}

use openssl::error::ErrorStack;
use std::fmt;
pub type Res<T> = Result<T, Error>;


#[derive(Debug, PartialEq, Clone)]
pub enum PaddingError {
    BadLength,
    BadPadValue,
    InconsistentPadBytes,
}

impl fmt::Display for PaddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PaddingError::BadLength => write!(f, "Buffer length is not a block multiple"),
            PaddingError::BadPadValue => write!(f, "Pad value is out of range"),
            PaddingError::InconsistentPadBytes => {
                write!(f, "Pad bytes do not all equal the pad value")
            }
        }
    }
}

impl std::error::Error for PaddingError {}

#[derive(Debug, PartialEq, Clone)]
pub enum CipherError {
    InitializationFailed,
    OperationFailed,
    SizeMismatch,
    CounterOverflow,
}

impl From<ErrorStack> for CipherError {
    fn from(_: ErrorStack) -> Self {
        CipherError::OperationFailed
    }
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CipherError::InitializationFailed => write!(f, "Block cipher initialization failed"),
            CipherError::OperationFailed => write!(f, "Block cipher operation failed"),
            CipherError::SizeMismatch => write!(f, "Input size does not fit the cipher"),
            CipherError::CounterOverflow => write!(f, "CTR counter exhausted for this nonce"),
        }
    }
}

impl std::error::Error for CipherError {}

#[derive(Debug, PartialEq, Clone)]
pub enum ConfigError {
    InvalidBlockSize,
    UnknownGroup(String),
    UnknownHash(String),
    MissingParameter(&'static str),
    InvalidParameter(&'static str),
    Malformed(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Malformed(e.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Malformed(e.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBlockSize => write!(f, "Block size must be in 1..=255"),
            ConfigError::UnknownGroup(group) => write!(f, "Unknown group '{}'", group),
            ConfigError::UnknownHash(hash) => write!(f, "Unknown hash algorithm '{}'", hash),
            ConfigError::MissingParameter(name) => write!(f, "Missing parameter {}", name),
            ConfigError::InvalidParameter(name) => write!(f, "Invalid parameter {}", name),
            ConfigError::Malformed(reason) => write!(f, "Malformed configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Raised by the attack algorithms. Whatever plaintext was recovered before
/// the failure is not returned, only how far the attack got.
#[derive(Debug, PartialEq, Clone)]
pub enum AttackError {
    OracleInconsistent { block: usize, recovered: usize },
    BruteForceExhausted { block: usize, recovered: usize },
    PreconditionViolated(&'static str),
    KeyHypothesesExhausted { tried: usize },
}

impl fmt::Display for AttackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackError::OracleInconsistent { block, recovered } => write!(
                f,
                "Attack failed: oracle answered inconsistently in block {} ({} bytes recovered)",
                block, recovered
            ),
            AttackError::BruteForceExhausted { block, recovered } => write!(
                f,
                "Attack failed: no candidate byte validated in block {} ({} bytes recovered)",
                block, recovered
            ),
            AttackError::PreconditionViolated(reason) => {
                write!(f, "Attack failed: precondition violated: {}", reason)
            }
            AttackError::KeyHypothesesExhausted { tried } => write!(
                f,
                "Attack failed: none of the {} key hypotheses matched",
                tried
            ),
        }
    }
}

impl std::error::Error for AttackError {}

#[derive(Debug, PartialEq, Clone)]
pub enum ProtocolViolation {
    PublicKeyInvalid,
    ConfirmationMismatch,
    EvidenceMismatch,
    UnknownSession,
    UnknownClient,
    Malformed(&'static str),
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::PublicKeyInvalid => write!(f, "Peer public key is invalid"),
            ProtocolViolation::ConfirmationMismatch => {
                write!(f, "Key exchange confirmation does not match")
            }
            ProtocolViolation::EvidenceMismatch => write!(f, "Evidence message does not match"),
            ProtocolViolation::UnknownSession => write!(f, "Session id is not valid"),
            ProtocolViolation::UnknownClient => write!(f, "Client id is not registered"),
            ProtocolViolation::Malformed(field) => write!(f, "Malformed field {}", field),
        }
    }
}

impl std::error::Error for ProtocolViolation {}

#[derive(Debug, PartialEq, Clone)]
pub struct DecryptionError {
    pub invalid_plaintext: Vec<u8>,
}

impl fmt::Display for DecryptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "High ascii bytes were detected. output is:\n{:?}",
            self.invalid_plaintext
        )
    }
}

impl std::error::Error for DecryptionError {}

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    Padding(PaddingError),
    Cipher(CipherError),
    Config(ConfigError),
    Attack(AttackError),
    Protocol(ProtocolViolation),
    Decryption(DecryptionError),
}

impl From<PaddingError> for Error {
    fn from(e: PaddingError) -> Self {
        Error::Padding(e)
    }
}

impl From<CipherError> for Error {
    fn from(e: CipherError) -> Self {
        Error::Cipher(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<AttackError> for Error {
    fn from(e: AttackError) -> Self {
        Error::Attack(e)
    }
}

impl From<ProtocolViolation> for Error {
    fn from(e: ProtocolViolation) -> Self {
        Error::Protocol(e)
    }
}

impl From<DecryptionError> for Error {
    fn from(e: DecryptionError) -> Self {
        Error::Decryption(e)
    }
}

impl From<ErrorStack> for Error {
    fn from(e: ErrorStack) -> Self {
        Error::Cipher(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Padding(e) => write!(f, "{}", e),
            Error::Cipher(e) => write!(f, "{}", e),
            Error::Config(e) => write!(f, "{}", e),
            Error::Attack(e) => write!(f, "{}", e),
            Error::Protocol(e) => write!(f, "{}", e),
            Error::Decryption(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

//! Block cipher modes, key exchange protocols, and the attacks that break
//! their weak configurations.

pub mod aes;
pub mod challenges;
pub mod compare;
pub mod ctr;
pub mod diffie_hellman;
pub mod error;
pub mod hash;
pub mod number;
pub mod padding;
pub mod params;
pub mod protocols;
pub mod session;
pub mod xor;

//! Cryptographic primitives for Password Safe containers

pub mod cipher;
pub mod kdf;
pub mod random;

use thiserror::Error;

/// Errors raised while building cipher state.
///
/// These are programming or configuration errors: wrong key sizes never come
/// from file content, since every key is derived to a fixed length first.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// A block cipher rejected the key length.
    #[error("Invalid key length for {cipher}: got {actual} bytes")]
    InvalidKeyLength { cipher: &'static str, actual: usize },

    /// The key-stretch work factor is below the accepted minimum.
    #[error("Hash iteration count {actual} is below the minimum of {minimum}")]
    IterationsTooLow { actual: u32, minimum: u32 },
}

// Re-export commonly used types
pub use cipher::{BlockCipher, BlowfishCipher, TwofishCipher};
pub use random::{OsRandom, RandomSource};

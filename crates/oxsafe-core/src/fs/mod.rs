//! Encrypted stream primitives shared by the container formats

pub mod cbc;
pub mod context;
pub mod legacy_crypt;

// Re-export commonly used types
pub use cbc::{
    CancelToken, CbcError, CbcReader, CbcWriter, CipherBlock, ReadOutcome, SecureBuffer,
    TruncationPolicy, copy_into,
};
pub use context::FileContext;
pub use legacy_crypt::{CIPHERTEXT_SUFFIX, LegacyCrypt, LegacyCryptError, LegacyCryptMode};

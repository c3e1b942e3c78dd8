#![forbid(unsafe_code)]

//! Block ciphers used by the container formats.
//!
//! The CBC codec only ever needs single-block ECB operations; chaining is
//! done by the codec itself so that the running IV can be carried across
//! blocks of different records. Both ciphers come from RustCrypto and are
//! zeroized on drop.

use std::fmt;

use blowfish::Blowfish;
use twofish::Twofish;
use twofish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use super::CryptoError;

/// A keyed block cipher operating on one block at a time.
///
/// Implementations must panic if handed a slice that is not exactly
/// [`block_size`](Self::block_size) bytes; that is always a codec bug.
pub trait BlockCipher: Send + Sync {
    /// Cipher block size in bytes (8 for Blowfish, 16 for Twofish).
    fn block_size(&self) -> usize;

    /// Encrypt a single block in place.
    fn encrypt_block(&self, block: &mut [u8]);

    /// Decrypt a single block in place.
    fn decrypt_block(&self, block: &mut [u8]);
}

/// Twofish with a 256-bit key, used by the V3 format.
pub struct TwofishCipher {
    inner: Twofish,
}

impl TwofishCipher {
    pub const BLOCK_SIZE: usize = 16;

    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let inner = <Twofish as KeyInit>::new_from_slice(key).map_err(|_| {
            CryptoError::InvalidKeyLength {
                cipher: "Twofish",
                actual: key.len(),
            }
        })?;
        Ok(Self { inner })
    }
}

impl BlockCipher for TwofishCipher {
    fn block_size(&self) -> usize {
        Self::BLOCK_SIZE
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        assert_eq!(block.len(), Self::BLOCK_SIZE, "Twofish block must be 16 bytes");
        self.inner.encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        assert_eq!(block.len(), Self::BLOCK_SIZE, "Twofish block must be 16 bytes");
        self.inner.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

impl fmt::Debug for TwofishCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwofishCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Blowfish, used by the legacy (1.x/2.x) formats and the whole-file utility.
pub struct BlowfishCipher {
    inner: Blowfish,
}

impl BlowfishCipher {
    pub const BLOCK_SIZE: usize = 8;

    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let inner = <Blowfish as KeyInit>::new_from_slice(key).map_err(|_| {
            CryptoError::InvalidKeyLength {
                cipher: "Blowfish",
                actual: key.len(),
            }
        })?;
        Ok(Self { inner })
    }
}

impl BlockCipher for BlowfishCipher {
    fn block_size(&self) -> usize {
        Self::BLOCK_SIZE
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        assert_eq!(block.len(), Self::BLOCK_SIZE, "Blowfish block must be 8 bytes");
        self.inner.encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        assert_eq!(block.len(), Self::BLOCK_SIZE, "Blowfish block must be 8 bytes");
        self.inner.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

impl fmt::Debug for BlowfishCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlowfishCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

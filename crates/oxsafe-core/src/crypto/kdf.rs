#![forbid(unsafe_code)]

//! Passkey derivation for both container generations.
//!
//! Legacy files key Blowfish with `SHA1(passkey || salt)` and carry a
//! separate password verifier (the "randhash"). V3 files stretch the passkey
//! with iterated SHA-256 and store `SHA256(P')` as the verifier.

use ring::digest::{self, SHA1_FOR_LEGACY_USE_ONLY, SHA256};
use zeroize::Zeroizing;

use super::CryptoError;
use super::cipher::{BlockCipher, BlowfishCipher};

/// SHA-1 output size.
pub const SHA1_LEN: usize = 20;

/// SHA-256 output size; also the V3 stretched key size.
pub const SHA256_LEN: usize = 32;

/// Random prefix bytes stored in legacy files.
pub const STUFF_LEN: usize = 8;

/// The verifier hashes the prefix as 10 bytes, the last two always zero.
const STUFF_HASH_LEN: usize = 10;

/// Blowfish rounds applied to the random prefix when computing the verifier.
const RANDHASH_ROUNDS: usize = 1000;

/// Lowest accepted V3 key-stretch iteration count.
pub const MIN_HASH_ITERATIONS: u32 = 2048;

/// Build the legacy Blowfish cipher: key = `SHA1(passkey || salt)`.
pub fn legacy_cipher(passkey: &[u8], salt: &[u8]) -> Result<BlowfishCipher, CryptoError> {
    let mut ctx = digest::Context::new(&SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(passkey);
    ctx.update(salt);
    let key = Zeroizing::new(ctx.finish().as_ref().to_vec());
    BlowfishCipher::new(&key)
}

/// Compute the legacy password verifier for a random prefix.
///
/// `tempSalt = SHA1(stuff[10] || passkey)`, the first eight prefix bytes are
/// Blowfish-encrypted 1000 times under `tempSalt`, the two trailing bytes are
/// cleared, and the result is `SHA1(buf[10] || tempSalt)`.
pub fn legacy_randhash(
    passkey: &[u8],
    stuff: &[u8; STUFF_LEN],
) -> Result<[u8; SHA1_LEN], CryptoError> {
    let mut buf = Zeroizing::new([0u8; STUFF_HASH_LEN]);
    buf[..STUFF_LEN].copy_from_slice(stuff);

    let mut ctx = digest::Context::new(&SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(&buf[..]);
    ctx.update(passkey);
    let mut temp_salt = Zeroizing::new([0u8; SHA1_LEN]);
    temp_salt.copy_from_slice(ctx.finish().as_ref());

    let cipher = BlowfishCipher::new(&temp_salt[..])?;
    for _ in 0..RANDHASH_ROUNDS {
        cipher.encrypt_block(&mut buf[..BlowfishCipher::BLOCK_SIZE]);
    }
    buf[STUFF_HASH_LEN - 2] = 0;
    buf[STUFF_HASH_LEN - 1] = 0;

    let mut ctx = digest::Context::new(&SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(&buf[..]);
    ctx.update(&temp_salt[..]);
    let mut out = [0u8; SHA1_LEN];
    out.copy_from_slice(ctx.finish().as_ref());
    Ok(out)
}

/// Stretch a passkey for V3: `P' = SHA256(passkey || salt)`, then
/// `iterations` rounds of `P' = SHA256(P')`.
pub fn stretch_key(
    passkey: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; SHA256_LEN]>, CryptoError> {
    if iterations < MIN_HASH_ITERATIONS {
        return Err(CryptoError::IterationsTooLow {
            actual: iterations,
            minimum: MIN_HASH_ITERATIONS,
        });
    }

    let mut ctx = digest::Context::new(&SHA256);
    ctx.update(passkey);
    ctx.update(salt);
    let mut key = Zeroizing::new([0u8; SHA256_LEN]);
    key.copy_from_slice(ctx.finish().as_ref());

    for _ in 0..iterations {
        let next = digest::digest(&SHA256, &key[..]);
        key.copy_from_slice(next.as_ref());
    }
    Ok(key)
}

/// The stored V3 verifier `H(P') = SHA256(P')`.
pub fn stretched_key_verifier(stretched: &[u8; SHA256_LEN]) -> [u8; SHA256_LEN] {
    let mut out = [0u8; SHA256_LEN];
    out.copy_from_slice(digest::digest(&SHA256, stretched).as_ref());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randhash_is_deterministic() {
        let stuff = [1, 2, 3, 4, 5, 6, 7, 8];
        let a = legacy_randhash(b"secret", &stuff).unwrap();
        let b = legacy_randhash(b"secret", &stuff).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_randhash_depends_on_passkey() {
        let stuff = [9u8; STUFF_LEN];
        let a = legacy_randhash(b"secret", &stuff).unwrap();
        let b = legacy_randhash(b"Secret", &stuff).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_stretch_rejects_low_iterations() {
        let err = stretch_key(b"pw", b"salt", 10).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::IterationsTooLow { actual: 10, minimum: MIN_HASH_ITERATIONS }
        ));
    }

    #[test]
    fn test_stretch_depends_on_salt_and_iterations() {
        let a = stretch_key(b"pw", b"salt-a", MIN_HASH_ITERATIONS).unwrap();
        let b = stretch_key(b"pw", b"salt-b", MIN_HASH_ITERATIONS).unwrap();
        let c = stretch_key(b"pw", b"salt-a", MIN_HASH_ITERATIONS + 1).unwrap();
        assert_ne!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_verifier_is_hash_of_stretched_key() {
        let key = stretch_key(b"pw", b"salt", MIN_HASH_ITERATIONS).unwrap();
        let verifier = stretched_key_verifier(&key);
        assert_eq!(verifier.as_slice(), digest::digest(&SHA256, &key[..]).as_ref());
    }

    #[test]
    fn test_legacy_cipher_accepts_sha1_key() {
        assert!(legacy_cipher(b"pw", &[0u8; 8]).is_ok());
    }
}

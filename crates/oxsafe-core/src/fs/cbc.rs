//! Typed-block CBC stream shared by every container generation.
//!
//! # Block layout
//!
//! Each logical block starts with one cipher block holding a 4-byte
//! little-endian payload length and a 1-byte type; the rest of that block is
//! random. With a 16-byte cipher the first `min(len, 11)` payload bytes are
//! stored in those spare bytes. The remaining payload follows in whole cipher
//! blocks, the last one topped up with random bytes. The declared length is
//! what disambiguates payload from padding on read.
//!
//! 8-byte ciphers always emit at least one data block, even for an empty
//! payload. This wastes a block per empty field but existing legacy files
//! depend on it.
//!
//! Chaining is explicit: the IV is XORed into each plaintext block before
//! encryption and then replaced by that ciphertext block, across logical
//! blocks, for the lifetime of the stream.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{trace, warn};
use zeroize::Zeroizing;

use crate::crypto::{BlockCipher, RandomSource};

/// An owned byte buffer that is zeroed when dropped.
pub type SecureBuffer = Zeroizing<Vec<u8>>;

/// Bytes of payload carried in the length block of a 16-byte cipher.
const INLINE_PAYLOAD_LEN: usize = 11;

/// Offset of the payload inside the length block (after length + type).
const INLINE_PAYLOAD_OFFSET: usize = 5;

#[derive(Error, Debug)]
pub enum CbcError {
    #[error("IO error in encrypted stream: {0}")]
    Io(#[from] io::Error),

    /// The stream ended inside a cipher block or inside a declared payload.
    #[error("Truncated encrypted block: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The length field claims more data than the file can still hold.
    #[error("Declared block length {declared} needs {needed} bytes but only {remaining} remain in the file")]
    DeclaredLengthExceedsFile {
        declared: u64,
        needed: u64,
        remaining: u64,
    },

    /// Payloads are limited to what fits the signed 32-bit length field.
    #[error("Block payload of {0} bytes is too large")]
    PayloadTooLarge(usize),

    /// The caller raised the cancel token between blocks.
    #[error("Read cancelled")]
    Cancelled,

    /// A block did not fit the caller's buffer and truncation was not allowed.
    #[error("Block holds {needed} bytes but the destination buffer has {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Cooperative cancellation for long reads.
///
/// Cloning shares the flag; raising it on any clone makes the next
/// [`CbcReader::read_block`] fail with [`CbcError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One decrypted logical block.
pub struct CipherBlock {
    pub block_type: u8,
    pub data: SecureBuffer,
}

impl fmt::Debug for CipherBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherBlock")
            .field("block_type", &self.block_type)
            .field("len", &self.data.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

/// Result of a successful block read.
#[derive(Debug)]
pub enum ReadOutcome {
    Block(CipherBlock),
    /// Clean end of input, or the raw terminator block was reached.
    EndOfStream,
}

/// What to do when a block is larger than a caller-supplied buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TruncationPolicy {
    /// Fail with [`CbcError::BufferTooSmall`].
    #[default]
    Reject,
    /// Copy as much as fits and drop the rest (legacy behaviour).
    Truncate,
}

/// Copy a decrypted payload into a caller buffer.
///
/// Returns the number of bytes copied. A payload larger than `dest` follows
/// `policy`.
pub fn copy_into(data: &[u8], dest: &mut [u8], policy: TruncationPolicy) -> Result<usize, CbcError> {
    let needed = data.len();
    if needed > dest.len() {
        match policy {
            TruncationPolicy::Reject => {
                return Err(CbcError::BufferTooSmall {
                    needed,
                    available: dest.len(),
                });
            }
            TruncationPolicy::Truncate => {
                warn!(needed, available = dest.len(), "Truncating payload into caller buffer");
            }
        }
    }
    let copied = needed.min(dest.len());
    dest[..copied].copy_from_slice(&data[..copied]);
    Ok(copied)
}

/// Encrypting side of the stream.
pub struct CbcWriter<W> {
    inner: W,
    cipher: Box<dyn BlockCipher>,
    iv: Zeroizing<Vec<u8>>,
    rng: Arc<dyn RandomSource>,
}

impl<W: Write> CbcWriter<W> {
    /// Start a stream with the given cipher and IV.
    ///
    /// # Panics
    ///
    /// Panics if the IV is not exactly one cipher block long.
    pub fn new(inner: W, cipher: Box<dyn BlockCipher>, iv: &[u8], rng: Arc<dyn RandomSource>) -> Self {
        assert_eq!(
            iv.len(),
            cipher.block_size(),
            "CBC IV must be exactly one cipher block"
        );
        Self {
            inner,
            cipher,
            iv: Zeroizing::new(iv.to_vec()),
            rng,
        }
    }

    /// Encrypt and append one typed block. Returns the number of bytes written.
    pub fn write_block(&mut self, block_type: u8, data: &[u8]) -> Result<usize, CbcError> {
        let length = i32::try_from(data.len()).map_err(|_| CbcError::PayloadTooLarge(data.len()))?;
        let bs = self.cipher.block_size();

        let mut block = Zeroizing::new(vec![0u8; bs]);
        self.rng.fill_bytes(&mut block);
        block[..4].copy_from_slice(&length.to_le_bytes());
        block[4] = block_type;

        let mut rest = data;
        if bs == 16 {
            let inline = rest.len().min(INLINE_PAYLOAD_LEN);
            block[INLINE_PAYLOAD_OFFSET..INLINE_PAYLOAD_OFFSET + inline]
                .copy_from_slice(&rest[..inline]);
            rest = &rest[inline..];
        }
        let mut written = self.emit(&mut block)?;

        for chunk in rest.chunks(bs) {
            if chunk.len() < bs {
                self.rng.fill_bytes(&mut block);
            }
            block[..chunk.len()].copy_from_slice(chunk);
            written += self.emit(&mut block)?;
        }
        if bs == 8 && rest.is_empty() {
            self.rng.fill_bytes(&mut block);
            written += self.emit(&mut block)?;
        }

        trace!(block_type, len = data.len(), written, "Wrote CBC block");
        Ok(written)
    }

    fn emit(&mut self, block: &mut [u8]) -> Result<usize, CbcError> {
        xor_in_place(block, &self.iv);
        self.cipher.encrypt_block(block);
        self.iv.copy_from_slice(block);
        self.inner.write_all(block)?;
        Ok(block.len())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Decrypting side of the stream.
pub struct CbcReader<R> {
    inner: R,
    cipher: Box<dyn BlockCipher>,
    iv: Zeroizing<Vec<u8>>,
    position: u64,
    file_len: Option<u64>,
    terminal: Option<Vec<u8>>,
    terminated: bool,
    cancel: Option<CancelToken>,
}

impl<R: Read> CbcReader<R> {
    /// Start reading at `position` bytes into a stream of known `file_len`
    /// (`None` disables the length bound).
    ///
    /// # Panics
    ///
    /// Panics if the IV is not exactly one cipher block long.
    pub fn new(
        inner: R,
        cipher: Box<dyn BlockCipher>,
        iv: &[u8],
        position: u64,
        file_len: Option<u64>,
    ) -> Self {
        assert_eq!(
            iv.len(),
            cipher.block_size(),
            "CBC IV must be exactly one cipher block"
        );
        Self {
            inner,
            cipher,
            iv: Zeroizing::new(iv.to_vec()),
            position,
            file_len,
            terminal: None,
            terminated: false,
            cancel: None,
        }
    }

    /// Treat this raw (unencrypted) cipher-block value as end of stream.
    #[must_use]
    pub fn with_terminal(mut self, terminal: &[u8]) -> Self {
        self.terminal = Some(terminal.to_vec());
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn set_cancel_token(&mut self, token: Option<CancelToken>) {
        self.cancel = token;
    }

    /// Whether the last `EndOfStream` came from the terminator block rather
    /// than from running out of input.
    pub fn reached_terminal(&self) -> bool {
        self.terminated
    }

    /// Bytes consumed from the underlying stream so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read and decrypt the next block.
    pub fn read_block(&mut self) -> Result<ReadOutcome, CbcError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(CbcError::Cancelled);
        }

        let bs = self.cipher.block_size();
        let mut block = Zeroizing::new(vec![0u8; bs]);
        let got = read_full(&mut self.inner, &mut block)?;
        if got == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        if got < bs {
            return Err(CbcError::Truncated {
                expected: bs,
                actual: got,
            });
        }
        self.position += bs as u64;

        if self.terminal.as_deref() == Some(&block[..]) {
            self.terminated = true;
            trace!(position = self.position, "Reached stream terminator");
            return Ok(ReadOutcome::EndOfStream);
        }

        self.decrypt_chained(&mut block);
        let declared = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        let block_type = block[4];

        let Ok(length) = i32::try_from(declared) else {
            return Err(CbcError::DeclaredLengthExceedsFile {
                declared: u64::from(declared),
                needed: u64::from(declared),
                remaining: self.remaining(),
            });
        };
        let length = length as usize;

        let inline = if bs == 16 { length.min(INLINE_PAYLOAD_LEN) } else { 0 };
        let rest = length - inline;
        let mut body_len = rest.div_ceil(bs) * bs;
        if bs == 8 && body_len == 0 {
            body_len = bs;
        }

        if self.file_len.is_some() && body_len as u64 > self.remaining() {
            warn!(declared, body_len, remaining = self.remaining(), "Block length exceeds file");
            return Err(CbcError::DeclaredLengthExceedsFile {
                declared: u64::from(declared),
                needed: body_len as u64,
                remaining: self.remaining(),
            });
        }

        let mut data = Zeroizing::new(Vec::with_capacity(length));
        data.extend_from_slice(&block[INLINE_PAYLOAD_OFFSET..INLINE_PAYLOAD_OFFSET + inline]);

        if body_len > 0 {
            let mut body = Zeroizing::new(vec![0u8; body_len]);
            let got = read_full(&mut self.inner, &mut body)?;
            if got < body_len {
                return Err(CbcError::Truncated {
                    expected: body_len,
                    actual: got,
                });
            }
            self.position += body_len as u64;
            for chunk in body.chunks_mut(bs) {
                self.decrypt_chained(chunk);
            }
            data.extend_from_slice(&body[..rest]);
        }

        trace!(block_type, len = length, "Read CBC block");
        Ok(ReadOutcome::Block(CipherBlock { block_type, data }))
    }

    fn decrypt_chained(&mut self, block: &mut [u8]) {
        let ciphertext = Zeroizing::new(block.to_vec());
        self.cipher.decrypt_block(block);
        xor_in_place(block, &self.iv);
        self.iv.copy_from_slice(&ciphertext);
    }

    fn remaining(&self) -> u64 {
        self.file_len
            .map_or(u64::MAX, |len| len.saturating_sub(self.position))
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn xor_in_place(block: &mut [u8], iv: &[u8]) {
    for (b, v) in block.iter_mut().zip(iv) {
        *b ^= v;
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

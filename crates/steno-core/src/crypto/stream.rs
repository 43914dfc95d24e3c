//! XChaCha20-Poly1305 secret stream.
//!
//! Layout of the 24-byte header sent once by the sealing side:
//! ```text
//! [hchacha_input:16][inonce:8]
//! ```
//! The stream key is `HChaCha20(session_key, hchacha_input)`.  The 12-byte
//! ChaCha20 nonce is `[counter:4 LE][inonce:8]` with the counter starting at 1.
//!
//! Layout of each sealed frame (17 bytes of overhead):
//! ```text
//! [tag:1 encrypted][ciphertext:N][mac:16]
//! ```
//! Keystream block 0 keys Poly1305, block 1 encrypts the tag (padded to a
//! full block that is also authenticated), and the message starts at block 2.
//! The authenticator is an unpadded Poly1305 over
//! ```text
//! [tag_block:64][ciphertext:N][zero:N % 16][ad_len:8 LE][64 + N:8 LE]
//! ```
//! Associated data is always empty on this channel.  After every frame
//! `inonce ^= mac[0..8]` and the counter increments, so a frame only opens in
//! the exact position it was sealed.  This is libsodium's
//! `crypto_secretstream_xchacha20poly1305` byte for byte.

use chacha20::cipher::consts::U10;
use chacha20::cipher::generic_array::GenericArray;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{hchacha, ChaCha20};
use poly1305::universal_hash::KeyInit;
use poly1305::{Poly1305, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{CryptoError, SessionKey};

/// Length of the stream header frame.
pub const HEADER_LEN: usize = 24;

/// Per-frame overhead: one tag byte plus the 16-byte authenticator.
pub const ABYTES: usize = 1 + MAC_LEN;

const MAC_LEN: usize = 16;
const KEY_LEN: usize = 32;
const INONCE_LEN: usize = 8;
const BLOCK_LEN: usize = 64;

/// Tag sealed alongside each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamTag {
    /// Ordinary frame.
    Message = 0x00,
    /// End of a logical chunk; no state change.
    Push = 0x01,
    /// Re-derive the stream key after this frame.
    Rekey = 0x02,
    /// Last frame of the stream.
    Final = 0x03,
}

impl TryFrom<u8> for StreamTag {
    type Error = CryptoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(StreamTag::Message),
            0x01 => Ok(StreamTag::Push),
            0x02 => Ok(StreamTag::Rekey),
            0x03 => Ok(StreamTag::Final),
            other => Err(CryptoError::UnknownTag(other)),
        }
    }
}

const TAG_REKEY_BIT: u8 = StreamTag::Rekey as u8;

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Zeroize, ZeroizeOnDrop)]
struct StreamState {
    key: [u8; KEY_LEN],
    counter: u32,
    inonce: [u8; INONCE_LEN],
}

impl StreamState {
    fn from_header(session_key: &SessionKey, header: &[u8; HEADER_LEN]) -> Self {
        let mut subkey = hchacha::<U10>(
            GenericArray::from_slice(session_key.as_bytes()),
            GenericArray::from_slice(&header[..16]),
        );

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&subkey);
        subkey.as_mut_slice().zeroize();
        let mut inonce = [0u8; INONCE_LEN];
        inonce.copy_from_slice(&header[16..]);

        Self {
            key,
            counter: 1,
            inonce,
        }
    }

    fn nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.counter.to_le_bytes());
        nonce[4..].copy_from_slice(&self.inonce);
        nonce
    }

    /// A keystream positioned at block 0 for the current frame.
    fn cipher(&self) -> ChaCha20 {
        let nonce = self.nonce();
        ChaCha20::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&nonce),
        )
    }

    /// Consumes keystream blocks 0 and 1: returns the one-time authenticator
    /// keyed by block 0, the tag block as it is authenticated, and the
    /// decrypted tag byte.  `cipher` is left at block 2.
    fn begin_frame(
        cipher: &mut ChaCha20,
        sealed_tag: u8,
        opening: bool,
    ) -> (Poly1305, [u8; BLOCK_LEN], u8) {
        let mut block = [0u8; BLOCK_LEN];
        cipher.apply_keystream(&mut block);
        let mac = Poly1305::new(GenericArray::from_slice(&block[..KEY_LEN]));
        block.zeroize();

        block[0] = sealed_tag;
        cipher.apply_keystream(&mut block);
        let transformed = block[0];
        if opening {
            // The authenticator covers the tag as it appeared on the wire.
            block[0] = sealed_tag;
        }

        (mac, block, transformed)
    }

    /// Computes the frame authenticator over the tag block and ciphertext.
    fn authenticate(mac: Poly1305, tag_block: &[u8; BLOCK_LEN], ciphertext: &[u8]) -> Tag {
        let mut input = Vec::with_capacity(BLOCK_LEN + ciphertext.len() + 2 * MAC_LEN);
        input.extend_from_slice(tag_block);
        input.extend_from_slice(ciphertext);
        // The pad is `N % 16` bytes, not pad-to-block, so the two length
        // words usually straddle a block boundary.
        input.resize(input.len() + ciphertext.len() % 16, 0);
        input.extend_from_slice(&0u64.to_le_bytes());
        input.extend_from_slice(&((BLOCK_LEN + ciphertext.len()) as u64).to_le_bytes());

        let tag = mac.compute_unpadded(&input);
        input.zeroize();
        tag
    }

    fn advance(&mut self, mac: &[u8], tag: u8) {
        for (n, m) in self.inonce.iter_mut().zip(mac) {
            *n ^= m;
        }
        self.counter = self.counter.wrapping_add(1);
        if tag & TAG_REKEY_BIT != 0 || self.counter == 0 {
            self.rekey();
        }
    }

    fn rekey(&mut self) {
        let mut material = [0u8; KEY_LEN + INONCE_LEN];
        material[..KEY_LEN].copy_from_slice(&self.key);
        material[KEY_LEN..].copy_from_slice(&self.inonce);

        self.cipher().apply_keystream(&mut material);

        self.key.copy_from_slice(&material[..KEY_LEN]);
        self.inonce.copy_from_slice(&material[KEY_LEN..]);
        self.counter = 1;
        material.zeroize();
    }
}

// ── Decrypt side ──────────────────────────────────────────────────────────────

/// One opened frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedFrame {
    pub plaintext: Vec<u8>,
    pub tag: StreamTag,
}

/// Receive-side stream context.
///
/// Every successful [`decrypt`](Self::decrypt) advances the context; frames
/// must be presented in arrival order.  A failed call leaves the context
/// unchanged, but the channel should be treated as broken regardless.
pub struct DecryptContext {
    state: StreamState,
}

impl DecryptContext {
    /// Initializes the context from the peer's header frame.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHeader`] unless `header` is exactly
    /// [`HEADER_LEN`] bytes.
    pub fn init(header: &[u8], key: &SessionKey) -> Result<Self, CryptoError> {
        let header: &[u8; HEADER_LEN] =
            header
                .try_into()
                .map_err(|_| CryptoError::InvalidHeader {
                    expected: HEADER_LEN,
                    actual: header.len(),
                })?;
        Ok(Self {
            state: StreamState::from_header(key, header),
        })
    }

    /// Authenticates and decrypts the next frame.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::MessageTooShort`] if the frame is under [`ABYTES`].
    /// - [`CryptoError::Authentication`] if the authenticator does not verify.
    /// - [`CryptoError::UnknownTag`] if the authenticated tag is undefined.
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<DecryptedFrame, CryptoError> {
        if frame.len() < ABYTES {
            return Err(CryptoError::MessageTooShort(frame.len()));
        }
        let message_len = frame.len() - ABYTES;
        let ciphertext = &frame[1..1 + message_len];
        let stored_mac = &frame[1 + message_len..];

        let mut cipher = self.state.cipher();
        let (mac, mut tag_block, tag_byte) =
            StreamState::begin_frame(&mut cipher, frame[0], true);
        let computed = StreamState::authenticate(mac, &tag_block, ciphertext);
        tag_block.zeroize();

        if !bool::from(computed.as_slice().ct_eq(stored_mac)) {
            return Err(CryptoError::Authentication);
        }
        let tag = StreamTag::try_from(tag_byte)?;

        let mut plaintext = ciphertext.to_vec();
        cipher.apply_keystream(&mut plaintext);

        self.state.advance(&computed, tag_byte);
        Ok(DecryptedFrame { plaintext, tag })
    }
}

impl std::fmt::Debug for DecryptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptContext")
            .field("counter", &self.state.counter)
            .finish_non_exhaustive()
    }
}

// ── Encrypt side ──────────────────────────────────────────────────────────────

/// Send-side stream context, used by input devices.  The relay only opens
/// streams.
pub struct EncryptContext {
    state: StreamState,
}

impl EncryptContext {
    /// Starts a new stream with a random header.
    ///
    /// Returns the context and the header frame to send before any data.
    pub fn new(key: &SessionKey) -> (Self, [u8; HEADER_LEN]) {
        let mut header = [0u8; HEADER_LEN];
        OsRng.fill_bytes(&mut header);
        (Self::with_header(key, header), header)
    }

    /// Starts a stream with a caller-chosen header.
    pub fn with_header(key: &SessionKey, header: [u8; HEADER_LEN]) -> Self {
        Self {
            state: StreamState::from_header(key, &header),
        }
    }

    /// Seals the next frame.
    pub fn encrypt(&mut self, message: &[u8], tag: StreamTag) -> Vec<u8> {
        let mut cipher = self.state.cipher();
        let (mac, mut tag_block, sealed_tag) =
            StreamState::begin_frame(&mut cipher, tag as u8, false);

        let mut frame = Vec::with_capacity(message.len() + ABYTES);
        frame.push(sealed_tag);
        let start = frame.len();
        frame.extend_from_slice(message);
        cipher.apply_keystream(&mut frame[start..]);

        let computed = StreamState::authenticate(mac, &tag_block, &frame[start..]);
        tag_block.zeroize();
        frame.extend_from_slice(&computed);

        self.state.advance(&computed, tag as u8);
        frame
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

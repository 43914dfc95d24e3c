//! X25519 key agreement.
//!
//! Both sides compute `h = BLAKE2b-512(q || client_pk || server_pk)` where
//! `q` is the X25519 shared point.  This is libsodium's `crypto_kx`: the
//! server transmits with `h[0..32]` and receives with `h[32..64]`, the client
//! receives with `h[0..32]` and transmits with `h[32..64]`, so the server's
//! `rx` equals the client's `tx`.
//!
//! The relay never encrypts anything outbound.  [`SessionKeys::tx`] is still
//! derived so both sides agree on the full key pair, but the server side only
//! ever hands `rx` to a [`crate::crypto::DecryptContext`].

use blake2::{Blake2b512, Digest};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{CryptoError, Fingerprint};

/// Length of an X25519 public key on the wire.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of each derived session key.
pub const SESSION_KEY_LEN: usize = 32;

// ── Session keys ──────────────────────────────────────────────────────────────

/// One 32-byte symmetric session key.  Wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Wraps raw key bytes, e.g. a key agreed out of band.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// The `{rx, tx}` pair derived for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    rx: SessionKey,
    tx: SessionKey,
}

impl SessionKeys {
    /// Key for frames arriving at this side.
    pub fn rx(&self) -> &SessionKey {
        &self.rx
    }

    /// Key for frames leaving this side.
    pub fn tx(&self) -> &SessionKey {
        &self.tx
    }

    /// Keeps only the receive key; the relay's channel is receive-only.
    pub fn into_receive_key(self) -> SessionKey {
        self.rx
    }
}

// ── Peer public key ───────────────────────────────────────────────────────────

/// The input device's ephemeral public key, received as the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPublicKey(PublicKey);

impl PeerPublicKey {
    /// Parses a raw key frame.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `bytes` is exactly
    /// [`PUBLIC_KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUBLIC_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PUBLIC_KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(PublicKey::from(raw)))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        self.0.as_bytes()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.as_bytes())
    }
}

// ── Server identity ───────────────────────────────────────────────────────────

/// The relay's long-lived key pair, generated once per process.
pub struct ServerIdentity {
    secret: StaticSecret,
    public: PublicKey,
}

impl ServerIdentity {
    /// Generates a fresh identity from the OS random number generator.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuilds an identity from raw secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key sent unencrypted as the first frame of every connection.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.public.as_bytes())
    }

    /// Derives this connection's session keys from the peer's public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::WeakPeerKey`] if the peer key yields an
    /// all-zero shared point.
    pub fn session_keys(&self, peer: &PeerPublicKey) -> Result<SessionKeys, CryptoError> {
        let mut h = derive(&self.secret, &peer.0, peer.as_bytes(), self.public.as_bytes())?;
        let keys = split(&h, Role::Server);
        h.zeroize();
        Ok(keys)
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("fingerprint", &self.fingerprint().to_string())
            .finish_non_exhaustive()
    }
}

// ── Client key pair ───────────────────────────────────────────────────────────

/// The input-device side of the key agreement.
///
/// The relay itself never uses this; it exists for native input devices and
/// for exercising the server path end to end.
pub struct ClientKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ClientKeypair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuilds a key pair from raw secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Derives the client's session keys from the server's public key frame.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] for a malformed key frame and
    /// [`CryptoError::WeakPeerKey`] for a low-order server key.
    pub fn session_keys(&self, server_public: &[u8]) -> Result<SessionKeys, CryptoError> {
        let server = PeerPublicKey::from_slice(server_public)?;
        let mut h = derive(
            &self.secret,
            &server.0,
            self.public.as_bytes(),
            server.as_bytes(),
        )?;
        let keys = split(&h, Role::Client);
        h.zeroize();
        Ok(keys)
    }
}

// ── Derivation ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Role {
    Server,
    Client,
}

fn derive(
    secret: &StaticSecret,
    their_public: &PublicKey,
    client_pk: &[u8; PUBLIC_KEY_LEN],
    server_pk: &[u8; PUBLIC_KEY_LEN],
) -> Result<[u8; 64], CryptoError> {
    let shared = secret.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakPeerKey);
    }

    let mut hasher = Blake2b512::new();
    hasher.update(shared.as_bytes());
    hasher.update(client_pk);
    hasher.update(server_pk);

    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

fn split(h: &[u8; 64], role: Role) -> SessionKeys {
    let mut first = [0u8; SESSION_KEY_LEN];
    let mut second = [0u8; SESSION_KEY_LEN];
    first.copy_from_slice(&h[..SESSION_KEY_LEN]);
    second.copy_from_slice(&h[SESSION_KEY_LEN..]);

    match role {
        Role::Server => SessionKeys {
            rx: SessionKey(second),
            tx: SessionKey(first),
        },
        Role::Client => SessionKeys {
            rx: SessionKey(first),
            tx: SessionKey(second),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

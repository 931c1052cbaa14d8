//! Value encoders behind the reverse lookup indexes.

use std::hash::Hasher;

use siphasher::sip128::{Hasher128, SipHasher13};

use crate::types::{ContextId, Result, SedimentError};

/// Length in bytes of an alias digest.
pub const DIGEST_LEN: usize = 16;

/// Maps an alias value to the fixed-width key of the alias lookup index.
///
/// Distinct values may collide; the alias index rejects the second one with
/// a uniqueness violation and resolution re-checks the stored value.
pub trait ValueDigest: Send + Sync {
    /// Digests `value` under `ctx`.
    fn digest(&self, ctx: ContextId, value: &str) -> [u8; DIGEST_LEN];
}

/// Keyed SipHash-1-3 with a 128-bit output.
#[derive(Clone)]
pub struct SipDigest {
    key: [u8; 16],
}

impl SipDigest {
    /// Creates a digest keyed with `key`.
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    /// Parses a 32-character hex key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|err| SedimentError::Config(format!("digest key: {err}")))?;
        let key: [u8; 16] = bytes
            .try_into()
            .map_err(|_| SedimentError::Config("digest key must be 16 bytes".into()))?;
        Ok(Self::new(key))
    }
}

impl Default for SipDigest {
    fn default() -> Self {
        Self::new([0; 16])
    }
}

impl ValueDigest for SipDigest {
    fn digest(&self, ctx: ContextId, value: &str) -> [u8; DIGEST_LEN] {
        let mut hasher = SipHasher13::new_with_key(&self.key);
        hasher.write(&ctx.0.to_be_bytes());
        hasher.write(value.as_bytes());
        let hash = hasher.finish128();
        let mut out = [0u8; DIGEST_LEN];
        out[..8].copy_from_slice(&hash.h1.to_le_bytes());
        out[8..].copy_from_slice(&hash.h2.to_le_bytes());
        out
    }
}

/// Phonetic codes for one input.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PhoneticCodes {
    /// Primary code. Empty when the input has nothing encodable.
    pub primary: String,
    /// Alternate pronunciation, if the encoder distinguishes one.
    pub alternate: Option<String>,
}

impl PhoneticCodes {
    /// Codes to index: the primary always, the alternate only when `loose`.
    /// Empty and repeated codes are dropped.
    pub fn indexed(&self, loose: bool) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if !self.primary.is_empty() {
            out.push(self.primary.clone());
        }
        if loose {
            if let Some(alt) = &self.alternate {
                if !alt.is_empty() && !out.contains(alt) {
                    out.push(alt.clone());
                }
            }
        }
        out
    }
}

/// Encodes a string into sound-alike codes.
pub trait PhoneticEncoder: Send + Sync {
    /// Encodes `value`.
    fn encode(&self, value: &str) -> PhoneticCodes;
}

/// Double Metaphone, backed by `rphonetic`.
///
/// The alternate code is reported only when it differs from the primary.
#[derive(Clone, Copy, Debug)]
pub struct DoubleMetaphone {
    inner: rphonetic::DoubleMetaphone,
}

impl DoubleMetaphone {
    /// Creates an encoder whose codes are cut to `max_len` characters;
    /// `None` keeps them whole.
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            inner: rphonetic::DoubleMetaphone::new(max_len),
        }
    }
}

impl Default for DoubleMetaphone {
    fn default() -> Self {
        Self {
            inner: rphonetic::DoubleMetaphone::default(),
        }
    }
}

impl PhoneticEncoder for DoubleMetaphone {
    fn encode(&self, value: &str) -> PhoneticCodes {
        let codes = self.inner.double_metaphone(value);
        let primary = codes.primary();
        let alternate = codes.alternate();
        PhoneticCodes {
            alternate: (alternate != primary).then_some(alternate),
            primary,
        }
    }
}

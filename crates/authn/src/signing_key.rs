//! Ed25519 signing keys.
//!
//! A [`SigningKey`] is immutable once created. Its `kid` encodes the creation
//! time in zero-padded unix milliseconds followed by a random suffix, so
//! sorting kids lexically sorts keys by age and two processes minting a key
//! in the same millisecond still end up with distinct ids.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ed25519_dalek::SECRET_KEY_LENGTH;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::{AuthError, Result},
    validation::validate_kid,
};

/// PKCS#8 v1 header for a raw Ed25519 private key.
const PKCS8_ED25519_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes (the seed)
];

/// An Ed25519 key pair with its identifier.
///
/// The private seed is zeroized on drop and never appears in `Debug` output.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    created_at: DateTime<Utc>,
    seed: Zeroizing<[u8; SECRET_KEY_LENGTH]>,
    public_key: [u8; 32],
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .field("public_key", &URL_SAFE_NO_PAD.encode(self.public_key))
            .finish_non_exhaustive()
    }
}

impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.kid == other.kid && self.public_key == other.public_key
    }
}

impl Eq for SigningKey {}

/// Persisted form of a key. The seed is base64url without padding.
#[derive(Deserialize)]
struct StoredKey {
    kid: String,
    created_at: DateTime<Utc>,
    seed: String,
}

#[derive(Serialize)]
struct StoredKeyRef<'a> {
    kid: &'a str,
    created_at: DateTime<Utc>,
    seed: &'a str,
}

impl SigningKey {
    /// Generates a fresh key created now.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyMaterial`] if the generated key cannot
    /// be loaded by the JWT backend.
    pub fn generate() -> Result<Self> {
        Self::generate_at(Utc::now())
    }

    /// Generates a fresh key stamped with `created_at`.
    ///
    /// # Errors
    ///
    /// See [`generate`](Self::generate).
    pub fn generate_at(created_at: DateTime<Utc>) -> Result<Self> {
        let mut suffix = [0u8; 4];
        OsRng.fill_bytes(&mut suffix);
        let kid = format!("{:013}-{}", created_at.timestamp_millis().max(0), hex::encode(suffix));

        let dalek = ed25519_dalek::SigningKey::generate(&mut OsRng);
        Self::from_parts(kid, created_at, Zeroizing::new(dalek.to_bytes()))
    }

    /// Builds the operator-supplied static key from its 32-byte seed.
    ///
    /// The key is stamped with the unix epoch and its kid is derived from the
    /// public key, so every instance given the same seed agrees on the kid.
    ///
    /// # Errors
    ///
    /// See [`generate`](Self::generate).
    pub fn from_seed(seed: Zeroizing<[u8; SECRET_KEY_LENGTH]>) -> Result<Self> {
        let public_key = ed25519_dalek::SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        let kid = format!("{:013}-{}", 0, hex::encode(&public_key[..4]));
        Self::from_parts(kid, DateTime::<Utc>::UNIX_EPOCH, seed)
    }

    /// Decodes a base64url (unpadded) seed and builds the static key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyMaterial`] if `encoded` is not 32 bytes
    /// of base64url.
    pub fn from_encoded_seed(encoded: &str) -> Result<Self> {
        Self::from_seed(decode_seed(encoded.trim())?)
    }

    fn from_parts(
        kid: String,
        created_at: DateTime<Utc>,
        seed: Zeroizing<[u8; SECRET_KEY_LENGTH]>,
    ) -> Result<Self> {
        let public_key = ed25519_dalek::SigningKey::from_bytes(&seed).verifying_key().to_bytes();

        let mut der = Zeroizing::new(Vec::with_capacity(PKCS8_ED25519_PREFIX.len() + seed.len()));
        der.extend_from_slice(&PKCS8_ED25519_PREFIX);
        der.extend_from_slice(&*seed);
        let encoding = EncodingKey::from_ed_der(&der);

        let decoding = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(public_key))
            .map_err(|e| AuthError::invalid_key_material(format!("public key: {e}")))?;

        Ok(Self { kid, created_at, seed, public_key, encoding, decoding })
    }

    /// Key identifier carried in the JWT `kid` header.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Raw 32-byte public key.
    #[must_use]
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Public half as a JSON Web Key.
    #[must_use]
    pub fn public_jwk(&self) -> Jwk {
        Jwk {
            kty: "OKP".to_owned(),
            crv: "Ed25519".to_owned(),
            x: URL_SAFE_NO_PAD.encode(self.public_key),
            kid: self.kid.clone(),
            key_use: "sig".to_owned(),
            alg: "EdDSA".to_owned(),
        }
    }

    /// Serializes the key, private seed included, for the blob store.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyMaterial`] if serialization fails.
    pub fn to_blob(&self) -> Result<Bytes> {
        let seed = Zeroizing::new(URL_SAFE_NO_PAD.encode(*self.seed));
        let stored = StoredKeyRef { kid: &self.kid, created_at: self.created_at, seed: &seed };
        serde_json::to_vec(&stored)
            .map(Bytes::from)
            .map_err(|e| AuthError::invalid_key_material(format!("encode key: {e}")))
    }

    /// Parses a key written by [`to_blob`](Self::to_blob).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyMaterial`] for malformed JSON or seed,
    /// and [`AuthError::InvalidTokenFormat`] for a malformed kid.
    pub fn from_blob(raw: &[u8]) -> Result<Self> {
        let stored: StoredKey = serde_json::from_slice(raw)
            .map_err(|e| AuthError::invalid_key_material(format!("decode key: {e}")))?;
        let encoded = Zeroizing::new(stored.seed);
        validate_kid(&stored.kid)?;
        Self::from_parts(stored.kid, stored.created_at, decode_seed(&encoded)?)
    }
}

fn decode_seed(encoded: &str) -> Result<Zeroizing<[u8; SECRET_KEY_LENGTH]>> {
    let bytes = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| AuthError::invalid_key_material(format!("seed is not base64url: {e}")))?,
    );
    let mut seed = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
    if bytes.len() != SECRET_KEY_LENGTH {
        return Err(AuthError::invalid_key_material(format!(
            "seed must be {SECRET_KEY_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }
    seed.copy_from_slice(&bytes);
    Ok(seed)
}

/// A public Ed25519 key in JWK form (RFC 8037).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `"OKP"`.
    pub kty: String,
    /// Curve, always `"Ed25519"`.
    pub crv: String,
    /// Public key, base64url without padding.
    pub x: String,
    /// Key identifier.
    pub kid: String,
    /// Intended use, always `"sig"`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Algorithm, always `"EdDSA"`.
    pub alg: String,
}

/// A JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Keys, newest first.
    pub keys: Vec<Jwk>,
}

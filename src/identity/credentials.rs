use argon2::{Algorithm, Argon2, Params, Version};
use parking_lot::RwLock;
use password_hash::PasswordHash;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

const SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
    #[error("digest error: {0}")]
    Digest(String),
}

#[derive(Clone)]
struct Credential {
    algorithm: Algorithm,
    version: Version,
    params: Params,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl Credential {
    fn derive(&self, secret: &str) -> Result<Vec<u8>, CredentialError> {
        let argon2 = Argon2::new(self.algorithm, self.version, self.params.clone());
        let mut out = vec![0u8; self.digest.len()];
        argon2
            .hash_password_into(secret.as_bytes(), &self.salt, &mut out)
            .map_err(|e| CredentialError::Digest(e.to_string()))?;
        Ok(out)
    }
}

/// Holds one salted Argon2 digest of the gateway secret.
///
/// An unseeded verifier rejects everything. Rotation replaces salt and digest together;
/// there is no history and no rollback.
pub struct CredentialVerifier {
    params: Params,
    current: RwLock<Option<Credential>>,
}

impl CredentialVerifier {
    pub fn unseeded() -> Self { Self::with_params(Params::default()) }

    /// Cost parameters used for every subsequent `rotate`.
    pub fn with_params(params: Params) -> Self {
        Self { params, current: RwLock::new(None) }
    }

    pub fn seeded(secret: &str) -> Result<Self, CredentialError> {
        let v = Self::unseeded();
        v.rotate(secret)?;
        Ok(v)
    }

    /// Seed from a raw salt and an Argon2id (v0x13) digest computed with `params`.
    pub fn from_digest(params: Params, salt: &[u8], digest: &[u8]) -> Self {
        let v = Self::with_params(params.clone());
        *v.current.write() = Some(Credential {
            algorithm: Algorithm::Argon2id,
            version: Version::V0x13,
            params,
            salt: salt.to_vec(),
            digest: digest.to_vec(),
        });
        v
    }

    /// Seed from an Argon2 PHC string, e.g. one produced by `argon2`'s `PasswordHasher`.
    pub fn from_phc(phc: &str) -> Result<Self, CredentialError> {
        let parsed = PasswordHash::new(phc).map_err(|e| CredentialError::Digest(e.to_string()))?;
        let algorithm = Algorithm::try_from(parsed.algorithm).map_err(|e| CredentialError::Digest(e.to_string()))?;
        let version = match parsed.version {
            Some(v) => Version::try_from(v).map_err(|e| CredentialError::Digest(e.to_string()))?,
            None => Version::V0x13,
        };
        let params = Params::try_from(&parsed).map_err(|e| CredentialError::Digest(e.to_string()))?;
        let salt = parsed.salt.ok_or_else(|| CredentialError::Digest("missing salt".into()))?;
        let mut salt_buf = [0u8; 64];
        let salt = salt
            .decode_b64(&mut salt_buf)
            .map_err(|e| CredentialError::Digest(e.to_string()))?
            .to_vec();
        let digest = parsed.hash.ok_or_else(|| CredentialError::Digest("missing hash".into()))?.as_bytes().to_vec();
        let v = Self::with_params(params.clone());
        *v.current.write() = Some(Credential { algorithm, version, params, salt, digest });
        Ok(v)
    }

    pub fn is_seeded(&self) -> bool { self.current.read().is_some() }

    /// Constant-time comparison of the candidate's digest against the stored one.
    pub fn verify(&self, candidate: &str) -> bool {
        let Some(cred) = self.current.read().clone() else {
            warn!(target: "auth", "credential check against unseeded verifier");
            return false;
        };
        match cred.derive(candidate) {
            Ok(computed) => bool::from(computed.as_slice().ct_eq(cred.digest.as_slice())),
            Err(e) => {
                warn!(target: "auth", "credential digest failed: {}", e);
                false
            }
        }
    }

    /// Fresh random salt, fresh digest. The previous secret stops verifying immediately.
    pub fn rotate(&self, new_secret: &str) -> Result<(), CredentialError> {
        let mut salt = vec![0u8; SALT_LEN];
        getrandom::getrandom(&mut salt).map_err(|e| CredentialError::Entropy(e.to_string()))?;
        let digest_len = self.params.output_len().unwrap_or(Params::DEFAULT_OUTPUT_LEN);
        let mut cred = Credential {
            algorithm: Algorithm::Argon2id,
            version: Version::V0x13,
            params: self.params.clone(),
            salt,
            digest: vec![0u8; digest_len],
        };
        cred.digest = cred.derive(new_secret)?;
        *self.current.write() = Some(cred);
        debug!(target: "auth", "credential rotated");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn cheap_params() -> Params {
    Params::new(8, 1, 1, None).expect("valid argon2 params")
}

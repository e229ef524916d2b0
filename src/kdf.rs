//! Password-based key derivation with parameter validation.
//!
//! Keys are derived deterministically from `(password, salt)` so that a key can be
//! re-derived later from the salt stored in the metadata store. The default is
//! PBKDF2-HMAC-SHA256; Argon2id is available for callers that want a memory-hard
//! function.
//!
//! # Security Guidelines
//!
//! - Passwords travel as `SecretString` and are only exposed at the primitive call
//! - Derived keys live in `Zeroizing` buffers and are wiped on drop
//! - Salts must be fresh per protected file; use [`generate_salt`]

use argon2::{Algorithm, Argon2, Params, Version};
use getrandom::fill as getrandom;
use hmac::Hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::types::{DerivedKey, GuardError, KEY_LEN, KdfAlg, KdfParams, Result, Salt};

/// Minimum PBKDF2 iteration count accepted.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Upper bound on PBKDF2 iterations. Artifact headers carry the count before
/// they are authenticated.
pub const MAX_PBKDF2_ITERATIONS: u32 = 20_000_000;

/// Minimum memory cost for Argon2id (64 MiB).
const MIN_MEMORY_COST_KIB: u32 = 65536;

/// Maximum memory cost for Argon2id (4 GiB).
const MAX_MEMORY_COST_KIB: u32 = 4 * 1024 * 1024;

/// Minimum time cost for Argon2id.
const MIN_TIME_COST: u32 = 3;

const MAX_TIME_COST: u32 = 64;

/// Maximum parallelism value (u24 max as supported by Argon2).
const MAX_PARALLELISM: u32 = 16_777_215;

/// Minimum salt length for security (8 bytes).
pub const MIN_SALT_LENGTH: usize = 8;

/// Generate a fresh salt of `len` bytes from the OS CSPRNG.
pub fn generate_salt(len: usize) -> Result<Salt> {
    if len < MIN_SALT_LENGTH {
        return Err(GuardError::Invalid("kdf: salt must be at least 8 bytes"));
    }
    let mut salt = vec![0u8; len];
    getrandom(&mut salt)?;
    Ok(Salt::from_bytes(salt))
}

/// Check `params` against the minima without deriving anything.
pub fn validate_params(params: &KdfParams) -> Result<()> {
    if params.salt_len < MIN_SALT_LENGTH {
        return Err(GuardError::Invalid("kdf: salt must be at least 8 bytes"));
    }
    match params.alg {
        KdfAlg::Pbkdf2Sha256 => {
            if params.iterations < MIN_PBKDF2_ITERATIONS {
                return Err(GuardError::Invalid(
                    "kdf: PBKDF2 iterations must be at least 100000",
                ));
            }
            if params.iterations > MAX_PBKDF2_ITERATIONS {
                return Err(GuardError::Invalid(
                    "kdf: PBKDF2 iterations must be at most 20000000",
                ));
            }
        }
        KdfAlg::Argon2id => {
            if params.argon2_mem_kib < MIN_MEMORY_COST_KIB {
                return Err(GuardError::Invalid(
                    "kdf: memory cost must be at least 64 MiB",
                ));
            }
            if params.argon2_mem_kib > MAX_MEMORY_COST_KIB {
                return Err(GuardError::Invalid("kdf: memory cost must be at most 4 GiB"));
            }
            if params.argon2_t_cost < MIN_TIME_COST {
                return Err(GuardError::Invalid("kdf: time cost must be at least 3"));
            }
            if params.argon2_t_cost > MAX_TIME_COST {
                return Err(GuardError::Invalid("kdf: time cost must be at most 64"));
            }
            if params.argon2_parallelism == 0 || params.argon2_parallelism > MAX_PARALLELISM {
                return Err(GuardError::Invalid(
                    "kdf: parallelism must be between 1 and 16777215",
                ));
            }
        }
    }
    Ok(())
}

/// Derive a 32-byte key from `password` and `salt`.
///
/// Same inputs always produce the same key. Different salts produce independent
/// keys for the same password.
///
/// # Errors
///
/// Returns `GuardError::Invalid` for weak parameters or a short salt, and
/// `GuardError::KeyDerivation` if the primitive itself fails. A failed derivation
/// never yields a key.
pub fn derive_key(password: &SecretString, salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    validate_params(params)?;
    if salt.len() < MIN_SALT_LENGTH {
        return Err(GuardError::Invalid("kdf: salt must be at least 8 bytes"));
    }

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    let pw = password.expose_secret().as_bytes();

    match params.alg {
        KdfAlg::Pbkdf2Sha256 => {
            pbkdf2::pbkdf2::<Hmac<Sha256>>(pw, salt.as_bytes(), params.iterations, &mut out[..])
                .map_err(|_| GuardError::KeyDerivation)?;
        }
        KdfAlg::Argon2id => {
            let argon_params = Params::new(
                params.argon2_mem_kib,
                params.argon2_t_cost,
                params.argon2_parallelism,
                Some(KEY_LEN),
            )
            .map_err(|_| GuardError::Invalid("kdf: invalid Argon2 params"))?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
                .hash_password_into(pw, salt.as_bytes(), &mut out[..])
                .map_err(|_| GuardError::KeyDerivation)?;
        }
    }

    Ok(DerivedKey::from_bytes(*out))
}

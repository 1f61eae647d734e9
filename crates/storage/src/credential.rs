//! Password hashing with Argon2id.
//!
//! Work factors are picked once per process, either by [`HashParams::calibrate`]
//! against a wall-clock target or by [`HashParams::weak`] for tests, and then
//! handed to a [`CredentialHasher`]. Stored hashes are PHC strings that carry
//! their own parameters, so verification keeps working after re-calibration.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use rolodex_core::{Error, Result, User};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const SALT_LEN: usize = 16;
pub const OUTPUT_LEN: usize = 32;

/// Memory ceiling for calibration, in KiB.
const MAX_M_COST: u32 = 64 * 1024;
const MAX_T_COST: u32 = 16;

const CALIBRATION_PASSWORD: &str = "calibration-password";

/// Hashed once per hasher and checked against when a login names no user.
const UNKNOWN_USER_PASSWORD: &str = "no-such-user";

/// Argon2 work factors: memory in KiB, passes, lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HashParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

impl HashParams {
    /// Fast, deliberately weak parameters. Never use outside of tests.
    pub const fn weak() -> Self {
        Self {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }

    /// Tune parameters so that one hash takes roughly `target` on this host.
    pub fn calibrate(target: Duration) -> Result<Self> {
        Self::calibrate_from(Self::default(), target)
    }

    /// Calibrate starting at `start`. Memory is doubled first (up to 64 MiB),
    /// then passes are raised to close the remaining gap.
    pub fn calibrate_from(start: HashParams, target: Duration) -> Result<Self> {
        let mut params = start;
        let mut elapsed = params.measure()?;
        debug!(m_cost = params.m_cost, t_cost = params.t_cost, elapsed_ms = elapsed.as_millis() as u64, "Hash calibration step");

        while elapsed < target && params.m_cost.saturating_mul(2) <= MAX_M_COST {
            params.m_cost *= 2;
            elapsed = params.measure()?;
            debug!(m_cost = params.m_cost, t_cost = params.t_cost, elapsed_ms = elapsed.as_millis() as u64, "Hash calibration step");
        }

        if elapsed < target && params.t_cost < MAX_T_COST {
            let per_pass = elapsed.as_secs_f64() / params.t_cost as f64;
            let wanted = if per_pass > 0.0 {
                (target.as_secs_f64() / per_pass).ceil() as u32
            } else {
                MAX_T_COST
            };
            params.t_cost = wanted.clamp(params.t_cost, MAX_T_COST);
            elapsed = params.measure()?;
        }

        info!(
            m_cost = params.m_cost,
            t_cost = params.t_cost,
            p_cost = params.p_cost,
            elapsed_ms = elapsed.as_millis() as u64,
            "Calibrated password hash parameters"
        );
        Ok(params)
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(OUTPUT_LEN))
            .map_err(|e| Error::Config(format!("Invalid hash parameters: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn measure(&self) -> Result<Duration> {
        let hasher = CredentialHasher::new(*self)?;
        let start = Instant::now();
        hasher.hash(CALIBRATION_PASSWORD)?;
        Ok(start.elapsed())
    }
}

/// Hashes and verifies passwords with fixed work factors.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: HashParams,
    unknown_user_hash: OnceLock<Option<String>>,
}

impl CredentialHasher {
    pub fn new(params: HashParams) -> Result<Self> {
        params.argon2()?;
        Ok(Self {
            params,
            unknown_user_hash: OnceLock::new(),
        })
    }

    /// Hasher with [`HashParams::weak`].
    pub fn weak() -> Self {
        Self {
            params: HashParams::weak(),
            unknown_user_hash: OnceLock::new(),
        }
    }

    pub fn params(&self) -> HashParams {
        self.params
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| Error::Randomness(format!("Failed to generate salt: {}", e)))?;
        let salt = SaltString::encode_b64(&salt)
            .map_err(|e| Error::Config(format!("Failed to encode salt: {}", e)))?;

        let hash = self
            .params
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Config(format!("Password hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Constant-time check of `password` against a stored PHC string.
    /// Malformed hashes simply don't match.
    pub fn verify(hash: &str, password: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "Malformed password hash");
                return false;
            }
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Spend the same work as a real [`verify`](Self::verify) for a login
    /// that has no user, so response time does not reveal which logins exist.
    /// Always `false`.
    pub fn verify_unknown(&self, password: &str) -> bool {
        let hash = self.unknown_user_hash.get_or_init(|| match self.hash(UNKNOWN_USER_PASSWORD) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(error = %e, "Failed to prepare hash for unknown logins");
                None
            }
        });
        if let Some(hash) = hash {
            let _ = Self::verify(hash, password);
        }
        false
    }

    /// Hash a pending plaintext password into `password_hash` and drop the plaintext.
    pub fn apply_pending_password(&self, user: &mut User) -> Result<()> {
        if let Some(password) = user.pending_password() {
            user.password_hash = self.hash(password)?;
        }
        user.password = None;
        Ok(())
    }
}

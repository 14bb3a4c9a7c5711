//! CLI token and access-proxy session cache
//!
//! The CLI token correlates this command-line session with a browser
//! authentication event; the access-proxy session is the cookie value the
//! proxy hands back once the browser side completes. Both are bearer
//! secrets and are cached in a single owner-only JSON file so that the
//! next invocation (SSH spawns us once per connection) can reuse them.
//!
//! # Security Model
//!
//! - Tokens are drawn from the operating system CSPRNG
//! - Each byte is mapped onto a 62-symbol alphanumeric charset by rejection
//!   sampling, so every symbol is equally likely
//! - The cache file has mode 0600 on Unix and is replaced atomically
//! - `Debug` output never includes token values

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::secure_file::atomic_write_private;

/// Alphanumeric charset for generated CLI tokens
pub const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Bytes at or above this value are rejected (largest multiple of 62 below 256)
const ACCEPT_LIMIT: u8 = (256 / TOKEN_CHARSET.len() * TOKEN_CHARSET.len()) as u8;

/// Random bytes drawn per refill
const RANDOM_CHUNK: usize = 64;

/// Generate a new random CLI token of `len` alphanumeric characters
pub fn generate_cli_token(len: usize) -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut token = String::with_capacity(len);
    let mut bytes = [0u8; RANDOM_CHUNK];

    while token.len() < len {
        OsRng.fill_bytes(&mut bytes);
        for &b in bytes.iter().filter(|&&b| b < ACCEPT_LIMIT) {
            token.push(TOKEN_CHARSET[b as usize % TOKEN_CHARSET.len()] as char);
            if token.len() == len {
                break;
            }
        }
    }

    token
}

/// Locally generated CLI token with its expiry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CliToken {
    /// Mint a fresh token valid for `lifetime` from `now`
    pub fn generate(len: usize, lifetime: Duration, now: DateTime<Utc>) -> Self {
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            value: generate_cli_token(len),
            expires_at,
        }
    }

    /// Whether the token is still usable at `now`, keeping `margin` in reserve
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        chrono::Duration::from_std(margin)
            .ok()
            .and_then(|margin| now.checked_add_signed(margin))
            .map(|deadline| deadline < self.expires_at)
            .unwrap_or(false)
    }
}

impl fmt::Debug for CliToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The two cached tokens
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub cli_token: Option<CliToken>,
    #[serde(default)]
    pub ap_session: Option<String>,
}

impl TokenPair {
    /// True when neither token is present
    pub fn is_empty(&self) -> bool {
        self.cli_token.is_none() && self.ap_session.is_none()
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("cli_token", &self.cli_token)
            .field("ap_session", &self.ap_session.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// On-disk token cache bound to a single file
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    pair: TokenPair,
}

impl TokenStore {
    /// Create an empty store for `path` without touching the disk
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pair: TokenPair::default(),
        }
    }

    /// Read the token pair from `path`
    ///
    /// Returns the empty pair if the file doesn't exist.
    pub fn try_load(path: &Path) -> Result<TokenPair, CacheError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TokenPair::default()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| CacheError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the store, starting fresh if the cache is missing or unreadable
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let pair = match Self::try_load(&path) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Ignoring token cache: {}", e);
                TokenPair::default()
            }
        };
        Self { path, pair }
    }

    /// Persist the current pair atomically with owner-only permissions
    pub fn save(&self) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(&self.pair).map_err(CacheError::Serialize)?;
        atomic_write_private(&self.path, json.as_bytes()).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::trace!("Saved token cache to {:?}", self.path);
        Ok(())
    }

    /// Current token pair
    pub fn pair(&self) -> &TokenPair {
        &self.pair
    }

    /// Cached CLI token, if any
    pub fn cli_token(&self) -> Option<&CliToken> {
        self.pair.cli_token.as_ref()
    }

    /// Cached access-proxy session, if any
    pub fn ap_session(&self) -> Option<&str> {
        self.pair.ap_session.as_deref()
    }

    /// Return a usable CLI token, minting and persisting a new one if needed
    ///
    /// The cached token is reused while it stays valid for at least
    /// `margin` beyond `now`.
    pub fn ensure_cli_token(
        &mut self,
        len: usize,
        lifetime: Duration,
        margin: Duration,
        now: DateTime<Utc>,
    ) -> Result<CliToken, CacheError> {
        if let Some(token) = self.pair.cli_token.as_ref() {
            if token.is_usable_at(now, margin) && token.value.len() == len {
                return Ok(token.clone());
            }
            tracing::debug!("Cached CLI token expires at {}, renewing", token.expires_at);
        }

        let token = CliToken::generate(len, lifetime, now);
        self.pair.cli_token = Some(token.clone());
        self.save()?;
        tracing::debug!("Minted new CLI token expiring at {}", token.expires_at);
        Ok(token)
    }

    /// Record a new access-proxy session and persist it
    pub fn set_ap_session(&mut self, session: String) -> Result<(), CacheError> {
        self.pair.ap_session = Some(session);
        self.save()
    }
}

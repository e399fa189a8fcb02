//! Admin authentication.
//!
//! Two independent gates protect the back-office:
//! - stateless bearer tokens for the JSON admin API, signed with HMAC-SHA256
//!   over a base64url payload (`<payload>.<signature>`), so logins survive
//!   restarts without a session table;
//! - HTTP Basic credentials for the server-rendered admin page, checked
//!   against the bcrypt hash in `admin_auth.json`.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bcrypt::{hash, verify};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

use crate::models::{AdminSession, TokenClaims};
use crate::validation::clean_str;

type HmacSha256 = Hmac<Sha256>;

pub const SECRET_FILE: &str = "admin_secret.txt";
pub const CREDENTIAL_FILE: &str = "admin_auth.json";
pub const HASH_COST: u32 = 10;
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(8 * 60 * 60);

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, HASH_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Why a bearer token was refused. All variants reject; they only differ in
/// the message shown to the admin UI.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("Auth required")]
    Missing,

    #[error("Invalid session")]
    Invalid,

    #[error("Session expired")]
    Expired,
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CredentialError + '_ {
    move |source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// --- Token secret ---

/// Resolves the signing secret: the configured value wins, then the secret
/// file in `data_dir`, else a fresh random secret that is written there.
pub async fn load_or_create_secret(
    configured: Option<&str>,
    data_dir: &Path,
) -> Result<String, CredentialError> {
    let configured = clean_str(configured, 200);
    if !configured.is_empty() {
        return Ok(configured);
    }

    let path = data_dir.join(SECRET_FILE);
    match fs::read_to_string(&path).await {
        Ok(raw) => {
            let secret = clean_str(Some(&raw), 500);
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(&path)(e)),
    }

    let bytes: [u8; 32] = rand::thread_rng().gen();
    let secret: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    fs::write(&path, &secret).await.map_err(io_error(&path))?;
    tracing::info!(path = %path.display(), "generated new token secret");
    Ok(secret)
}

// --- Bearer tokens ---

#[derive(Serialize, Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Expiry, epoch milliseconds.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

/// Issues and verifies admin tokens. Holds no per-session state.
#[derive(Clone)]
pub struct TokenAuthority {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self, payload_b64: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload_b64.as_bytes());
        mac
    }

    pub fn issue(&self, user: &str) -> IssuedToken {
        self.issue_at(user, now_millis())
    }

    pub fn issue_at(&self, user: &str, now_ms: i64) -> IssuedToken {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_ms.saturating_add(ttl_ms);
        let claims = TokenClaims {
            u: user.to_owned(),
            exp: Some(expires_at),
        };
        // Serializing a String and an integer cannot fail.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload_b64).finalize().into_bytes());

        IssuedToken {
            token: format!("{payload_b64}.{signature}"),
            expires_at,
        }
    }

    /// Verifies `token` and returns the username embedded in it.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, now_millis())
    }

    pub fn verify_at(&self, token: &str, now_ms: i64) -> Result<String, TokenError> {
        let (payload_b64, signature_b64) = token.split_once('.').ok_or(TokenError::Invalid)?;
        if signature_b64.contains('.') {
            return Err(TokenError::Invalid);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Invalid)?;
        // verify_slice compares in constant time.
        self.mac(payload_b64)
            .verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Invalid)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Invalid)?;

        match claims.exp {
            Some(exp) if exp > 0 && now_ms < exp => Ok(clean_str(Some(&claims.u), 80)),
            _ => Err(TokenError::Expired),
        }
    }

    /// Full check of an `Authorization` header value.
    pub fn authenticate(&self, header: Option<&str>) -> Result<AdminSession, TokenError> {
        let token = bearer_token(header)?;
        let user = self.verify(token)?;
        Ok(AdminSession { user })
    }
}

/// Extracts `<token>` from `Bearer <token>`.
pub fn bearer_token(header: Option<&str>) -> Result<&str, TokenError> {
    let mut parts = header.unwrap_or_default().split(' ');
    match (parts.next(), parts.next()) {
        (Some("Bearer"), Some(token)) if !token.is_empty() => Ok(token),
        _ => Err(TokenError::Missing),
    }
}

/// Decodes `Basic <base64(user:pass)>`.
pub fn basic_credentials(header: Option<&str>) -> Option<(String, String)> {
    let mut parts = header?.split(' ');
    let (Some("Basic"), Some(encoded)) = (parts.next(), parts.next()) else {
        return None;
    };
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8_lossy(&decoded);
    let (user, pass) = decoded.split_once(':').unwrap_or(("", ""));
    Some((user.to_owned(), pass.to_owned()))
}

// --- Admin credential ---

/// On-disk shape. `password` only appears in the legacy plaintext format.
#[derive(Serialize, Deserialize, Debug, Default)]
struct StoredCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, rename = "passHash", skip_serializing_if = "Option::is_none")]
    pass_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

/// The single admin account.
#[derive(Debug, Clone)]
pub struct AdminCredential {
    pub username: String,
    pass_hash: String,
}

impl AdminCredential {
    /// Reads `admin_auth.json`, migrating a plaintext password to a hash in
    /// place. A missing or unusable file is replaced by a credential built
    /// from the bootstrap defaults.
    pub async fn load_or_bootstrap(
        data_dir: &Path,
        default_user: &str,
        default_pass: &str,
    ) -> Result<Self, CredentialError> {
        let path = data_dir.join(CREDENTIAL_FILE);

        if let Some(mut stored) = read_stored(&path).await {
            if stored.pass_hash.is_none() {
                if let Some(password) = stored.password.take() {
                    tracing::warn!(path = %path.display(), "migrating plaintext admin password to bcrypt");
                    stored.pass_hash = Some(hash_password(&password)?);
                    write_stored(&path, &stored).await?;
                }
            }
            if let (Some(username), Some(pass_hash)) = (stored.username, stored.pass_hash) {
                if !username.is_empty() && !pass_hash.is_empty() {
                    return Ok(Self { username, pass_hash });
                }
            }
        }

        tracing::info!(path = %path.display(), user = default_user, "bootstrapping admin credential");
        Self::store(data_dir, default_user, default_pass).await
    }

    /// Hashes `password` and overwrites the credential file.
    pub async fn store(data_dir: &Path, username: &str, password: &str) -> Result<Self, CredentialError> {
        let path = data_dir.join(CREDENTIAL_FILE);
        let credential = Self {
            username: username.to_owned(),
            pass_hash: hash_password(password)?,
        };
        let stored = StoredCredential {
            username: Some(credential.username.clone()),
            pass_hash: Some(credential.pass_hash.clone()),
            password: None,
        };
        write_stored(&path, &stored).await?;
        Ok(credential)
    }

    /// Blocking bcrypt comparison; call through [`AdminCredential::check`]
    /// from async code.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        username == self.username && verify_password(password, &self.pass_hash).unwrap_or(false)
    }

    pub async fn check(&self, username: String, password: String) -> bool {
        let credential = self.clone();
        tokio::task::spawn_blocking(move || credential.matches(&username, &password))
            .await
            .unwrap_or(false)
    }
}

async fn read_stored(path: &Path) -> Option<StoredCredential> {
    let raw = fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(stored) => Some(stored),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable admin credential");
            None
        }
    }
}

async fn write_stored(path: &Path, stored: &StoredCredential) -> Result<(), CredentialError> {
    let json = serde_json::to_string_pretty(stored)?;
    fs::write(path, json).await.map_err(io_error(path))
}

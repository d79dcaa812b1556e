//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::constants::{
    DEFAULT_DATA_DIR, DEFAULT_FILES_DIR_NAME, DEFAULT_MAX_UPLOAD_BYTES,
    DEFAULT_PASSWORD_ITERATIONS, DEFAULT_SESSION_TTL_HOURS, MIN_PASSWORD_LEN,
};
use crate::store::RemoteStoreConfig;
use crate::{HmsError, HmsResult};
use hms_types::EmailAddress;
use std::fmt;
use std::path::{Path, PathBuf};

/// Which document store backend to open.
#[derive(Clone, Debug)]
pub enum StoreBackend {
    Memory,
    File { root: PathBuf },
    Remote(RemoteStoreConfig),
}

/// Credentials for the first administrator, used only when no user exists yet.
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub email: EmailAddress,
    pub password: String,
}

impl fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    store_backend: StoreBackend,
    files_dir: PathBuf,
    session_ttl: chrono::Duration,
    password_iterations: u32,
    bootstrap_admin: Option<BootstrapAdmin>,
    max_upload_bytes: usize,
    cookie_secure: bool,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with default session, password and upload settings.
    pub fn new(store_backend: StoreBackend, files_dir: PathBuf) -> Self {
        Self {
            store_backend,
            files_dir,
            session_ttl: chrono::Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            password_iterations: DEFAULT_PASSWORD_ITERATIONS,
            bootstrap_admin: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            cookie_secure: false,
        }
    }

    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> HmsResult<Self> {
        if ttl <= chrono::Duration::zero() {
            return Err(HmsError::invalid("session TTL must be positive"));
        }
        self.session_ttl = ttl;
        Ok(self)
    }

    /// Tests lower this; production should keep the default.
    pub fn with_password_iterations(mut self, iterations: u32) -> HmsResult<Self> {
        if iterations == 0 {
            return Err(HmsError::invalid("password iterations must be positive"));
        }
        self.password_iterations = iterations;
        Ok(self)
    }

    pub fn with_bootstrap_admin(mut self, admin: BootstrapAdmin) -> HmsResult<Self> {
        if admin.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(HmsError::invalid(format!(
                "bootstrap admin password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        self.bootstrap_admin = Some(admin);
        Ok(self)
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    /// Resolve configuration from a key lookup, normally the process environment.
    ///
    /// Taking a lookup function keeps this testable without mutating the real environment.
    pub fn from_lookup<F>(lookup: F) -> HmsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = PathBuf::from(get("HMS_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let files_dir = get("HMS_FILES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DEFAULT_FILES_DIR_NAME));

        let store_backend = match get("HMS_STORE").as_deref().unwrap_or("file") {
            "memory" => StoreBackend::Memory,
            "file" => StoreBackend::File { root: data_dir },
            "remote" => {
                let required = |key: &str| {
                    get(key).ok_or_else(|| {
                        HmsError::invalid(format!("{key} is required when HMS_STORE=remote"))
                    })
                };
                StoreBackend::Remote(RemoteStoreConfig {
                    endpoint: required("HMS_STORE_ENDPOINT")?,
                    project: required("HMS_STORE_PROJECT")?,
                    api_key: required("HMS_STORE_API_KEY")?,
                })
            }
            other => {
                return Err(HmsError::invalid(format!(
                    "HMS_STORE must be memory, file or remote (got {other})"
                )))
            }
        };

        let mut cfg = Self::new(store_backend, files_dir);

        if let Some(hours) = get("HMS_SESSION_TTL_HOURS") {
            let hours: i64 = hours
                .parse()
                .map_err(|_| HmsError::invalid("HMS_SESSION_TTL_HOURS must be an integer"))?;
            cfg = cfg.with_session_ttl(chrono::Duration::hours(hours))?;
        }

        if let Some(bytes) = get("HMS_MAX_UPLOAD_BYTES") {
            let bytes = bytes
                .parse()
                .map_err(|_| HmsError::invalid("HMS_MAX_UPLOAD_BYTES must be an integer"))?;
            cfg = cfg.with_max_upload_bytes(bytes);
        }

        if let Some(secure) = get("HMS_COOKIE_SECURE") {
            cfg = cfg.with_cookie_secure(parse_bool(&secure)?);
        }

        match (
            get("HMS_BOOTSTRAP_ADMIN_EMAIL"),
            get("HMS_BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => {
                cfg = cfg.with_bootstrap_admin(BootstrapAdmin {
                    email: EmailAddress::parse(email)?,
                    password,
                })?;
            }
            (None, None) => {}
            _ => {
                return Err(HmsError::invalid(
                    "HMS_BOOTSTRAP_ADMIN_EMAIL and HMS_BOOTSTRAP_ADMIN_PASSWORD must be set together",
                ))
            }
        }

        Ok(cfg)
    }

    pub fn from_env() -> HmsResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn store_backend(&self) -> &StoreBackend {
        &self.store_backend
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        self.session_ttl
    }

    pub fn password_iterations(&self) -> u32 {
        self.password_iterations
    }

    pub fn bootstrap_admin(&self) -> Option<&BootstrapAdmin> {
        self.bootstrap_admin.as_ref()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

fn parse_bool(value: &str) -> HmsResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(HmsError::invalid(format!("not a boolean: {other}"))),
    }
}

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use crate::error::{AppError, Result};

const MIN_CALLBACK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_FILTER: &str = "info,wallet_bind=debug,reqwest=warn,hyper=warn";

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub wallet: WalletConfig,
    pub binding: BindingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub nonce_path: String,
    pub token_path: String,
    pub request_timeout: Duration,
}

/// The wallet must speak the plaintext callback contract: `public_key`,
/// `signature` and `errorCode` come back as readable query parameters.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub base_url: String,
    pub app_url: String,
    pub redirect_scheme: String,
    pub cluster: String,
    pub verify_signature: bool,
}

#[derive(Debug, Clone)]
pub struct BindingConfig {
    /// `None` leaves callback expiry to the server.
    pub callback_timeout: Option<Duration>,
    pub cold_start_grace: Duration,
    pub session_path: PathBuf,
    pub credentials_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(AppError::InvalidParams(format!(
                "LOG_FORMAT must be json or pretty, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub filter: String,
    pub format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);

        Ok(Self {
            backend: BackendConfig {
                base_url: vars.required("BACKEND_BASE_URL")?,
                nonce_path: vars.or_default("BACKEND_NONCE_PATH", "/api/auth/wallet/nonce"),
                token_path: vars.or_default("BACKEND_TOKEN_PATH", "/api/auth/wallet/token"),
                request_timeout: Duration::from_secs(vars.or_parse("BACKEND_TIMEOUT_SECS", 15)?),
            },
            wallet: WalletConfig {
                base_url: vars.required("WALLET_BASE_URL")?,
                app_url: vars.required("APP_URL")?,
                redirect_scheme: vars.required("APP_REDIRECT_SCHEME")?,
                cluster: vars.or_default("WALLET_CLUSTER", "mainnet-beta"),
                verify_signature: vars.or_parse("WALLET_VERIFY_SIGNATURE", true)?,
            },
            binding: BindingConfig {
                callback_timeout: vars
                    .optional_parse::<u64>("WALLET_CALLBACK_TIMEOUT_SECS")?
                    .map(Duration::from_secs),
                cold_start_grace: Duration::from_millis(vars.or_parse("COLD_START_GRACE_MS", 500)?),
                session_path: vars
                    .or_default("BINDING_SESSION_PATH", "binding_session.json")
                    .into(),
                credentials_path: vars.or_default("CREDENTIALS_PATH", "credentials.json").into(),
            },
            logging: LoggingConfig {
                filter: vars.or_default("LOG_FILTER", DEFAULT_LOG_FILTER),
                format: vars.or_parse("LOG_FORMAT", LogFormat::Json)?,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.backend.base_url)
            .map_err(|_| AppError::InvalidParams("BACKEND_BASE_URL must be a valid URL".into()))?;

        Url::parse(&self.wallet.base_url)
            .map_err(|_| AppError::InvalidParams("WALLET_BASE_URL must be a valid URL".into()))?;

        if self.wallet.redirect_scheme.is_empty()
            || !self
                .wallet
                .redirect_scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(AppError::InvalidParams(
                "APP_REDIRECT_SCHEME must be a non-empty URI scheme".into(),
            ));
        }

        if let Some(timeout) = self.binding.callback_timeout
            && timeout.as_secs() < MIN_CALLBACK_TIMEOUT_SECS
        {
            return Err(AppError::InvalidParams(format!(
                "WALLET_CALLBACK_TIMEOUT_SECS must be at least {MIN_CALLBACK_TIMEOUT_SECS}"
            )));
        }

        Ok(())
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn or_default(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn or_parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            Some(val) => val
                .parse()
                .map_err(|_| AppError::InvalidParams(format!("Invalid value for {key}"))),
            None => Ok(default),
        }
    }

    fn optional_parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(val) if !val.trim().is_empty() => val
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| AppError::InvalidParams(format!("Invalid value for {key}"))),
            _ => Ok(None),
        }
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .filter(|val| !val.trim().is_empty())
            .ok_or_else(|| AppError::InvalidParams(format!("{key} is required")))
    }
}

use std::fmt::Display;
use std::str::FromStr;

use crate::auth::jwt::JwtConfig;

/// HTTP and stream settings for the API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Deadline for a stream client's first (token) message.
    pub ws_auth_timeout_secs: u64,
    pub jwt: JwtConfig,
}

impl ServerConfig {
    /// Read the server settings from the environment.
    ///
    /// | Env Var                | Default                 |
    /// |------------------------|-------------------------|
    /// | `HOST`                 | `0.0.0.0`               |
    /// | `PORT`                 | `8000`                  |
    /// | `CORS_ORIGINS`         | `http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `WS_AUTH_TIMEOUT_SECS` | `10`                    |
    ///
    /// `CORS_ORIGINS` is comma-separated. JWT settings come from
    /// [`JwtConfig::from_env`].
    ///
    /// # Panics
    ///
    /// Panics if a variable is set but does not parse.
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();

        Self {
            host: env_or("HOST", "0.0.0.0".to_string()),
            port: env_or("PORT", 8000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            ws_auth_timeout_secs: env_or("WS_AUTH_TIMEOUT_SECS", 10),
            jwt: JwtConfig::from_env(),
        }
    }
}

/// Parse `name` from the environment, or fall back to `default` when unset.
pub(crate) fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name}={raw:?} is invalid: {e}")),
        Err(_) => default,
    }
}

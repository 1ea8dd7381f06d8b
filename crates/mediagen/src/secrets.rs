//! Secret lookup for provider API keys, the worker trigger secret and the
//! URL signing key.
//!
//! Each secret can be configured three ways. The first non-blank one wins:
//! an inline value (`"api_key"`), a mounted file (`"api_key_file"`, `~`
//! expanded), or the name of an environment variable (`"api_key_env_var"`).
//! Surrounding whitespace is stripped from file and env contents.

use std::path::PathBuf;

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret configured (set an inline value, a file or an env var name)")]
    Missing,

    #[error("Cannot read secret file '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' is not set")]
    EnvMissing { name: String },

    #[error("Environment variable '{name}' is not valid UTF-8")]
    EnvInvalid { name: String },

    #[error("Secret from {origin} is blank")]
    Blank { origin: String },
}

/// The three configured locations of one secret, as found in config.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretSource<'a> {
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl<'a> SecretSource<'a> {
    pub fn new(inline: Option<&'a str>, file: Option<&'a str>, env_var: Option<&'a str>) -> Self {
        Self {
            inline,
            file,
            env_var,
        }
    }

    pub fn resolve(&self) -> Result<SecretString, SecretError> {
        if let Some(value) = non_blank(self.inline) {
            return Ok(SecretString::from(value.to_string()));
        }
        if let Some(path) = non_blank(self.file) {
            return read_file(expand_home(path));
        }
        if let Some(name) = non_blank(self.env_var) {
            return read_env(name);
        }
        Err(SecretError::Missing)
    }

    /// Nothing configured, or an env var that is named but unset, is
    /// `Ok(None)`. Config defaults name an env var for every secret, so an
    /// unset one must not be fatal.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>, SecretError> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::Missing | SecretError::EnvMissing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolves a required secret. See [`SecretSource::resolve`].
pub fn resolve_secret(
    inline: Option<&str>,
    file: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString, SecretError> {
    SecretSource::new(inline, file, env_var).resolve()
}

/// Resolves a secret that may legitimately be absent.
pub fn resolve_secret_optional(
    inline: Option<&str>,
    file: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>, SecretError> {
    SecretSource::new(inline, file, env_var).resolve_optional()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn read_file(path: PathBuf) -> Result<SecretString, SecretError> {
    let content = std::fs::read_to_string(&path).map_err(|source| SecretError::Unreadable {
        path: path.clone(),
        source,
    })?;
    trimmed(&content, || format!("file '{}'", path.display()))
}

fn read_env(name: &str) -> Result<SecretString, SecretError> {
    match std::env::var(name) {
        Ok(value) => trimmed(&value, || format!("environment variable '{}'", name)),
        Err(std::env::VarError::NotPresent) => Err(SecretError::EnvMissing {
            name: name.to_string(),
        }),
        Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvInvalid {
            name: name.to_string(),
        }),
    }
}

fn trimmed(raw: &str, origin: impl FnOnce() -> String) -> Result<SecretString, SecretError> {
    match raw.trim() {
        "" => Err(SecretError::Blank { origin: origin() }),
        value => Ok(SecretString::from(value.to_string())),
    }
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => Some(""),
        Some(rest) if rest.starts_with('/') => Some(&rest[1..]),
        _ => None,
    };
    match (rest, dirs::home_dir()) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

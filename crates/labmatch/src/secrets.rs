//! Resolution of credentials such as the AI provider API key.
//!
//! Sources are tried in order:
//!
//! 1. **Direct value** from the config file (`ai.api_key`)
//! 2. **File reference**, e.g. a mounted secret (`ai.api_key_file`)
//! 3. **Environment variable** (`ai.api_key_env_var`, default `GEMINI_API_KEY`)
//!
//! Empty strings count as "not provided" at every level.

use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{path}' is empty")]
    EmptyFile { path: PathBuf },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Resolves a secret from the first source that is provided.
///
/// A provided source that cannot be read is an error; later sources are not
/// consulted in that case.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = non_empty(direct) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = non_empty(file_path) {
        let path = expand_home(path);
        let content = fs::read_to_string(&path).map_err(|e| SecretError::FileReadError {
            path: path.clone(),
            source: e,
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SecretError::EmptyFile { path });
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    if let Some(name) = non_empty(env_var) {
        return match std::env::var(name) {
            // Env vars set from files often carry a trailing newline.
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a missing secret is `Ok(None)`.
///
/// "Missing" means no source was provided, or only an environment variable
/// that is unset. Unreadable files and non-UTF-8 variables are still errors.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` or `~/` to the home directory. `~user` is not supported.
fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("LABMATCH_TEST_KEY_1", "env_value");
        let key = resolve_secret(Some("direct"), None, Some("LABMATCH_TEST_KEY_1")).unwrap();
        assert_eq!(key.expose_secret(), "direct");
        std::env::remove_var("LABMATCH_TEST_KEY_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  file_value  ").unwrap();
        std::env::set_var("LABMATCH_TEST_KEY_2", "env_value");

        let key = resolve_secret(
            None,
            Some(file.path().to_str().unwrap()),
            Some("LABMATCH_TEST_KEY_2"),
        )
        .unwrap();
        assert_eq!(key.expose_secret(), "file_value");
        std::env::remove_var("LABMATCH_TEST_KEY_2");
    }

    #[test]
    #[serial]
    fn test_empty_sources_fall_through_to_env() {
        std::env::set_var("LABMATCH_TEST_KEY_3", "env_value\n");
        let key = resolve_secret(Some(""), Some(""), Some("LABMATCH_TEST_KEY_3")).unwrap();
        assert_eq!(key.expose_secret(), "env_value");
        std::env::remove_var("LABMATCH_TEST_KEY_3");
    }

    #[test]
    fn test_no_source_error() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = resolve_secret(None, Some("/nonexistent/labmatch/key"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_blank_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "   ").unwrap();
        let result = resolve_secret(None, Some(file.path().to_str().unwrap()), None);
        assert!(matches!(result, Err(SecretError::EmptyFile { .. })));
    }

    #[test]
    #[serial]
    fn test_optional_treats_unset_env_as_missing() {
        std::env::remove_var("LABMATCH_TEST_KEY_UNSET");
        assert!(resolve_secret_optional(None, None, None).unwrap().is_none());
        assert!(
            resolve_secret_optional(None, None, Some("LABMATCH_TEST_KEY_UNSET"))
                .unwrap()
                .is_none()
        );
        assert!(resolve_secret_optional(None, Some("/nonexistent/labmatch/key"), None).is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
        assert_eq!(expand_home("~alice/key"), PathBuf::from("~alice/key"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/key"), home.join("key"));
            assert_eq!(expand_home("~"), home);
        }
    }
}

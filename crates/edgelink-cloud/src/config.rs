//! # Options File Loading
//!
//! Reads the cloud service properties from a TOML file and applies
//! environment overrides.
//!
//! ## Load Order (later overrides earlier)
//! 1. Key defaults (inside [`CloudServiceOptions::from_properties`])
//! 2. Options file (`cloud.toml`)
//! 3. Environment variables
//!
//! ## File Format
//! ```toml
//! [topic]
//! control-prefix = "$EDC"
//!
//! [birth.cert]
//! policy = "birth-connect-reconnect"
//!
//! [lifecycle.publish.delay]
//! ms = 30000
//! ```
//!
//! Nested tables flatten to dotted keys; a flat file with quoted dotted keys
//! works the same way.

use std::path::{Path, PathBuf};

use edgelink_core::options::keys;
use edgelink_core::{CloudServiceOptions, Properties};
use tracing::{debug, info};

use crate::error::CloudResult;

/// Overrides `topic.control-prefix`.
pub const ENV_CONTROL_PREFIX: &str = "EDGELINK_CONTROL_PREFIX";

/// Overrides `payload.encoding`.
pub const ENV_PAYLOAD_ENCODING: &str = "EDGELINK_PAYLOAD_ENCODING";

/// Overrides `birth.cert.policy`.
pub const ENV_BIRTH_CERT_POLICY: &str = "EDGELINK_BIRTH_CERT_POLICY";

const ENV_OVERRIDES: [(&str, &str); 3] = [
    (ENV_CONTROL_PREFIX, keys::TOPIC_CONTROL_PREFIX),
    (ENV_PAYLOAD_ENCODING, keys::PAYLOAD_ENCODING),
    (ENV_BIRTH_CERT_POLICY, keys::BIRTH_CERT_POLICY),
];

/// Platform config location, e.g. `~/.config/edgelink/cloud.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "edgelink", "edgelink")
        .map(|dirs| dirs.config_dir().join("cloud.toml"))
}

/// Loads properties from `path` (or the default location) plus the
/// environment. A missing file yields only the environment overrides.
///
/// ## Errors
/// [`CloudError::ConfigLoad`](crate::CloudError::ConfigLoad) when the file
/// exists but cannot be read, and a configuration error when it is not
/// valid TOML.
pub fn load_properties(path: Option<PathBuf>) -> CloudResult<Properties> {
    let mut props = match path.or_else(default_config_path) {
        Some(path) if path.exists() => read_properties(&path)?,
        Some(path) => {
            debug!(?path, "Options file not found, using defaults");
            Properties::new()
        }
        None => Properties::new(),
    };

    apply_env_overrides(&mut props);
    Ok(props)
}

/// [`load_properties`] followed by validation.
pub fn load_options(path: Option<PathBuf>) -> CloudResult<CloudServiceOptions> {
    let props = load_properties(path)?;
    Ok(CloudServiceOptions::from_properties(&props)?)
}

fn read_properties(path: &Path) -> CloudResult<Properties> {
    info!(?path, "Loading cloud options from file");
    let contents = std::fs::read_to_string(path)?;
    Ok(Properties::from_toml_str(&contents)?)
}

/// Applies the `EDGELINK_*` variables that are set.
pub fn apply_env_overrides(props: &mut Properties) {
    apply_overrides_from(props, |name| std::env::var(name).ok());
}

/// Applies overrides from any variable source. Empty values are skipped.
pub fn apply_overrides_from(props: &mut Properties, lookup: impl Fn(&str) -> Option<String>) {
    for (var, key) in ENV_OVERRIDES {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            debug!(var, key, value = %value, "Overriding option from environment");
            props.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_core::{BirthCertPolicy, PayloadEncoding};
    use std::collections::HashMap;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("edgelink-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("edgelink-does-not-exist.toml");
        let props = load_properties(Some(path)).unwrap();

        assert!(props.get(keys::LIFECYCLE_PUBLISH_DELAY_MS).is_none());
        assert!(props.get(keys::ENCODE_GZIP).is_none());
    }

    #[test]
    fn test_load_options_from_file() {
        let path = scratch_file(
            "nested",
            r#"
            [topic]
            control-prefix = "$CTRL"

            [encode]
            gzip = true

            [lifecycle.publish.delay]
            ms = 5000
            "#,
        );
        let options = load_options(Some(path.clone())).unwrap();
        std::fs::remove_file(&path).ok();

        if std::env::var(ENV_CONTROL_PREFIX).is_err() {
            assert_eq!(options.control_prefix(), "$CTRL");
        }
        assert!(options.encode_gzip());
        assert_eq!(options.announcement_delay().as_millis(), 5000);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let path = scratch_file("broken", "[topic\ncontrol-prefix = ");
        let err = load_properties(Some(path.clone())).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(err.is_config_error());
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_PAYLOAD_ENCODING, "simple-json"),
            (ENV_BIRTH_CERT_POLICY, "birth-connect-reconnect"),
            (ENV_CONTROL_PREFIX, ""),
        ]);
        let mut props = Properties::new()
            .with(keys::TOPIC_CONTROL_PREFIX, "$ALT")
            .with(keys::PAYLOAD_ENCODING, "kura-protobuf");

        apply_overrides_from(&mut props, |name| vars.get(name).map(|v| v.to_string()));
        let options = CloudServiceOptions::from_properties(&props).unwrap();

        assert_eq!(options.control_prefix(), "$ALT");
        assert_eq!(options.payload_encoding(), PayloadEncoding::SimpleJson);
        assert_eq!(options.birth_cert_policy(), BirthCertPolicy::BirthConnectReconnect);
    }

    #[test]
    fn test_default_path_ends_with_file_name() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("cloud.toml"));
        }
    }
}

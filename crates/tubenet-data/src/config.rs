//! Loading and checking [`NetworkConfig`] files.

use crate::loader::{DataLoadError, deserialize_file, find_data_file};
use std::path::Path;
use tracing::debug;
use tubenet_core::config::NetworkConfig;

/// Base name of the configuration file looked up in a data directory.
pub const CONFIG_BASE_NAME: &str = "network";

/// Load a configuration file. The format is picked from the extension.
pub fn load_config(path: &Path) -> Result<NetworkConfig, DataLoadError> {
    let config: NetworkConfig = deserialize_file(path)?;
    validate_config(&config, path)?;
    debug!(
        file = %path.display(),
        discovery_limit = config.discovery_limit,
        traveller_speed = config.traveller_speed,
        "network config loaded"
    );
    Ok(config)
}

/// Load `network.{ron,toml,json}` from `dir`, or the defaults when the
/// directory has none.
pub fn load_config_from_dir(dir: &Path) -> Result<NetworkConfig, DataLoadError> {
    match find_data_file(dir, CONFIG_BASE_NAME)? {
        Some(path) => load_config(&path),
        None => {
            debug!(dir = %dir.display(), "no network config, using defaults");
            Ok(NetworkConfig::default())
        }
    }
}

/// Reject values the engine cannot run with. `file` is used for reporting.
pub fn validate_config(config: &NetworkConfig, file: &Path) -> Result<(), DataLoadError> {
    let invalid = |field: &'static str, detail: String| DataLoadError::Invalid {
        file: file.to_path_buf(),
        field,
        detail,
    };
    if config.discovery_limit == 0 {
        return Err(invalid("discovery_limit", "must be at least 1".into()));
    }
    if !config.traveller_speed.is_finite() || config.traveller_speed <= 0.0 {
        return Err(invalid(
            "traveller_speed",
            format!("must be a positive number, got {}", config.traveller_speed),
        ));
    }
    if config.entry_buffer_slots == 0 {
        return Err(invalid("entry_buffer_slots", "must be at least 1".into()));
    }
    if config.slot_limit == 0 {
        return Err(invalid("slot_limit", "must be at least 1".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tubenet_config_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = make_test_dir("partial_toml");
        let path = dir.join("network.toml");
        fs::write(&path, "discovery_limit = 12\ntraveller_speed = 0.5\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.discovery_limit, 12);
        assert_eq!(config.traveller_speed, 0.5);
        assert_eq!(config.entry_buffer_slots, NetworkConfig::default().entry_buffer_slots);
        assert!(config.validate_on_removal);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn ron_and_json_agree() {
        let dir = make_test_dir("ron_json");
        let ron = dir.join("a.ron");
        let json = dir.join("b.json");
        fs::write(&ron, "(slot_limit: 16, validate_on_removal: false)").unwrap();
        fs::write(&json, r#"{"slot_limit": 16, "validate_on_removal": false}"#).unwrap();
        assert_eq!(load_config(&ron).unwrap(), load_config(&json).unwrap());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_dir_gives_defaults() {
        let dir = make_test_dir("empty");
        assert_eq!(load_config_from_dir(&dir).unwrap(), NetworkConfig::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn dir_lookup_finds_network_file() {
        let dir = make_test_dir("lookup");
        fs::write(dir.join("network.json"), r#"{"discovery_limit": 2}"#).unwrap();
        assert_eq!(load_config_from_dir(&dir).unwrap().discovery_limit, 2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn zero_speed_is_rejected() {
        let config = NetworkConfig {
            traveller_speed: 0.0,
            ..NetworkConfig::default()
        };
        assert!(matches!(
            validate_config(&config, Path::new("network.ron")),
            Err(DataLoadError::Invalid {
                field: "traveller_speed",
                ..
            })
        ));
    }

    #[test]
    fn zero_limits_are_rejected() {
        for (config, field) in [
            (
                NetworkConfig {
                    discovery_limit: 0,
                    ..NetworkConfig::default()
                },
                "discovery_limit",
            ),
            (
                NetworkConfig {
                    slot_limit: 0,
                    ..NetworkConfig::default()
                },
                "slot_limit",
            ),
        ] {
            match validate_config(&config, Path::new("network.toml")) {
                Err(DataLoadError::Invalid { field: got, .. }) => assert_eq!(got, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            load_config(Path::new("network.ini")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }
}

use std::{collections::HashMap, env, fs, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    ids::{DEFAULT_ID_LENGTH, DEFAULT_MAX_ATTEMPTS},
    staging::normalize_path,
};

const DEFAULT_TIMEOUT_MS: u64 = 45_000;
const LONG_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_RETRIES: u32 = 3;

/// Static per-call-kind backend settings. The broker never mutates these.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    pub ros_srv_name: String,
    /// Length of one response window, in milliseconds.
    pub timeout: u64,
    /// Number of response windows before the request is failed.
    pub retries: u32,
}

impl ServiceConfig {
    pub fn new(ros_srv_name: impl Into<String>, timeout: u64, retries: u32) -> Self {
        Self {
            ros_srv_name: ros_srv_name.into(),
            timeout,
            retries,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTable {
    services: HashMap<String, ServiceConfig>,
}

impl ServiceTable {
    pub fn get(&self, kind: &str) -> Option<&ServiceConfig> {
        self.services.get(kind)
    }

    pub fn insert(&mut self, kind: impl Into<String>, config: ServiceConfig) {
        self.services.insert(kind.into(), config);
    }

    /// Overrides entries with a JSON object of `{kind: {ros_srv_name, timeout, retries}}`.
    pub fn merge_json(&mut self, raw: &str) -> Result<(), String> {
        let overrides: HashMap<String, ServiceConfig> = serde_json::from_str(raw)
            .map_err(|error| format!("invalid services table: {error}"))?;
        self.services.extend(overrides);
        Ok(())
    }
}

impl Default for ServiceTable {
    fn default() -> Self {
        let entries = [
            (
                "text_to_speech",
                "/rapp/rapp_text_to_speech_espeak/text_to_speech_topic",
                LONG_TIMEOUT_MS,
            ),
            (
                "cognitive_test_chooser",
                "/rapp/rapp_cognitive_exercise/cognitive_exercise_chooser_topic",
                DEFAULT_TIMEOUT_MS,
            ),
            (
                "cognitive_get_scores",
                "/rapp/rapp_cognitive_exercise/user_all_categories_score",
                DEFAULT_TIMEOUT_MS,
            ),
            (
                "cognitive_get_history",
                "/rapp/rapp_cognitive_exercise/user_all_categories_history",
                DEFAULT_TIMEOUT_MS,
            ),
            (
                "object_recognition_caffe",
                "/rapp/rapp_caffe_wrapper/image_classification_srv",
                DEFAULT_TIMEOUT_MS,
            ),
            (
                "hazard_detection_door_check",
                "/rapp/rapp_hazard_detection/door_check",
                DEFAULT_TIMEOUT_MS,
            ),
            (
                "speech_recognition_sphinx4",
                "/rapp/rapp_speech_detection_sphinx4/batch_speech_to_text",
                LONG_TIMEOUT_MS,
            ),
        ];

        Self {
            services: entries
                .into_iter()
                .map(|(kind, srv, timeout)| {
                    (kind.to_string(), ServiceConfig::new(srv, timeout, DEFAULT_RETRIES))
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub rosbridge_url: String,
    pub reconnect_delay: Duration,
    pub server_cache_dir: PathBuf,
    pub services_cache_dir: PathBuf,
    pub id_length: usize,
    pub id_max_attempts: usize,
    pub services: ServiceTable,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let host = lookup("BRIDGE_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "BRIDGE_PORT", 9001u16);
        let rosbridge_url =
            lookup("ROSBRIDGE_URL").unwrap_or_else(|| "ws://127.0.0.1:9090".to_string());
        let reconnect_delay =
            Duration::from_millis(parse_or(&lookup, "ROSBRIDGE_RECONNECT_MS", 2_000u64));

        let server_cache_dir = lookup("BRIDGE_SERVER_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp/rapp_platform_files/"));
        let services_cache_dir = lookup("BRIDGE_SERVICES_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp/rapp_platform_files/services/"));

        let id_length = parse_or(&lookup, "BRIDGE_ID_LENGTH", DEFAULT_ID_LENGTH);
        let id_max_attempts = parse_or(&lookup, "BRIDGE_ID_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS);

        let mut services = ServiceTable::default();
        if let Some(path) = lookup("BRIDGE_SERVICES_FILE").filter(|v| !v.trim().is_empty()) {
            let raw = fs::read_to_string(&path)
                .map_err(|error| format!("failed to read services file {path}: {error}"))?;
            services.merge_json(&raw)?;
        }

        Ok(Self {
            host,
            port,
            rosbridge_url,
            reconnect_delay,
            server_cache_dir: normalize_path(&server_cache_dir),
            services_cache_dir: normalize_path(&services_cache_dir),
            id_length,
            id_max_attempts,
            services,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    fallback: T,
) -> T {
    lookup(name)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_cover_every_service() {
        let config = BridgeConfig::from_lookup(lookup_from(&[])).expect("default config");
        assert_eq!(config.port, 9001);
        assert_eq!(config.id_length, 5);
        assert_eq!(
            config.services_cache_dir,
            PathBuf::from("/tmp/rapp_platform_files/services")
        );

        let tts = config.services.get("text_to_speech").expect("tts config");
        assert_eq!(tts.timeout, 60_000);
        assert_eq!(tts.retries, 3);
        assert!(config.services.get("cognitive_test_chooser").is_some());
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("BRIDGE_PORT", "not-a-port"),
            ("BRIDGE_ID_LENGTH", "8"),
        ]))
        .expect("config");
        assert_eq!(config.port, 9001);
        assert_eq!(config.id_length, 8);
    }

    #[test]
    fn services_file_overrides_entries() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("services.json");
        fs::write(
            &path,
            r#"{"text_to_speech": {"ros_srv_name": "/tts", "timeout": 500, "retries": 1}}"#,
        )
        .expect("write services file");

        let config = BridgeConfig::from_lookup(lookup_from(&[(
            "BRIDGE_SERVICES_FILE",
            path.to_str().expect("utf8 path"),
        )]))
        .expect("config");

        assert_eq!(
            config.services.get("text_to_speech"),
            Some(&ServiceConfig::new("/tts", 500, 1))
        );
        assert!(config.services.get("cognitive_get_scores").is_some());
    }

    #[test]
    fn malformed_services_file_is_a_startup_error() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("services.json");
        fs::write(&path, "{not json").expect("write services file");

        let error = BridgeConfig::from_lookup(lookup_from(&[(
            "BRIDGE_SERVICES_FILE",
            path.to_str().expect("utf8 path"),
        )]))
        .expect_err("malformed file");
        assert!(error.contains("invalid services table"));
    }
}

//! Orchestrator configuration loading (`spec.md` §6 "Configuration keys",
//! component C9).
//!
//! TOML is the sole config source, following the `Raw*`-with-`Option`-
//! fields-then-explicit-defaulting shape of
//! `forwarder::config::load_config_from_str`.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AtcServerConfig {
    pub frequencies: Vec<FrequencyConfig>,
    pub decoder: DecoderSettings,
    pub stt: SttSettings,
    pub post: PostSettings,
    pub server: ServerSettings,
    pub admission: AdmissionSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone)]
pub struct FrequencyConfig {
    pub id: uuid::Uuid,
    pub name: String,
    pub url: String,
    pub transcribe: bool,
    pub order: i32,
}

#[derive(Debug, Clone)]
pub struct DecoderSettings {
    pub path: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: String,
    pub reconnect_delay_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TurnDetectionSettings {
    pub kind: String,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub vad_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct SttSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub language: String,
    pub chunk_ms: u32,
    pub prompt: String,
    pub turn_detection: TurnDetectionSettings,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PostSettings {
    pub enabled: bool,
    pub model: String,
    pub interval_secs: u64,
    pub batch_size: u32,
    pub context_count: u32,
    pub system_prompt_path: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub additional_ports: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub max_total_listeners: u32,
    pub max_per_frequency: u32,
}

/// Not named in `spec.md` §6's configuration-key list (persistence is
/// explicitly "any tabular store" there) but needed to bind the concrete
/// `atc-store-sqlite` implementation to a file, the way
/// `forwarder.journal.sqlite_path` does for the teacher's journal.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub path: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    frequencies: Option<Vec<RawFrequency>>,
    decoder: Option<RawDecoder>,
    stt: Option<RawStt>,
    post: Option<RawPost>,
    server: Option<RawServer>,
    admission: Option<RawAdmission>,
    database: Option<RawDatabase>,
}

#[derive(Debug, Deserialize)]
struct RawFrequency {
    id: Option<String>,
    name: Option<String>,
    url: Option<String>,
    transcribe: Option<bool>,
    order: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawDecoder {
    path: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    format: Option<String>,
    reconnect_delay_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTurnDetection {
    #[serde(rename = "type")]
    kind: Option<String>,
    prefix_padding_ms: Option<u32>,
    silence_duration_ms: Option<u32>,
    vad_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RawStt {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    language: Option<String>,
    chunk_ms: Option<u32>,
    prompt: Option<String>,
    turn_detection: Option<RawTurnDetection>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    enabled: Option<bool>,
    model: Option<String>,
    interval_secs: Option<u64>,
    batch_size: Option<u32>,
    context_count: Option<u32>,
    system_prompt_path: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    host: Option<String>,
    port: Option<u16>,
    additional_ports: Option<Vec<u16>>,
}

#[derive(Debug, Deserialize)]
struct RawAdmission {
    max_total_listeners: Option<u32>,
    max_per_frequency: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawDatabase {
    path: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<AtcServerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<AtcServerConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/atc-server/config.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<AtcServerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let raw_frequencies = raw
        .frequencies
        .ok_or_else(|| ConfigError::MissingField("frequencies".to_owned()))?;
    if raw_frequencies.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one [[frequencies]] entry is required".to_owned(),
        ));
    }
    let mut frequencies = Vec::with_capacity(raw_frequencies.len());
    for (i, f) in raw_frequencies.into_iter().enumerate() {
        let id_str = f.id.ok_or_else(|| ConfigError::MissingField(format!("frequencies[{i}].id")))?;
        let id = uuid::Uuid::parse_str(&id_str)
            .map_err(|e| ConfigError::InvalidValue(format!("frequencies[{i}].id is not a uuid: {e}")))?;
        let name = f.name.ok_or_else(|| ConfigError::MissingField(format!("frequencies[{i}].name")))?;
        let url = f.url.ok_or_else(|| ConfigError::MissingField(format!("frequencies[{i}].url")))?;
        frequencies.push(FrequencyConfig {
            id,
            name,
            url,
            transcribe: f.transcribe.unwrap_or(false),
            order: f.order.unwrap_or(i as i32),
        });
    }

    let decoder = match raw.decoder {
        Some(d) => DecoderSettings {
            path: d.path.unwrap_or_else(|| "ffmpeg".to_owned()),
            sample_rate: d.sample_rate.unwrap_or(16_000),
            channels: d.channels.unwrap_or(1),
            format: d.format.unwrap_or_else(|| "s16le".to_owned()),
            reconnect_delay_secs: d.reconnect_delay_secs.unwrap_or(2),
            timeout_secs: d.timeout_secs.unwrap_or(10),
        },
        None => DecoderSettings {
            path: "ffmpeg".to_owned(),
            sample_rate: 16_000,
            channels: 1,
            format: "s16le".to_owned(),
            reconnect_delay_secs: 2,
            timeout_secs: 10,
        },
    };

    let raw_stt = raw.stt.ok_or_else(|| ConfigError::MissingField("stt".to_owned()))?;
    let stt_api_key = raw_stt
        .api_key
        .ok_or_else(|| ConfigError::MissingField("stt.api_key".to_owned()))?;
    let raw_turn_detection = raw_stt.turn_detection;
    let turn_detection = match raw_turn_detection {
        Some(t) => TurnDetectionSettings {
            kind: t.kind.unwrap_or_else(|| "server_vad".to_owned()),
            prefix_padding_ms: t.prefix_padding_ms.unwrap_or(300),
            silence_duration_ms: t.silence_duration_ms.unwrap_or(500),
            vad_threshold: t.vad_threshold.unwrap_or(0.5),
        },
        None => TurnDetectionSettings {
            kind: "server_vad".to_owned(),
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            vad_threshold: 0.5,
        },
    };
    let stt = SttSettings {
        api_key: stt_api_key,
        model: raw_stt.model.unwrap_or_else(|| "gpt-4o-realtime-preview".to_owned()),
        base_url: raw_stt.base_url.unwrap_or_else(|| "https://api.openai.com".to_owned()),
        language: raw_stt.language.unwrap_or_else(|| "en".to_owned()),
        chunk_ms: raw_stt.chunk_ms.unwrap_or(100),
        prompt: raw_stt.prompt.unwrap_or_default(),
        turn_detection,
        timeout_secs: raw_stt.timeout_secs.unwrap_or(30),
    };

    let post = match raw.post {
        Some(p) => PostSettings {
            enabled: p.enabled.unwrap_or(false),
            model: p.model.unwrap_or_else(|| "gpt-4o-mini".to_owned()),
            interval_secs: p.interval_secs.unwrap_or(15),
            batch_size: p.batch_size.unwrap_or(20),
            context_count: p.context_count.unwrap_or(10),
            system_prompt_path: p.system_prompt_path.unwrap_or_default(),
            timeout_secs: p.timeout_secs.unwrap_or(30),
        },
        None => PostSettings {
            enabled: false,
            model: "gpt-4o-mini".to_owned(),
            interval_secs: 15,
            batch_size: 20,
            context_count: 10,
            system_prompt_path: String::new(),
            timeout_secs: 30,
        },
    };
    if post.enabled && post.system_prompt_path.is_empty() {
        return Err(ConfigError::MissingField("post.system_prompt_path".to_owned()));
    }

    let server = match raw.server {
        Some(s) => ServerSettings {
            host: s.host.unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: s.port.unwrap_or(8090),
            additional_ports: s.additional_ports.unwrap_or_default(),
        },
        None => ServerSettings {
            host: "0.0.0.0".to_owned(),
            port: 8090,
            additional_ports: Vec::new(),
        },
    };

    let admission = match raw.admission {
        Some(a) => AdmissionSettings {
            max_total_listeners: a.max_total_listeners.unwrap_or(100),
            max_per_frequency: a.max_per_frequency.unwrap_or(10),
        },
        None => AdmissionSettings {
            max_total_listeners: 100,
            max_per_frequency: 10,
        },
    };

    let database = match raw.database {
        Some(d) => DatabaseSettings {
            path: d.path.unwrap_or_else(|| "/var/lib/atc-server/atc.db".to_owned()),
        },
        None => DatabaseSettings {
            path: "/var/lib/atc-server/atc.db".to_owned(),
        },
    };

    Ok(AtcServerConfig {
        frequencies,
        decoder,
        stt,
        post,
        server,
        admission,
        database,
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
            [[frequencies]]
            id = "2f7e8a6e-7e9a-4b34-9f2b-8f3c4c8c6a10"
            name = "Tower"
            url = "https://example.com/tower.mp3"
            transcribe = true

            [stt]
            api_key = "sk-test"
        "#
        .to_owned()
    }

    #[test]
    fn minimal_config_applies_defaults() {
        let cfg = load_config_from_str(&minimal_toml()).unwrap();
        assert_eq!(cfg.frequencies.len(), 1);
        assert_eq!(cfg.frequencies[0].name, "Tower");
        assert!(cfg.frequencies[0].transcribe);
        assert_eq!(cfg.decoder.sample_rate, 16_000);
        assert_eq!(cfg.admission.max_total_listeners, 100);
        assert_eq!(cfg.admission.max_per_frequency, 10);
        assert!(!cfg.post.enabled);
        assert_eq!(cfg.server.port, 8090);
    }

    #[test]
    fn missing_frequencies_is_an_error() {
        let err = load_config_from_str("[stt]\napi_key = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn invalid_frequency_id_is_rejected() {
        let toml = r#"
            [[frequencies]]
            id = "not-a-uuid"
            name = "Tower"
            url = "https://example.com"

            [stt]
            api_key = "x"
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn post_enabled_without_prompt_path_is_rejected() {
        let toml = format!(
            "{}\n[post]\nenabled = true\n",
            minimal_toml()
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }
}

//! End-to-end orchestrator wiring, independent of the unit tests inside
//! `src/config.rs` and `src/admission.rs`.

use std::sync::Arc;
use std::time::Duration;

use atc_server::config::{
    AdmissionSettings, AtcServerConfig, DatabaseSettings, DecoderSettings, FrequencyConfig,
    PostSettings, ServerSettings, SttSettings, TurnDetectionSettings,
};
use atc_server::Orchestrator;
use atc_store_sqlite::SqliteStore;

fn minimal_config(frequencies: Vec<FrequencyConfig>) -> AtcServerConfig {
    AtcServerConfig {
        frequencies,
        decoder: DecoderSettings {
            path: "ffmpeg".to_owned(),
            sample_rate: 16_000,
            channels: 1,
            format: "s16le".to_owned(),
            reconnect_delay_secs: 2,
            timeout_secs: 10,
        },
        stt: SttSettings {
            api_key: String::new(),
            model: "gpt-4o-realtime-preview".to_owned(),
            base_url: "https://api.openai.com".to_owned(),
            language: "en".to_owned(),
            chunk_ms: 100,
            prompt: String::new(),
            turn_detection: TurnDetectionSettings {
                kind: "server_vad".to_owned(),
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
                vad_threshold: 0.5,
            },
            timeout_secs: 30,
        },
        post: PostSettings {
            enabled: false,
            model: "gpt-4o-mini".to_owned(),
            interval_secs: 15,
            batch_size: 20,
            context_count: 10,
            system_prompt_path: String::new(),
            timeout_secs: 30,
        },
        server: ServerSettings {
            host: "127.0.0.1".to_owned(),
            port: 0,
            additional_ports: vec![],
        },
        admission: AdmissionSettings {
            max_total_listeners: 2,
            max_per_frequency: 1,
        },
        database: DatabaseSettings {
            path: ":memory:".to_owned(),
        },
    }
}

/// `api_key` left empty so no frequency spins up a transcription processor
/// (which would otherwise dial a real STT endpoint); this exercises the
/// session/admission/shutdown wiring without network access.
#[tokio::test]
async fn orchestrator_starts_and_stops_without_network_access() {
    let freq = FrequencyConfig {
        id: uuid::Uuid::new_v4(),
        name: "ground".to_owned(),
        url: "udp://239.0.0.1:1234".to_owned(),
        transcribe: true,
        order: 0,
    };
    let cfg = minimal_config(vec![freq]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let orchestrator = Orchestrator::start(cfg, store).await.unwrap();
    orchestrator.stop().await;
}

#[tokio::test]
async fn unknown_frequency_is_rejected_on_admission() {
    let cfg = minimal_config(vec![]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let orchestrator = Orchestrator::start(cfg, store).await.unwrap();

    let err = orchestrator
        .admit_listener(uuid::Uuid::new_v4(), "client-1")
        .await
        .unwrap_err();
    assert!(matches!(err, atc_server::OrchestratorError::UnknownFrequency(_)));

    orchestrator.stop().await;
}

#[tokio::test]
async fn admission_cap_is_enforced_through_the_orchestrator() {
    let freq = FrequencyConfig {
        id: uuid::Uuid::new_v4(),
        name: "tower".to_owned(),
        url: "udp://239.0.0.1:1234".to_owned(),
        transcribe: false,
        order: 0,
    };
    let freq_id = freq.id;
    let cfg = minimal_config(vec![freq]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let orchestrator = Orchestrator::start(cfg, store).await.unwrap();

    let _reader = orchestrator.admit_listener(freq_id, "client-1").await.unwrap();
    let err = orchestrator
        .admit_listener(freq_id, "client-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        atc_server::OrchestratorError::Admission(atc_server::AdmissionError::FrequencyCapExceeded)
    ));

    orchestrator.remove_listener(freq_id, "client-1").await;
    orchestrator.admit_listener(freq_id, "client-2").await.unwrap();

    orchestrator.stop().await;
}

#[tokio::test]
async fn post_processor_requires_a_readable_system_prompt() {
    let mut cfg = minimal_config(vec![]);
    cfg.post.enabled = true;
    cfg.post.system_prompt_path = "/nonexistent/atc-system-prompt.txt".to_owned();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let err = Orchestrator::start(cfg, store).await.unwrap_err();
    assert!(matches!(err, atc_server::OrchestratorError::SystemPrompt(_)));
}

#[tokio::test]
async fn shutdown_completes_within_the_per_stage_timeout_budget() {
    let freq = FrequencyConfig {
        id: uuid::Uuid::new_v4(),
        name: "ground".to_owned(),
        url: "udp://239.0.0.1:1234".to_owned(),
        transcribe: false,
        order: 0,
    };
    let cfg = minimal_config(vec![freq]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let orchestrator = Orchestrator::start(cfg, store).await.unwrap();

    let stopped = tokio::time::timeout(Duration::from_secs(10), orchestrator.stop()).await;
    assert!(stopped.is_ok(), "shutdown should complete well within the bounded per-stage timeout");
}

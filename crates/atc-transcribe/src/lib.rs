//! Transcription processor (`spec.md` §4.5, component C5): drives an STT
//! session off a fan-out reader for one frequency, landing completions
//! into storage and the event bus.

mod chunker;
mod processor;

pub use chunker::Chunker;
pub use processor::{ChunkConfig, TranscriptionProcessor};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atc_core::store::{ClearanceStore, StoreError, TranscriptionStore};
    use atc_core::{Clearance, TranscriptionRecord};
    use atc_eventbus::EventBus;
    use atc_fanout::MultiReader;
    use atc_protocol::{FrequencyId, SpeakerType, TranscriptionEvent};
    use atc_stt::{Connection, RealtimeProvider, SttError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex as TokioMutex;

    struct MemoryStore {
        rows: TokioMutex<Vec<TranscriptionRecord>>,
    }

    #[async_trait]
    impl TranscriptionStore for MemoryStore {
        async fn insert_transcription(
            &self,
            record: &TranscriptionRecord,
        ) -> Result<atc_protocol::TranscriptionId, StoreError> {
            let mut rows = self.rows.lock().await;
            rows.push(record.clone());
            Ok(record.id)
        }

        async fn get_unprocessed_transcriptions(
            &self,
            _batch_size: u32,
        ) -> Result<Vec<TranscriptionRecord>, StoreError> {
            Ok(self.rows.lock().await.iter().filter(|r| !r.is_processed).cloned().collect())
        }

        async fn update_processed(
            &self,
            _id: atc_protocol::TranscriptionId,
            _content_processed: &str,
            _speaker_type: Option<SpeakerType>,
            _callsign: Option<&str>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get_last_processed_transcriptions(
            &self,
            _frequency_id: FrequencyId,
            _limit: u32,
        ) -> Result<Vec<TranscriptionRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl ClearanceStore for MemoryStore {
        async fn insert_clearance(&self, _record: &Clearance) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct ScriptedConnection {
        events: std::sync::Mutex<std::collections::VecDeque<TranscriptionEvent>>,
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&mut self, _frame: atc_protocol::SttOutboundFrame) -> Result<(), SttError> {
            Ok(())
        }
        async fn read(&mut self) -> Result<TranscriptionEvent, SttError> {
            let next = self.events.lock().expect("poisoned").pop_front();
            match next {
                Some(event) => Ok(event),
                None => std::future::pending().await,
            }
        }
        async fn close(&mut self) -> Result<(), SttError> {
            Ok(())
        }
    }

    struct ScriptedProvider {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeProvider for ScriptedProvider {
        async fn create_session(&self, system_prompt: &str) -> Result<atc_core::SttSession, SttError> {
            Ok(atc_core::SttSession {
                id: "s1".to_owned(),
                provider_id: "test".to_owned(),
                created_at: chrono::Utc::now(),
                expires_at: chrono::Utc::now() + chrono::Duration::minutes(30),
                active: true,
                config: serde_json::json!({}),
                system_prompt: system_prompt.to_owned(),
                client_secret: None,
            })
        }
        async fn connect(&self, _session: &atc_core::SttSession) -> Result<Box<dyn Connection>, SttError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedConnection {
                events: std::sync::Mutex::new(std::collections::VecDeque::from([
                    TranscriptionEvent::Delta { text: "clear".to_owned() },
                    TranscriptionEvent::Completed { text: "cleared to land runway 27".to_owned() },
                ])),
            }))
        }
        async fn end_session(&self, _session: &atc_core::SttSession) -> Result<(), SttError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn completed_event_is_persisted_and_broadcast() {
        let fanout = Arc::new(MultiReader::new());
        let reader = fanout.create_reader("r1").unwrap();
        let provider: Arc<dyn RealtimeProvider> = Arc::new(ScriptedProvider { connects: AtomicUsize::new(0) });
        let store: Arc<dyn TranscriptionStore> = Arc::new(MemoryStore { rows: TokioMutex::new(Vec::new()) });
        let bus = EventBus::new();

        let processor = TranscriptionProcessor::start(
            uuid::Uuid::nil(),
            ChunkConfig { sample_rate: 16_000, channels: 1, chunk_ms: 100 },
            reader,
            provider,
            "transcribe ATC audio".to_owned(),
            store.clone(),
            bus.publisher(),
        )
        .await
        .unwrap();

        fanout.write(vec![0u8; 3200]);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let rows = store.get_unprocessed_transcriptions(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "cleared to land runway 27");

        processor.stop().await;
    }
}

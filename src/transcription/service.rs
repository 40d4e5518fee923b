//! # Transcription Service
//!
//! Accepts an audio payload plus task parameters, runs the active engine and
//! normalizes both engine families into one result shape.
//!
//! ## Request flow:
//! 1. Write the payload to a [`TemporaryAudio`] file
//! 2. Acquire the engine (loading it on first use)
//! 3. Wait for an inference slot, then run the backend on the blocking pool
//! 4. Trim the text and render it as JSON or plain text
//!
//! The temporary file is moved into the blocking closure, so it is removed as
//! soon as inference finishes, whatever the outcome.

use crate::audio::TemporaryAudio;
use crate::error::{AppError, AppResult};
use crate::transcription::backend::{DecodeOptions, OutputFormat, Task};
use crate::transcription::engine::{Engine, EngineHandle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// One transcription job as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    /// Client file name; only its extension is used.
    pub filename: Option<String>,
    pub options: DecodeOptions,
    pub output: OutputFormat,
}

/// Structured transcription response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    /// Detected language, or the requested one; may be absent.
    pub language: Option<String>,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutcome {
    Json(TranscriptionResult),
    /// Body is exactly the trimmed transcript.
    Text(String),
}

/// Run `job` on the blocking pool once an inference slot is free.
///
/// Backend failures become `AppError::Inference` with the backend's own message.
pub(crate) async fn run_inference<T, F>(permits: &Semaphore, job: F) -> AppResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let _permit = permits
        .acquire()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| AppError::Internal(format!("Inference task failed: {}", e)))?
        .map_err(|e| AppError::Inference(e.to_string()))
}

/// Transcription entry point shared by all request handlers.
#[derive(Clone)]
pub struct TranscriptionService {
    engine: Arc<EngineHandle>,
    scratch_dir: PathBuf,
    permits: Arc<Semaphore>,
}

impl TranscriptionService {
    pub fn new(engine: Arc<EngineHandle>, scratch_dir: PathBuf, permits: Arc<Semaphore>) -> Self {
        Self {
            engine,
            scratch_dir,
            permits,
        }
    }

    pub async fn transcribe(&self, request: TranscriptionRequest) -> AppResult<TranscriptionOutcome> {
        let start = Instant::now();
        let audio =
            TemporaryAudio::create(&self.scratch_dir, &request.audio, request.filename.as_deref())
                .await?;
        let engine = self.engine.acquire().await?;

        let options = request.options.clone();
        let (text, language) =
            run_inference(&self.permits, move || transcribe_blocking(&engine, audio, &options))
                .await?;

        let text = text.trim().to_string();
        info!(
            task = request.options.task.as_str(),
            language = language.as_deref().unwrap_or("unknown"),
            chars = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Transcription completed"
        );

        Ok(match request.output {
            OutputFormat::Text => TranscriptionOutcome::Text(text),
            OutputFormat::Json => TranscriptionOutcome::Json(TranscriptionResult {
                text,
                language,
                task: request.options.task,
            }),
        })
    }
}

/// Dispatch on the engine family. Consumes `audio` so the file is removed on return.
fn transcribe_blocking(
    engine: &Engine,
    audio: TemporaryAudio,
    options: &DecodeOptions,
) -> anyhow::Result<(String, Option<String>)> {
    debug!(bytes = audio.bytes_written(), engine = engine.kind().as_str(), "Running inference");

    match engine {
        Engine::Fast(backend) => {
            let (segments, info) = backend.transcribe(audio.path(), options)?;
            let mut texts = Vec::new();
            for segment in segments {
                texts.push(segment?.text);
            }
            Ok((texts.join(" "), Some(info.language)))
        }
        Engine::Standard(backend) => {
            let transcript = backend.transcribe(audio.path(), options)?;
            let language = transcript.language.or_else(|| options.language.clone());
            Ok((transcript.text, language))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::testing::{
        failing_handle, handle_with, is_empty_dir, scratch_dir, wav_bytes, FakeFast, FakeStandard,
    };
    use std::sync::atomic::Ordering;

    fn service(engine: Arc<EngineHandle>, dir: PathBuf) -> TranscriptionService {
        TranscriptionService::new(engine, dir, Arc::new(Semaphore::new(2)))
    }

    fn request(language: Option<&str>, output: OutputFormat) -> TranscriptionRequest {
        TranscriptionRequest {
            audio: wav_bytes(1600),
            filename: Some("clip.wav".to_string()),
            options: DecodeOptions {
                task: Task::Transcribe,
                language: language.map(str::to_string),
            },
            output,
        }
    }

    #[tokio::test]
    async fn test_fast_segments_are_joined() {
        let fake = FakeFast::returning(&["Hello", "world"], "en");
        let log = fake.log.clone();
        let dir = scratch_dir();
        let service = service(handle_with(Engine::Fast(Box::new(fake))), dir.clone());

        let outcome = service.transcribe(request(None, OutputFormat::Json)).await.unwrap();
        assert_eq!(
            outcome,
            TranscriptionOutcome::Json(TranscriptionResult {
                text: "Hello world".to_string(),
                language: Some("en".to_string()),
                task: Task::Transcribe,
            })
        );

        // The backend saw a live file with the upload's extension; it is gone now
        let calls = log.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1);
        assert_eq!(calls[0].0.extension().unwrap(), "wav");
        assert!(!calls[0].0.exists());
        assert!(is_empty_dir(&dir));
    }

    #[tokio::test]
    async fn test_standard_falls_back_to_requested_language() {
        let fake = FakeStandard::returning(" Hi there ", None);
        let dir = scratch_dir();
        let service = service(handle_with(Engine::Standard(Box::new(fake))), dir.clone());

        let outcome = service
            .transcribe(request(Some("fr"), OutputFormat::Json))
            .await
            .unwrap();
        match outcome {
            TranscriptionOutcome::Json(result) => {
                assert_eq!(result.text, "Hi there");
                assert_eq!(result.language.as_deref(), Some("fr"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(is_empty_dir(&dir));
    }

    #[tokio::test]
    async fn test_standard_language_absent_when_nothing_known() {
        let fake = FakeStandard::returning("text", None);
        let service = service(handle_with(Engine::Standard(Box::new(fake))), scratch_dir());

        match service.transcribe(request(None, OutputFormat::Json)).await.unwrap() {
            TranscriptionOutcome::Json(result) => assert_eq!(result.language, None),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_text_output_is_trimmed_transcript() {
        let standard = service(
            handle_with(Engine::Standard(Box::new(FakeStandard::returning("  Hi there\n", Some("en"))))),
            scratch_dir(),
        );
        assert_eq!(
            standard.transcribe(request(None, OutputFormat::Text)).await.unwrap(),
            TranscriptionOutcome::Text("Hi there".to_string())
        );

        let fast = service(
            handle_with(Engine::Fast(Box::new(FakeFast::returning(&[" Hello", "world "], "en")))),
            scratch_dir(),
        );
        assert_eq!(
            fast.transcribe(request(None, OutputFormat::Text)).await.unwrap(),
            TranscriptionOutcome::Text("Hello world".to_string())
        );
    }

    #[tokio::test]
    async fn test_translate_is_passed_through() {
        let fake = FakeFast::returning(&["Good morning"], "de");
        let pulled = Arc::clone(&fake.pulled);
        let service = service(handle_with(Engine::Fast(Box::new(fake))), scratch_dir());

        let mut req = request(Some("de"), OutputFormat::Json);
        req.options.task = Task::Translate;
        match service.transcribe(req).await.unwrap() {
            TranscriptionOutcome::Json(result) => {
                assert_eq!(result.task, Task::Translate);
                assert_eq!(result.language.as_deref(), Some("de"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_error_keeps_message_and_removes_file() {
        let fake = FakeStandard::failing("CUDA out of memory");
        let log = fake.log.clone();
        let dir = scratch_dir();
        let service = service(handle_with(Engine::Standard(Box::new(fake))), dir.clone());

        let err = service
            .transcribe(request(None, OutputFormat::Json))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Inference(ref msg) if msg == "CUDA out of memory"));

        let calls = log.calls();
        assert!(calls[0].1);
        assert!(!calls[0].0.exists());
        assert!(is_empty_dir(&dir));
    }

    #[tokio::test]
    async fn test_initialization_failure_removes_file() {
        let dir = scratch_dir();
        let service = service(failing_handle("weights missing"), dir.clone());

        let err = service
            .transcribe(request(None, OutputFormat::Json))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Initialization(_)));
        assert!(is_empty_dir(&dir));
    }

    #[tokio::test]
    async fn test_unwritable_scratch_dir_is_internal_error() {
        let missing = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
        let fake = FakeStandard::returning("never", None);
        let log = fake.log.clone();
        let service = service(handle_with(Engine::Standard(Box::new(fake))), missing);

        let err = service
            .transcribe(request(None, OutputFormat::Json))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(log.calls().is_empty());
    }
}

//! # Speech Recognition Endpoints
//!
//! ## Available Endpoints:
//! - `POST /asr` - Transcribe or translate an uploaded audio file
//! - `POST /detect-language` - Detect the spoken language of an uploaded audio file
//!
//! ## Request:
//! Multipart form data with the audio in a field named `audio_file`. `/asr`
//! also reads the optional fields `task` (`transcribe` | `translate`),
//! `language` (ISO 639-1 code) and `output` (`json` | `txt`). The same names
//! are accepted as query parameters; form fields win when both are present.
//!
//! ## Response (`POST /asr`, JSON output):
//! ```json
//! {
//!   "text": "Hello world",
//!   "language": "en",
//!   "task": "transcribe"
//! }
//! ```
//! With `output=txt` the body is the bare transcript as `text/plain`.

use crate::error::AppError;
use crate::handlers::upload::{read_upload, UploadForm};
use crate::state::AppState;
use crate::transcription::{
    DecodeOptions, OutputFormat, Task, TranscriptionOutcome, TranscriptionRequest,
};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::str::FromStr;

/// Query-string fallback for the `/asr` form fields.
#[derive(Debug, Default, Deserialize)]
pub struct AsrQuery {
    pub task: Option<String>,
    pub language: Option<String>,
    pub output: Option<String>,
}

impl AsrQuery {
    fn get(&self, name: &str) -> Option<&str> {
        let value = match name {
            "task" => self.task.as_deref(),
            "language" => self.language.as_deref(),
            "output" => self.output.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Build a transcription request from the parsed form, falling back to the query.
fn build_request(form: UploadForm, query: &AsrQuery) -> Result<TranscriptionRequest, AppError> {
    let param = |name: &str| {
        form.field(name)
            .or_else(|| query.get(name))
            .map(str::to_string)
    };

    let task = match param("task") {
        Some(task) => Task::from_str(&task).map_err(AppError::InvalidRequest)?,
        None => Task::default(),
    };
    let language = param("language").map(|l| l.to_lowercase());
    let output = param("output")
        .map(|o| OutputFormat::parse_lenient(&o))
        .unwrap_or_default();

    let (audio, filename) = form.into_audio()?;
    Ok(TranscriptionRequest {
        audio,
        filename,
        options: DecodeOptions { task, language },
        output,
    })
}

pub async fn transcribe(
    state: web::Data<AppState>,
    query: web::Query<AsrQuery>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = read_upload(payload, state.config.performance.max_upload_bytes).await?;
    let request = build_request(form, &query)?;

    match state.transcription.transcribe(request).await? {
        TranscriptionOutcome::Json(result) => Ok(HttpResponse::Ok().json(result)),
        TranscriptionOutcome::Text(text) => Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(text)),
    }
}

pub async fn detect_language(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = read_upload(payload, state.config.performance.max_upload_bytes).await?;
    let (audio, filename) = form.into_audio()?;

    let result = state.detection.detect(&audio, filename.as_deref()).await?;
    Ok(HttpResponse::Ok().json(result))
}

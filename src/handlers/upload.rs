//! Multipart parsing shared by `/asr` and `/detect-language`.
//!
//! The audio part is buffered in memory and checked against the upload limit
//! while it streams in. Small text parts are collected by name; anything that
//! is neither is drained and ignored.

use crate::error::{AppError, AppResult};
use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;
use std::collections::HashMap;

/// Form field carrying the audio payload.
pub const AUDIO_FIELD: &str = "audio_file";

/// Text parameters accepted next to the audio part.
const TEXT_FIELDS: [&str; 3] = ["task", "language", "output"];

/// Text parameters are short; anything longer is a malformed request.
const MAX_TEXT_FIELD_BYTES: usize = 256;

#[derive(Debug, Default)]
pub struct UploadForm {
    pub audio: Option<Vec<u8>>,
    pub filename: Option<String>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    /// Non-empty text field value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// The audio payload and client file name, or 400 when none was sent.
    pub fn into_audio(self) -> AppResult<(Vec<u8>, Option<String>)> {
        match self.audio {
            Some(audio) if !audio.is_empty() => Ok((audio, self.filename)),
            Some(_) => Err(AppError::InvalidRequest("Audio file is empty".to_string())),
            None => Err(AppError::InvalidRequest("No audio file provided".to_string())),
        }
    }
}

pub async fn read_upload(mut payload: Multipart, max_audio_bytes: usize) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::InvalidRequest(format!("Multipart error: {}", e)))?;

        let content_disposition = field.content_disposition().ok_or_else(|| {
            AppError::InvalidRequest("Missing content disposition".to_string())
        })?;
        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::InvalidRequest("Missing field name".to_string()))?
            .to_string();
        let filename = content_disposition.get_filename().map(|s| s.to_string());

        if field_name == AUDIO_FIELD {
            form.filename = filename;
            form.audio = Some(read_field(&mut field, max_audio_bytes, "Audio file").await?);
        } else if TEXT_FIELDS.contains(&field_name.as_str()) {
            let bytes = read_field(&mut field, MAX_TEXT_FIELD_BYTES, &field_name).await?;
            let value = String::from_utf8(bytes).map_err(|_| {
                AppError::InvalidRequest(format!("Field '{}' is not valid UTF-8", field_name))
            })?;
            form.fields.insert(field_name, value);
        } else {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::InvalidRequest(format!("Chunk error: {}", e)))?;
            }
        }
    }

    Ok(form)
}

async fn read_field(field: &mut Field, limit: usize, label: &str) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::InvalidRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::InvalidRequest(format!(
                "{} too large (max: {} bytes)",
                label, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

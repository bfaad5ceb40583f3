use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    bridge::Args,
    broker::{CallContext, CallKind},
    error::PLATFORM_FAILURE,
    ids::RequestId,
    shaper::package_artifact,
};

const AUDIO_FORMAT: &str = "wav";
const BASENAME_PREFIX: &str = "tts_";

/// Synthesizes speech. The backend writes audio to a request-scoped file
/// which is returned base64-encoded and then deleted.
pub struct TextToSpeech;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextToSpeechRequest {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextToSpeechResponse {
    pub payload: String,
    pub basename: String,
    pub encoding: String,
    pub error: String,
}

impl CallKind for TextToSpeech {
    type Request = TextToSpeechRequest;
    type Response = TextToSpeechResponse;

    fn name(&self) -> &'static str {
        "text_to_speech"
    }

    fn artifact(&self, id: &RequestId, cache_root: &Path) -> Option<PathBuf> {
        Some(cache_root.join(format!("{BASENAME_PREFIX}{id}.{AUDIO_FORMAT}")))
    }

    fn args(&self, request: TextToSpeechRequest, ctx: &CallContext) -> Args {
        let mut args = Args::new();
        args.insert("text".into(), Value::String(request.text));
        args.insert("language".into(), Value::String(request.language));
        args.insert(
            "audio_output".into(),
            Value::String(
                ctx.artifact
                    .as_deref()
                    .map(|path| path.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ),
        );
        args
    }

    fn shape(&self, _payload: &Value, ctx: &CallContext) -> TextToSpeechResponse {
        let Some(path) = ctx.artifact.as_deref() else {
            return self.failure(PLATFORM_FAILURE);
        };

        match package_artifact(path) {
            Ok(artifact) => TextToSpeechResponse {
                payload: artifact.payload,
                basename: artifact.basename,
                encoding: artifact.encoding,
                error: String::new(),
            },
            Err(error) => {
                tracing::warn!(path = %path.display(), "tts artifact unavailable: {error}");
                self.failure(PLATFORM_FAILURE)
            }
        }
    }

    fn failure(&self, message: &str) -> TextToSpeechResponse {
        TextToSpeechResponse {
            error: message.to_string(),
            ..Default::default()
        }
    }
}

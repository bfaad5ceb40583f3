use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    bridge::Args,
    broker::{CallContext, CallKind},
    shaper::string_list,
};

/// Batch speech recognition over an uploaded recording.
pub struct SpeechRecognitionSphinx4;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechRequest {
    pub file_uri: String,
    pub language: String,
    pub audio_source: String,
    pub user: String,
    pub words: Vec<String>,
    pub sentences: Vec<String>,
    pub grammar: Vec<String>,
}

impl Default for SpeechRequest {
    fn default() -> Self {
        Self {
            file_uri: String::new(),
            language: "en".to_string(),
            audio_source: "nao_wav_1_ch".to_string(),
            user: String::new(),
            words: Vec::new(),
            sentences: Vec::new(),
            grammar: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpeechResponse {
    pub words: Vec<String>,
    pub error: String,
}

impl CallKind for SpeechRecognitionSphinx4 {
    type Request = SpeechRequest;
    type Response = SpeechResponse;

    fn name(&self) -> &'static str {
        "speech_recognition_sphinx4"
    }

    fn upload<'a>(&self, request: &'a SpeechRequest) -> Option<&'a str> {
        Some(request.file_uri.as_str())
    }

    fn args(&self, request: SpeechRequest, ctx: &CallContext) -> Args {
        let path = ctx
            .upload
            .as_deref()
            .map(|path| path.to_string_lossy().to_string())
            .unwrap_or_default();

        match json!({
            "path": path,
            "audio_source": request.audio_source,
            "language": request.language,
            "user": request.user,
            "words": request.words,
            "sentences": request.sentences,
            "grammar": request.grammar,
        }) {
            Value::Object(map) => map,
            _ => Args::new(),
        }
    }

    fn shape(&self, payload: &Value, _ctx: &CallContext) -> SpeechResponse {
        SpeechResponse {
            words: string_list(payload, "words"),
            error: String::new(),
        }
    }

    fn failure(&self, message: &str) -> SpeechResponse {
        SpeechResponse {
            error: message.to_string(),
            ..Default::default()
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    bridge::Args,
    broker::{CallContext, CallKind},
    shaper::{number_field, string_field},
};

/// Request body shared by the image services.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageRequest {
    /// Host-stored upload; must live under the server cache directory.
    pub file_uri: String,
}

fn image_args(ctx: &CallContext) -> Args {
    let mut args = Args::new();
    args.insert(
        "imageFilename".into(),
        Value::String(
            ctx.upload
                .as_deref()
                .map(|path| path.to_string_lossy().to_string())
                .unwrap_or_default(),
        ),
    );
    args
}

pub struct ObjectRecognitionCaffe;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectRecognitionResponse {
    pub object_class: String,
    pub error: String,
}

impl CallKind for ObjectRecognitionCaffe {
    type Request = ImageRequest;
    type Response = ObjectRecognitionResponse;

    fn name(&self) -> &'static str {
        "object_recognition_caffe"
    }

    fn upload<'a>(&self, request: &'a ImageRequest) -> Option<&'a str> {
        Some(request.file_uri.as_str())
    }

    fn args(&self, _request: ImageRequest, ctx: &CallContext) -> Args {
        image_args(ctx)
    }

    fn shape(&self, payload: &Value, _ctx: &CallContext) -> ObjectRecognitionResponse {
        ObjectRecognitionResponse {
            object_class: string_field(payload, "objectClass"),
            error: String::new(),
        }
    }

    fn failure(&self, message: &str) -> ObjectRecognitionResponse {
        ObjectRecognitionResponse {
            error: message.to_string(),
            ..Default::default()
        }
    }
}

pub struct HazardDetectionDoorCheck;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DoorCheckResponse {
    /// Estimated opening in degrees; zero when unknown.
    pub door_angle: f64,
    pub error: String,
}

impl CallKind for HazardDetectionDoorCheck {
    type Request = ImageRequest;
    type Response = DoorCheckResponse;

    fn name(&self) -> &'static str {
        "hazard_detection_door_check"
    }

    fn upload<'a>(&self, request: &'a ImageRequest) -> Option<&'a str> {
        Some(request.file_uri.as_str())
    }

    fn args(&self, _request: ImageRequest, ctx: &CallContext) -> Args {
        image_args(ctx)
    }

    fn shape(&self, payload: &Value, _ctx: &CallContext) -> DoorCheckResponse {
        DoorCheckResponse {
            door_angle: number_field(payload, "door_angle"),
            error: String::new(),
        }
    }

    fn failure(&self, message: &str) -> DoorCheckResponse {
        DoorCheckResponse {
            error: message.to_string(),
            ..Default::default()
        }
    }
}

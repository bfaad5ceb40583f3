use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    bridge::Args,
    broker::{CallContext, CallKind},
    shaper::{number_list, string_field, string_list, value_list},
};

fn object(value: Value) -> Args {
    match value {
        Value::Object(map) => map,
        _ => Args::new(),
    }
}

/// Selects a cognitive exercise for a user.
pub struct CognitiveTestChooser;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestChooserRequest {
    pub user: String,
    /// Empty lets the backend pick based on past performance.
    pub test_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestChooserResponse {
    pub lang: String,
    pub questions: Vec<String>,
    pub possib_ans: Vec<Vec<String>>,
    pub correct_ans: Vec<String>,
    pub test_instance: String,
    pub test_type: String,
    pub test_subtype: String,
    pub error: String,
}

impl CallKind for CognitiveTestChooser {
    type Request = TestChooserRequest;
    type Response = TestChooserResponse;

    fn name(&self) -> &'static str {
        "cognitive_test_chooser"
    }

    fn args(&self, request: TestChooserRequest, _ctx: &CallContext) -> Args {
        object(json!({
            "username": request.user,
            "testType": request.test_type,
        }))
    }

    fn shape(&self, payload: &Value, _ctx: &CallContext) -> TestChooserResponse {
        let possib_ans = payload
            .get("answers")
            .and_then(Value::as_array)
            .map(|answers| answers.iter().map(|entry| string_list(entry, "s")).collect())
            .unwrap_or_default();

        TestChooserResponse {
            lang: string_field(payload, "language"),
            questions: string_list(payload, "questions"),
            possib_ans,
            correct_ans: string_list(payload, "correctAnswers"),
            test_instance: string_field(payload, "test"),
            test_type: string_field(payload, "testType"),
            test_subtype: string_field(payload, "testSubType"),
            error: String::new(),
        }
    }

    fn failure(&self, message: &str) -> TestChooserResponse {
        TestChooserResponse {
            error: message.to_string(),
            ..Default::default()
        }
    }
}

/// Per-category scores for a user up to a point in time.
pub struct CognitiveGetScores;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoresRequest {
    pub user: String,
    pub up_to_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoresResponse {
    pub test_classes: Vec<String>,
    pub scores: Vec<f64>,
    pub error: String,
}

impl CallKind for CognitiveGetScores {
    type Request = ScoresRequest;
    type Response = ScoresResponse;

    fn name(&self) -> &'static str {
        "cognitive_get_scores"
    }

    fn args(&self, request: ScoresRequest, _ctx: &CallContext) -> Args {
        object(json!({
            "username": request.user,
            "upToTime": request.up_to_time,
        }))
    }

    fn shape(&self, payload: &Value, _ctx: &CallContext) -> ScoresResponse {
        ScoresResponse {
            test_classes: string_list(payload, "testCategories"),
            scores: number_list(payload, "testScores"),
            error: String::new(),
        }
    }

    fn failure(&self, message: &str) -> ScoresResponse {
        ScoresResponse {
            error: message.to_string(),
            ..Default::default()
        }
    }
}

/// Exercise history for a user within a time range.
pub struct CognitiveGetHistory;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryRequest {
    pub user: String,
    pub from_time: i64,
    pub to_time: i64,
    pub test_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryResponse {
    pub records: Vec<Value>,
    pub error: String,
}

impl CallKind for CognitiveGetHistory {
    type Request = HistoryRequest;
    type Response = HistoryResponse;

    fn name(&self) -> &'static str {
        "cognitive_get_history"
    }

    fn args(&self, request: HistoryRequest, _ctx: &CallContext) -> Args {
        object(json!({
            "username": request.user,
            "fromTime": request.from_time,
            "toTime": request.to_time,
            "testType": request.test_type,
        }))
    }

    fn shape(&self, payload: &Value, _ctx: &CallContext) -> HistoryResponse {
        HistoryResponse {
            records: value_list(payload, "records"),
            error: String::new(),
        }
    }

    fn failure(&self, message: &str) -> HistoryResponse {
        HistoryResponse {
            error: message.to_string(),
            ..Default::default()
        }
    }
}

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::core::{BatchFailure, BatchRequestError, ObjectError, Result};
use crate::transport::Method;

/// One item of a batch call. `path` is relative to the API root, e.g.
/// `/classes/Post`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRequest {
    pub method: Method,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

impl BatchRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }
}

/// Result of one batch item: the `success` payload or the item's failure.
pub type BatchOutcome = std::result::Result<JsonValue, BatchFailure>;

/// Pair each response item with the request at the same position.
pub(crate) fn parse_batch_response(wire_requests: &[JsonValue], response: JsonValue) -> Result<Vec<BatchOutcome>> {
    let JsonValue::Array(items) = response else {
        return Err(ObjectError::Decode(format!(
            "Batch response must be an array, got {}",
            response
        )));
    };
    if items.len() != wire_requests.len() {
        return Err(ObjectError::Decode(format!(
            "Batch response has {} items for {} requests",
            items.len(),
            wire_requests.len()
        )));
    }

    items
        .into_iter()
        .zip(wire_requests)
        .enumerate()
        .map(|(index, (mut item, request))| {
            if let Some(success) = item.get_mut("success") {
                return Ok(Ok(success.take()));
            }
            match item.get("error") {
                Some(error) => Ok(Err(BatchFailure {
                    index,
                    code: error.get("code").and_then(JsonValue::as_i64).unwrap_or(-1),
                    message: error
                        .get("error")
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    request: request.clone(),
                })),
                None => Err(ObjectError::Decode(format!(
                    "Batch item {} has neither success nor error: {}",
                    index, item
                ))),
            }
        })
        .collect()
}

/// Split outcomes, folding every failure into one aggregated error.
pub(crate) fn collect_failures(outcomes: &[BatchOutcome]) -> Option<BatchRequestError> {
    let mut error = BatchRequestError::new();
    for failure in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        error.push(failure.clone());
    }
    (!error.is_empty()).then_some(error)
}

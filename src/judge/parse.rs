//! Schema validation of judge replies
//!
//! Models often wrap the JSON object in prose or code fences, so the object
//! is taken from the first `{` to the last `}` before parsing.

use crate::error::JudgeError;
use crate::types::{Characterization, Judgment, Outcome};
use serde_json::{Map, Value};

fn excerpt(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Parse the JSON object embedded in `text`
pub fn extract_object(text: &str) -> Result<Map<String, Value>, JudgeError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(JudgeError::MalformedResponse(format!(
                "no JSON object in reply: {}",
                excerpt(text)
            )))
        }
    };

    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(JudgeError::MalformedResponse("reply is not a JSON object".to_string())),
        Err(e) => Err(JudgeError::MalformedResponse(format!("invalid JSON: {}", e))),
    }
}

fn string_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
}

fn parse_choice(raw: &str) -> Option<Outcome> {
    match raw.to_ascii_lowercase().as_str() {
        "a" => Some(Outcome::AWins),
        "b" => Some(Outcome::BWins),
        "tie" => Some(Outcome::Tie),
        other => Outcome::parse(other),
    }
}

/// `{"choice": "A"|"B"|"TIE", "rationale": ...}`; `outcome`/`reasoning` are
/// accepted as aliases. An unrecognised choice is malformed, never a tie.
pub fn parse_judgment(text: &str) -> Result<Judgment, JudgeError> {
    let map = extract_object(text)?;

    let raw_choice = string_field(&map, &["choice", "outcome"])
        .ok_or_else(|| JudgeError::MalformedResponse("missing \"choice\" field".to_string()))?;
    let outcome = parse_choice(raw_choice).ok_or_else(|| {
        JudgeError::MalformedResponse(format!("unrecognised choice {:?}", raw_choice))
    })?;

    let rationale = string_field(&map, &["rationale", "reasoning"])
        .unwrap_or_default()
        .to_string();

    Ok(Judgment { outcome, rationale })
}

pub fn parse_characterization(text: &str) -> Result<Characterization, JudgeError> {
    let map = extract_object(text)?;
    let field = |name: &str| -> Result<String, JudgeError> {
        match string_field(&map, &[name]) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(JudgeError::MalformedResponse(format!(
                "missing characterization field \"{}\"",
                name
            ))),
        }
    };

    Ok(Characterization {
        topic: field("topic")?,
        style: field("style")?,
        depth: field("depth")?,
        emotion: field("emotion")?,
        level: field("level")?,
    })
}

/// New criteria text from `new_criteria` (or `new_prompt`)
pub fn parse_refinement(text: &str) -> Result<String, JudgeError> {
    let map = extract_object(text)?;
    string_field(&map, &["new_criteria", "new_prompt"])
        .map(str::to_string)
        .ok_or_else(|| JudgeError::MalformedResponse("missing \"new_criteria\" field".to_string()))
}

//! Pull the JSON object out of a model response and check its shape.
//!
//! The candidate payload is the inclusive span from the first `{` to the
//! last `}`. Prose the model adds before or after is ignored.

use serde_json::{Map, Value};

use crate::error::ValidationError;

pub const REQUIRED_FIELDS: [&str; 3] = ["image_type", "title", "description"];

/// Parse the embedded object and require [`REQUIRED_FIELDS`]. Optional keys
/// pass through untouched.
pub fn extract_and_validate(raw: &str) -> Result<Map<String, Value>, ValidationError> {
    let (start, end) = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => return Err(ValidationError::NoJsonFound),
    };

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|e| ValidationError::Parse(e.to_string()))?;

    let object = match value {
        Value::Object(map) => map,
        _ => return Err(ValidationError::Parse("payload is not a JSON object".into())),
    };

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !object.contains_key(**field))
        .map(|field| field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }

    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrounding_noise_is_ignored() {
        let raw = r#"noise {"image_type":"chart","title":"t","description":"d"} trailing"#;
        let obj = extract_and_validate(raw).unwrap();
        assert_eq!(obj["image_type"], "chart");
        assert_eq!(obj["title"], "t");
        assert_eq!(obj["description"], "d");
    }

    #[test]
    fn no_braces_is_no_json() {
        assert_eq!(
            extract_and_validate("the model refused"),
            Err(ValidationError::NoJsonFound)
        );
        assert_eq!(extract_and_validate("} backwards {"), Err(ValidationError::NoJsonFound));
    }

    #[test]
    fn missing_title_is_reported_alone() {
        let raw = r#"{"image_type":"chart","description":"d"}"#;
        assert_eq!(
            extract_and_validate(raw),
            Err(ValidationError::MissingFields(vec!["title".to_string()]))
        );
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let raw = r#"{"image_type": "chart", "title": }"#;
        assert!(matches!(extract_and_validate(raw), Err(ValidationError::Parse(_))));
    }

    #[test]
    fn optional_fields_pass_through() {
        let raw = r#"{"image_type":"graph","title":"t","description":"d","x-axis":"year","labels":["a","b"]}"#;
        let obj = extract_and_validate(raw).unwrap();
        assert_eq!(obj["x-axis"], "year");
        assert_eq!(obj["labels"][1], "b");
    }
}

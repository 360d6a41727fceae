use serde_json::{Map, Value};
use tracing::debug;

use crate::core::{AnalysisModes, Category, Finding, Severity};
use crate::error::AiError;

// fenced block first, then the outermost braces
pub fn extract_json(raw: &str) -> Result<Value, AiError> {
    if let Some(inner) = fenced_block(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Ok(value);
        }
    }

    let Some((start, end)) = object_bounds(raw) else {
        return Err(AiError::malformed("no JSON object found in response"));
    };
    serde_json::from_str::<Value>(&raw[start..=end])
        .map_err(|err| AiError::malformed(format!("invalid JSON: {err}")))
}

fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let body = match after.find('\n') {
        Some(nl) if is_language_tag(&after[..nl]) => &after[nl + 1..],
        _ => after,
    };
    Some(match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    })
}

fn is_language_tag(s: &str) -> bool {
    s.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn object_bounds(raw: &str) -> Option<(usize, usize)> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some((start, end))
}

/// Parses a reply into findings for `resource_id`, rejecting anything that does not match
/// `{ resource?: string, issues: [{ issue, recommendation, severity, category }] }`.
/// Issues outside the requested modes are dropped.
pub fn parse_findings(
    raw: &str,
    resource_id: &str,
    modes: &AnalysisModes,
) -> Result<Vec<Finding>, AiError> {
    let value = extract_json(raw)?;
    let Value::Object(root) = value else {
        return Err(AiError::malformed("top-level JSON is not an object"));
    };

    match root.get("resource") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => return Err(AiError::malformed("`resource` is not a string")),
    }
    let issues = match root.get("issues") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(AiError::malformed("`issues` is not a list")),
        None => return Err(AiError::malformed("missing `issues`")),
    };

    let mut out = Vec::with_capacity(issues.len());
    for (i, item) in issues.iter().enumerate() {
        let Value::Object(item) = item else {
            return Err(AiError::malformed(format!("issues[{i}] is not an object")));
        };
        let issue = required_str(item, "issue", i)?;
        let recommendation = required_str(item, "recommendation", i)?;
        let severity = required_str(item, "severity", i)?
            .parse::<Severity>()
            .map_err(|e| AiError::malformed(format!("issues[{i}]: {e}")))?;
        let category = required_str(item, "category", i)?
            .parse::<Category>()
            .map_err(|e| AiError::malformed(format!("issues[{i}]: {e}")))?;

        if !modes.contains(category) {
            debug!(resource = resource_id, %category, "dropping finding outside requested modes");
            continue;
        }
        out.push(Finding::ai(
            resource_id,
            issue,
            recommendation,
            severity,
            category,
        ));
    }
    Ok(out)
}

fn required_str<'a>(item: &'a Map<String, Value>, field: &str, i: usize) -> Result<&'a str, AiError> {
    match item.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(AiError::malformed(format!("issues[{i}].{field} is empty"))),
        Some(_) => Err(AiError::malformed(format!("issues[{i}].{field} is not a string"))),
        None => Err(AiError::malformed(format!("issues[{i}].{field} is missing"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_json() {
        let v = extract_json("```json\n{\"a\":1}\n```").expect("parse");
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn parses_fence_without_language_tag() {
        let v = extract_json("Here you go:\n```\n{\"a\":1}\n```\nDone.").expect("parse");
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn parses_json_surrounded_by_prose() {
        let v = extract_json("Sure! {\"a\":1} Hope that helps").expect("parse");
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn parses_pure_json() {
        let v = extract_json("  {\"a\":{\"b\":[1,2]}}\n").expect("parse");
        assert_eq!(v, json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn falls_back_to_braces_when_fence_is_not_json() {
        let raw = "```text\nnot json\n``` but then {\"a\":1}";
        assert_eq!(extract_json(raw).expect("parse"), json!({"a": 1}));
    }

    #[test]
    fn rejects_text_without_json() {
        let err = extract_json("not json at all").expect_err("should fail");
        assert!(err.is_malformed());
    }

    #[test]
    fn rejects_unbalanced_braces() {
        assert!(extract_json("oops { \"a\": 1").expect_err("fail").is_malformed());
        assert!(extract_json("} backwards {").expect_err("fail").is_malformed());
    }

    #[test]
    fn parse_findings_builds_ai_findings() {
        let raw = r#"```json
{"resource":"Bucket","issues":[
  {"issue":"No object lock","recommendation":"Enable object lock","severity":"medium","category":"Compliance"},
  {"issue":"Oversized","recommendation":"Shrink","severity":"Low","category":"Cost Optimization"}
]}
```"#;
        let modes = AnalysisModes::new([Category::Compliance]);
        let findings = parse_findings(raw, "Bucket", &modes).expect("parse");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].source, crate::core::FindingSource::Ai);
        assert_eq!(findings[0].resource, "Bucket");
    }

    #[test]
    fn parse_findings_accepts_empty_issue_list() {
        let findings =
            parse_findings(r#"{"resource":"Q","issues":[]}"#, "Q", &AnalysisModes::default())
                .expect("parse");
        assert!(findings.is_empty());
    }

    #[test]
    fn parse_findings_rejects_schema_drift() {
        let modes = AnalysisModes::default();
        for raw in [
            r#"{"resource":"Q"}"#,
            r#"{"resource":"Q","issues":"none"}"#,
            r#"{"resource":7,"issues":[]}"#,
            r#"{"issues":[{"issue":"x","recommendation":"y","severity":"Severe","category":"Security"}]}"#,
            r#"{"issues":[{"issue":"x","recommendation":"y","severity":"Low","category":"Performance"}]}"#,
            r#"{"issues":[{"issue":"x","severity":"Low","category":"Security"}]}"#,
            r#"{"issues":[{"issue":"","recommendation":"y","severity":"Low","category":"Security"}]}"#,
            r#"{"issues":["x"]}"#,
        ] {
            let err = parse_findings(raw, "Q", &modes).expect_err(raw);
            assert!(err.is_malformed(), "{raw}: {err}");
        }
    }
}

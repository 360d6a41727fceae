use crate::core::{AnalysisModes, Resource, Severity};

pub const TRUNCATION_MARKER: &str = "... [truncated";

/// Pretty JSON of the declaration, cut to `max_chars` characters with a trailing marker.
pub fn serialize_declaration(resource: &Resource, max_chars: usize) -> String {
    let full = serde_json::to_string_pretty(&resource.declaration())
        .unwrap_or_else(|_| "{}".to_string());
    let total = full.chars().count();
    if total <= max_chars {
        return full;
    }

    let mut out: String = full.chars().take(max_chars).collect();
    out.push('\n');
    out.push_str(TRUNCATION_MARKER);
    out.push_str(&format!(" {} more characters]", total - max_chars));
    out
}

pub fn build_prompt(resource: &Resource, modes: &AnalysisModes, max_chars: usize) -> String {
    let categories: Vec<&str> = modes.categories().iter().map(|c| c.as_str()).collect();
    let severities: Vec<&str> = Severity::ALL.iter().map(|s| s.as_str()).collect();
    let declaration = serialize_declaration(resource, max_chars);

    format!(
        "You are an expert AWS infrastructure reviewer. Review one resource from a synthesized \
CloudFormation template for concrete problems.\n\n\
Resource ID: {id}\n\
Resource Type: {ty}\n\
Declaration:\n{declaration}\n\n\
Analyze the resource for: {focus}.\n\n\
Focus on:\n\
- Settings that are present but weak, and protections that are missing entirely\n\
- Cost drivers that are oversized or billed while idle\n\
- Retention, logging and recovery settings that auditors expect\n\n\
Do NOT:\n\
- Speculate about resources that are not shown\n\
- Give generic advice that does not follow from the declaration\n\
- Report the same problem twice\n\n\
Output ONLY a JSON object, no markdown code fences and no text before or after it. Shape:\n\
{{\"resource\":\"{id}\",\"issues\":[{{\"issue\":\"<problem>\",\"recommendation\":\"<concrete fix>\",\
\"severity\":\"<severity>\",\"category\":\"<category>\"}}]}}\n\
\"category\" must be exactly one of: {categories}.\n\
\"severity\" must be exactly one of: {severities}.\n\
If nothing is wrong, output {{\"resource\":\"{id}\",\"issues\":[]}}.",
        id = resource.id,
        ty = resource.resource_type,
        declaration = declaration,
        focus = categories.join(", "),
        categories = categories.join(", "),
        severities = severities.join(", "),
    )
}

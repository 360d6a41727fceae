use crate::core::{Category, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSource {
    Rule,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub resource: String,
    pub issue: String,
    pub recommendation: String,
    pub severity: Severity,
    pub category: Category,
    pub source: FindingSource,
}

impl Finding {
    pub fn rule(
        resource: impl Into<String>,
        issue: impl Into<String>,
        recommendation: impl Into<String>,
        severity: Severity,
        category: Category,
    ) -> Self {
        Self {
            resource: resource.into(),
            issue: issue.into(),
            recommendation: recommendation.into(),
            severity,
            category,
            source: FindingSource::Rule,
        }
    }

    pub fn ai(
        resource: impl Into<String>,
        issue: impl Into<String>,
        recommendation: impl Into<String>,
        severity: Severity,
        category: Category,
    ) -> Self {
        Self {
            source: FindingSource::Ai,
            ..Self::rule(resource, issue, recommendation, severity, category)
        }
    }

    pub fn identity(&self) -> (String, String) {
        (
            self.resource.clone(),
            self.issue.trim().to_lowercase(),
        )
    }
}

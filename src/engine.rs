use std::collections::HashSet;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use crate::ai::{AiAnalyzer, AiPass};
use crate::cache::FindingStore;
use crate::core::{
    AnalysisReport, Category, Finding, FindingSource, ReportStatus, Resource, ResourceFindings,
    Template, TokenUsage,
};
use crate::rules::{RuleEvaluator, RuleGroup};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    set: Option<GlobSet>,
}

impl ResourceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::all());
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid resource pattern: {pattern}"))?;
            builder.add(glob);
        }
        let set = builder.build().context("failed to build resource filter")?;
        Ok(Self { set: Some(set) })
    }

    pub fn is_all(&self) -> bool {
        self.set.is_none()
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        match &self.set {
            None => true,
            Some(set) => set.is_match(&resource.id) || set.is_match(&resource.resource_type),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub rule_groups: Vec<RuleGroup>,
}

pub struct Engine {
    evaluator: RuleEvaluator,
    ai: Option<AiAnalyzer>,
    index: Option<Box<dyn FindingStore>>,
    notes: Vec<String>,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Self {
        Self {
            evaluator: RuleEvaluator::new(&opts.rule_groups),
            ai: None,
            index: None,
            notes: Vec::new(),
        }
    }

    pub fn with_ai(mut self, ai: AiAnalyzer) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_index(mut self, store: Box<dyn FindingStore>) -> Self {
        self.index = Some(store);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub async fn analyze(&self, template: &Template, filter: &ResourceFilter) -> AnalysisReport {
        let selected: Vec<&Resource> = template
            .resources()
            .iter()
            .filter(|r| filter.matches(r))
            .collect();
        info!(
            total = template.len(),
            selected = selected.len(),
            rules = self.evaluator.rules().len(),
            "analyzing template"
        );

        let rule_findings: Vec<Vec<Finding>> = selected
            .iter()
            .map(|r| self.evaluator.evaluate_resource(r))
            .collect();

        let ai_pass = match &self.ai {
            Some(ai) => ai.analyze_all(&selected).await,
            None => AiPass::default(),
        };

        let mut notes = self.notes.clone();
        if !filter.is_all() {
            notes.push(format!(
                "Analyzed {} of {} resources matching the resource filter.",
                selected.len(),
                template.len()
            ));
        }
        notes.extend(ai_pass.notes);

        let mut ai_findings = ai_pass.findings.into_iter();
        let mut resources = Vec::new();
        for (resource, from_rules) in selected.iter().zip(rule_findings) {
            let from_ai = ai_findings.next().unwrap_or_default();
            let findings = merge_findings(from_rules, from_ai);
            if findings.is_empty() {
                continue;
            }
            resources.push(ResourceFindings {
                resource: resource.id.clone(),
                resource_type: resource.resource_type.clone(),
                findings,
            });
        }

        let report = build_report(resources, notes, ai_pass.token_usage);
        debug!(status = ?report.status, issues = report.issues.len(), "report assembled");

        if let Some(store) = &self.index {
            let all: Vec<Finding> = report.findings().cloned().collect();
            if !all.is_empty() {
                if let Err(err) = store.bulk_index(&all) {
                    warn!(error = %err, "finding index update failed");
                }
            }
        }
        report
    }
}

// rule findings first; a later duplicate (resource, issue) is dropped
pub fn merge_findings(from_rules: Vec<Finding>, from_ai: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    from_rules
        .into_iter()
        .chain(from_ai)
        .filter(|f| seen.insert(f.identity()))
        .collect()
}

/// Only rule findings outside Cost Optimization fail a run.
pub fn status_for(resources: &[ResourceFindings]) -> ReportStatus {
    let failing = resources.iter().flat_map(|r| r.findings.iter()).any(|f| {
        f.source == FindingSource::Rule && f.category != Category::CostOptimization
    });
    if failing {
        ReportStatus::Failed
    } else {
        ReportStatus::Passed
    }
}

pub fn build_report(
    resources: Vec<ResourceFindings>,
    mut notes: Vec<String>,
    token_usage: Option<TokenUsage>,
) -> AnalysisReport {
    let mut issues = Vec::new();
    let mut optimizations = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();
    let mut seen_recommendations = HashSet::new();

    for finding in resources.iter().flat_map(|r| r.findings.iter()) {
        let line = format!(
            "[{}] {}: {}",
            finding.severity, finding.resource, finding.issue
        );
        if finding.category == Category::CostOptimization {
            optimizations.push(line);
        } else {
            issues.push(line);
        }
        let rec = format!("{}: {}", finding.resource, finding.recommendation);
        if seen_recommendations.insert(rec.clone()) {
            recommendations.push(rec);
        }
    }

    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    notes.sort();
    notes.dedup();

    AnalysisReport {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp,
        status: status_for(&resources),
        issues,
        optimizations,
        recommendations,
        resources,
        notes,
        token_usage,
    }
}

use infralens::core::{
    AnalysisReport, Category, Finding, ReportStatus, ResourceFindings, Severity, TokenUsage,
};

fn golden_report() -> AnalysisReport {
    let encryption = Finding::rule(
        "DataBucket",
        "S3 bucket has no server-side encryption configured",
        "Add BucketEncryption with SSE-S3 or SSE-KMS",
        Severity::High,
        Category::Security,
    );
    let memory = Finding::rule(
        "Handler",
        "Lambda function is configured with 2048 MB of memory",
        "Lower MemorySize to match observed usage",
        Severity::Medium,
        Category::CostOptimization,
    );
    let dlq = Finding::ai(
        "Handler",
        "Function has no dead-letter queue",
        "Configure DeadLetterConfig",
        Severity::Low,
        Category::OperationalExcellence,
    );

    AnalysisReport {
        schema_version: "1.0".to_string(),
        tool_version: "0.1.0".to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        status: ReportStatus::Failed,
        issues: vec![
            "[High] DataBucket: S3 bucket has no server-side encryption configured".to_string(),
            "[Low] Handler: Function has no dead-letter queue".to_string(),
        ],
        optimizations: vec![
            "[Medium] Handler: Lambda function is configured with 2048 MB of memory".to_string(),
        ],
        recommendations: vec![
            "DataBucket: Add BucketEncryption with SSE-S3 or SSE-KMS".to_string(),
            "Handler: Lower MemorySize to match observed usage".to_string(),
            "Handler: Configure DeadLetterConfig".to_string(),
        ],
        resources: vec![
            ResourceFindings {
                resource: "DataBucket".to_string(),
                resource_type: "AWS::S3::Bucket".to_string(),
                findings: vec![encryption],
            },
            ResourceFindings {
                resource: "Handler".to_string(),
                resource_type: "AWS::Lambda::Function".to_string(),
                findings: vec![memory, dlq],
            },
        ],
        notes: vec!["note-1".to_string()],
        token_usage: Some(TokenUsage {
            input_tokens: 812,
            output_tokens: 44,
            estimated_cost: 0.5,
        }),
    }
}

#[test]
fn report_json_matches_golden() {
    let actual = serde_json::to_value(golden_report()).expect("serialize report");
    let expected: serde_json::Value =
        serde_json::from_str(include_str!("golden/report.json")).expect("parse golden json");

    assert_eq!(actual, expected);
}

#[test]
fn report_json_round_trips_and_omits_absent_token_usage() {
    let parsed: AnalysisReport =
        serde_json::from_str(include_str!("golden/report.json")).expect("deserialize golden");
    assert_eq!(parsed, golden_report());

    let mut report = golden_report();
    report.token_usage = None;
    let v = serde_json::to_value(&report).expect("serialize report");
    assert!(v.get("tokenUsage").is_none());
}

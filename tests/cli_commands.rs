use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn infralens_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_infralens"));
    cmd.env("HOME", home);
    cmd.env_remove("RUST_LOG");
    cmd.env_remove("GEMINI_API_KEY");
    cmd.env_remove("INFRALENS_CONFIG");
    cmd.env_remove("INFRALENS_AI_ENABLED");
    cmd.env_remove("INFRALENS_AI_MODEL");
    cmd.env_remove("INFRALENS_AI_MAX_CONCURRENCY");
    cmd.env_remove("INFRALENS_AI_MODES");
    cmd.env_remove("INFRALENS_RULES_GROUPS");
    cmd.env_remove("INFRALENS_CACHE_PERSISTENT");
    cmd.env_remove("INFRALENS_UI_COLOR");
    cmd.env_remove("INFRALENS_UI_MAX_TABLE_ROWS");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    infralens_cmd(home).args(args).output().expect("run infralens")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("infralens-cli-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

const TEMPLATE: &[u8] = br#"{
  "Resources": {
    "DataBucket": {"Type": "AWS::S3::Bucket"},
    "Egress": {"Type": "AWS::EC2::NatGateway", "Properties": {"SubnetId": "subnet-1"}}
  }
}"#;

const INDEX: &str = r#"{"resource":"DataBucket","issue":"S3 bucket has no server-side encryption configured","recommendation":"Add BucketEncryption","severity":"High","category":"Security","source":"rule"}
{"resource":"Handler","issue":"Lambda function is configured with 2048 MB of memory","recommendation":"Lower MemorySize","severity":"Medium","category":"Cost Optimization","source":"rule"}
{"resource":"LogsBucket","issue":"S3 bucket has no server-side encryption configured","recommendation":"Add BucketEncryption","severity":"High","category":"Security","source":"ai"}
{"resource":"DataBucket","issue":"S3 bucket has no server-side encryption configured","recommendation":"Add BucketEncryption","severity":"High","category":"Security","source":"rule"}
{"resource":"Trunc
"#;

#[test]
fn rules_lists_the_catalog() {
    let home = make_temp_home();
    let out = run(&home, &["rules", "--json"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    let rules = v.as_array().expect("array");
    assert_eq!(rules.len(), 26);
    assert_eq!(rules[0]["id"], "s3-versioning");
    assert_eq!(rules[0]["resourceTypes"], serde_json::json!(["AWS::S3::Bucket"]));

    let out = run(&home, &["rules", "--json", "--group", "kms"]);
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    let ids: Vec<&str> = v
        .as_array()
        .expect("array")
        .iter()
        .map(|r| r["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["kms-rotation"]);

    let out = run(&home, &["rules"]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("ID"), "stdout={stdout}");
    assert!(stdout.contains("nat-gateway-cost"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn search_reads_the_finding_index() {
    let home = make_temp_home();
    write_file(&home.join(".cache/infralens/index.jsonl"), INDEX.as_bytes());

    let out = run(&home, &["search", "encryption", "--json"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    let found = v.as_array().expect("array");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0]["resource"], "DataBucket");
    assert_eq!(found[1]["resource"], "LogsBucket");

    let out = run(&home, &["search", "ENCRYPTION", "--json", "--limit", "1"]);
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v.as_array().expect("array").len(), 1);

    let out = run(&home, &["search", "cost optimization"]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Matches for `cost optimization` (1):"), "stdout={stdout}");
    assert!(stdout.contains("Handler"));

    let out = run(&home, &["search", "nothing-like-this"]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("No indexed findings match"), "stdout={stdout}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn analyze_records_rule_findings_for_search() {
    let home = make_temp_home();
    let template = home.join("a.template.json");
    write_file(
        &template,
        br#"{"Resources": {"Assets": {"Type": "AWS::S3::Bucket"}}}"#,
    );

    for extra in [&["--no-ai"][..], &[][..]] {
        let mut args = vec!["analyze", "--json", "--template", template.to_str().unwrap()];
        args.extend_from_slice(extra);
        let out = run(&home, &args);
        assert_eq!(out.status.code(), Some(1), "stderr={}", String::from_utf8_lossy(&out.stderr));
    }

    let out = run(&home, &["search", "versioning", "--json"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    let found = v.as_array().expect("array");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["resource"], "Assets");
    assert_eq!(found[0]["source"], "rule");

    let index = std::fs::read_to_string(home.join(".cache/infralens/index.jsonl")).expect("index");
    let versioning_lines = index.lines().filter(|l| l.contains("versioning")).count();
    assert_eq!(versioning_lines, 1);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn no_cache_runs_leave_no_index() {
    let home = make_temp_home();
    let template = home.join("a.template.json");
    write_file(
        &template,
        br#"{"Resources": {"Assets": {"Type": "AWS::S3::Bucket"}}}"#,
    );
    let out = run(
        &home,
        &["analyze", "--no-ai", "--no-cache", "--json", "--template", template.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(!home.join(".cache/infralens/index.jsonl").exists());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn search_without_index_is_empty() {
    let home = make_temp_home();
    let out = run(&home, &["search", "bucket", "--json"]);
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v, serde_json::json!([]));

    let out = run(&home, &["search", "  "]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_generates_a_script() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "bash"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("infralens"));

    let out = run(&home, &["completion", "tcsh"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn human_output_has_status_line() {
    let home = make_temp_home();
    let template = home.join("app.template.json");
    write_file(&template, TEMPLATE);

    let out = run(
        &home,
        &["analyze", "--no-ai", "--no-color", "--template", template.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("Status: failed"), "stdout={stdout}");
    assert!(stdout.contains("SEVERITY"));
    assert!(!stdout.contains("\x1b["));

    let out = run(
        &home,
        &["analyze", "--no-ai", "--quiet", "--template", template.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    let _ = std::fs::remove_dir_all(&home);
}

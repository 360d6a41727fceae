use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

fn base_cmd(home: &Path) -> Command {
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

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("infralens-env-test-{}-{seq}", std::process::id()));
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
    "Handler": {"Type": "AWS::Lambda::Function", "Properties": {"MemorySize": 4096}}
  }
}"#;

#[test]
fn env_overrides_config_file() {
    let home = make_temp_home();
    let template = home.join("app.template.json");
    write_file(&template, TEMPLATE);
    write_file(
        &home.join(".config/infralens/config.toml"),
        br#"
[rules]
groups = ["Lambda"]
"#,
    );

    let out = {
        let mut cmd = base_cmd(&home);
        cmd.env("INFRALENS_RULES_GROUPS", "S3");
        cmd.env("INFRALENS_AI_ENABLED", "false");
        cmd.args(["analyze", "--json", "--template", template.to_str().unwrap()]);
        cmd.output().expect("run infralens")
    };
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    let resources = v["resources"].as_array().expect("resources");
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["resource"], "DataBucket");
    assert_eq!(v["notes"][0], "AI analysis disabled.");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn env_values_show_in_effective_config() {
    let home = make_temp_home();
    let out = {
        let mut cmd = base_cmd(&home);
        cmd.env("INFRALENS_AI_MODEL", "gemini-1.5-pro");
        cmd.env("INFRALENS_AI_MODES", "security, risk");
        cmd.env("INFRALENS_AI_MAX_CONCURRENCY", "8");
        cmd.env("INFRALENS_CACHE_PERSISTENT", "off");
        cmd.env("INFRALENS_UI_MAX_TABLE_ROWS", "3");
        cmd.args(["config", "--show", "--json"]);
        cmd.output().expect("run infralens")
    };
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v["ai"]["model"], "gemini-1.5-pro");
    assert_eq!(
        v["ai"]["modes"],
        serde_json::json!(["Security", "Operational Excellence"])
    );
    assert_eq!(v["ai"]["max_concurrency"], 8);
    assert_eq!(v["cache"]["persistent"], false);
    assert_eq!(v["ui"]["max_table_rows"], 3);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_env_values_exit_two() {
    let home = make_temp_home();
    for (key, value) in [
        ("INFRALENS_UI_MAX_TABLE_ROWS", "many"),
        ("INFRALENS_AI_ENABLED", "perhaps"),
        ("INFRALENS_AI_MAX_CONCURRENCY", "64"),
        ("INFRALENS_RULES_GROUPS", "S3,Redshift"),
    ] {
        let out = {
            let mut cmd = base_cmd(&home);
            cmd.env(key, value);
            cmd.args(["config", "--show"]);
            cmd.output().expect("run infralens")
        };
        assert_eq!(out.status.code(), Some(2), "{key}={value}");
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(stderr.contains("error:"), "stderr={stderr}");
    }
    let _ = std::fs::remove_dir_all(&home);
}

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::CacheKey;
use crate::core::Finding;

pub trait FindingStore: Send + Sync {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<Finding>>>;
    fn save(&self, key: &CacheKey, findings: &[Finding]) -> Result<()>;
    fn bulk_index(&self, findings: &[Finding]) -> Result<()>;
    fn search(&self, query: &str) -> Result<Vec<Finding>>;
}

pub fn default_cache_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".cache/infralens")
}

// entries/<key>.json per cache entry plus an append-only index.jsonl
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join("entries")
            .join(format!("{}.json", key.file_stem()))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.jsonl")
    }

    fn read_index(&self) -> Result<Vec<String>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&path)
            .with_context(|| format!("failed to open index: {}", path.display()))?;
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("failed to read index: {}", path.display()))?;
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }

    fn indexed_lines(&self) -> Result<HashSet<String>> {
        Ok(self.read_index()?.into_iter().collect())
    }
}

impl FindingStore for JsonFileStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<Finding>>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read cache entry: {}", path.display()))?;
        let findings = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse cache entry: {}", path.display()))?;
        Ok(Some(findings))
    }

    fn save(&self, key: &CacheKey, findings: &[Finding]) -> Result<()> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(findings)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move cache entry into {}", path.display()))?;
        Ok(())
    }

    fn bulk_index(&self, findings: &[Finding]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.index_path();
        let mut seen = self.indexed_lines()?;

        let mut buf = Vec::new();
        for finding in findings {
            let line = serde_json::to_string(finding)?;
            if !seen.insert(line.clone()) {
                continue;
            }
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        if buf.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open index: {}", path.display()))?;
        file.write_all(&buf)
            .with_context(|| format!("failed to append to index: {}", path.display()))?;
        Ok(())
    }

    fn search(&self, query: &str) -> Result<Vec<Finding>> {
        let needle = query.trim().to_lowercase();
        let mut seen = HashSet::new();
        let mut out: Vec<Finding> = Vec::new();
        for line in self.read_index()? {
            // a torn trailing line from an interrupted run is skipped
            let Ok(finding) = serde_json::from_str::<Finding>(&line) else {
                continue;
            };
            if !matches_query(&finding, &needle) || !seen.insert(line) {
                continue;
            }
            out.push(finding);
        }
        Ok(out)
    }
}

fn matches_query(finding: &Finding, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    [
        finding.resource.as_str(),
        finding.issue.as_str(),
        finding.recommendation.as_str(),
        finding.category.as_str(),
        finding.severity.as_str(),
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(needle))
}

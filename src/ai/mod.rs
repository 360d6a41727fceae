use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, FindingCache};
use crate::core::{AnalysisModes, Finding, Resource, TokenUsage};
use crate::error::AiError;

mod client;
mod gemini;
mod parse;
mod prompt;

pub use client::{
    AiClient, Completion, GenerateRequest, Generation, GenerationConfig, RetryPolicy,
    TextGenerator,
};
pub use gemini::{DEFAULT_BASE_URL, GeminiBackend};
pub use parse::{extract_json, parse_findings};
pub use prompt::{TRUNCATION_MARKER, build_prompt, serialize_declaration};

#[cfg(test)]
pub(crate) use client::testing;

pub const DEFAULT_FALLBACK_MODELS: [&str; 4] = [
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-1.0-pro",
    "gemini-pro",
];

pub const MAX_CONCURRENCY: usize = 10;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: 0.075,
            output_per_million: 0.30,
        }
    }
}

impl Pricing {
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1_000_000.0 * self.input_per_million
            + output_tokens as f64 / 1_000_000.0 * self.output_per_million
    }
}

#[derive(Debug, Clone)]
pub struct AiOptions {
    pub model: Option<String>,
    pub fallback_models: Vec<String>,
    pub modes: AnalysisModes,
    pub max_prompt_chars: usize,
    pub max_concurrency: usize,
    pub pricing: Pricing,
    pub show_progress: bool,
}

impl Default for AiOptions {
    fn default() -> Self {
        Self {
            model: None,
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            modes: AnalysisModes::default(),
            max_prompt_chars: 4000,
            max_concurrency: 4,
            pricing: Pricing::default(),
            show_progress: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct UsageMeter {
    input: AtomicU64,
    output: AtomicU64,
    calls: AtomicU64,
}

impl UsageMeter {
    pub fn record(&self, input_tokens: u64, output_tokens: u64) {
        self.input.fetch_add(input_tokens, Ordering::Relaxed);
        self.output.fetch_add(output_tokens, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn usage(&self, pricing: &Pricing) -> TokenUsage {
        let input_tokens = self.input.load(Ordering::Relaxed);
        let output_tokens = self.output.load(Ordering::Relaxed);
        TokenUsage {
            input_tokens,
            output_tokens,
            estimated_cost: pricing.estimate(input_tokens, output_tokens),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AiPass {
    pub findings: Vec<Vec<Finding>>,
    pub token_usage: Option<TokenUsage>,
    pub notes: Vec<String>,
}

pub struct AiAnalyzer {
    client: AiClient,
    cache: Arc<FindingCache>,
    opts: AiOptions,
}

impl AiAnalyzer {
    pub fn new(client: AiClient, cache: Arc<FindingCache>, opts: AiOptions) -> Self {
        Self {
            client,
            cache,
            opts,
        }
    }

    pub fn modes(&self) -> &AnalysisModes {
        &self.opts.modes
    }

    pub async fn analyze_all(&self, resources: &[&Resource]) -> AiPass {
        let total = resources.len();
        if total == 0 {
            return AiPass::default();
        }

        let model = match self
            .client
            .select_model(self.opts.model.as_deref(), &self.opts.fallback_models)
            .await
        {
            Ok(model) => model,
            Err(err) => {
                warn!(error = %err, "AI analysis disabled for this run");
                return AiPass {
                    findings: vec![Vec::new(); total],
                    token_usage: None,
                    notes: vec![format!("AI analysis skipped: {err}")],
                };
            }
        };

        let concurrency = self.opts.max_concurrency.clamp(1, MAX_CONCURRENCY);
        info!(model = %model, resources = total, concurrency, "starting AI analysis");

        let meter = UsageMeter::default();
        let failures = AtomicUsize::new(0);
        let cache_hits = AtomicUsize::new(0);
        let pb = self.progress_bar(total);

        let findings: Vec<Vec<Finding>> = stream::iter(resources.iter().copied())
            .map(|resource| {
                let model = model.as_str();
                let meter = &meter;
                let failures = &failures;
                let cache_hits = &cache_hits;
                let pb = pb.as_ref();
                async move {
                    let out = match self.analyze_resource(resource, model, meter).await {
                        Ok((found, hit)) => {
                            if hit {
                                cache_hits.fetch_add(1, Ordering::Relaxed);
                            }
                            found
                        }
                        Err(err) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            warn!(resource = %resource.id, error = %err, "AI analysis failed; continuing without AI findings");
                            Vec::new()
                        }
                    };
                    if let Some(pb) = pb {
                        pb.inc(1);
                    }
                    out
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let failures = failures.into_inner();
        let cache_hits = cache_hits.into_inner();
        debug!(calls = meter.calls(), cache_hits, failures, "AI analysis finished");

        let mut notes = vec![format!("AI analysis used model {model}.")];
        if cache_hits > 0 {
            notes.push(format!(
                "AI findings for {cache_hits} of {total} resources were served from cache."
            ));
        }
        if failures > 0 {
            notes.push(format!(
                "AI analysis failed for {failures} of {total} resources; their AI findings are missing (see log)."
            ));
        }

        AiPass {
            findings,
            token_usage: Some(meter.usage(&self.opts.pricing)),
            notes,
        }
    }

    async fn analyze_resource(
        &self,
        resource: &Resource,
        model: &str,
        meter: &UsageMeter,
    ) -> Result<(Vec<Finding>, bool), AiError> {
        let modes = &self.opts.modes;
        let key = CacheKey::new(resource, modes);
        let lookup = self
            .cache
            .get_or_try_compute(&key, || async {
                let prompt = build_prompt(resource, modes, self.opts.max_prompt_chars);
                let completion = self.client.complete(model, &prompt).await?;
                meter.record(completion.input_tokens, completion.output_tokens);
                debug!(
                    resource = %resource.id,
                    attempts = completion.attempts,
                    input_tokens = completion.input_tokens,
                    output_tokens = completion.output_tokens,
                    "AI response received"
                );
                parse_findings(&completion.text, &resource.id, modes)
            })
            .await?;

        // entries are shared across ids with identical declarations
        let findings = lookup
            .findings
            .into_iter()
            .map(|f| Finding {
                resource: resource.id.clone(),
                ..f
            })
            .collect();
        Ok((findings, lookup.hit))
    }

    fn progress_bar(&self, total: usize) -> Option<indicatif::ProgressBar> {
        use std::io::IsTerminal;
        if !self.opts.show_progress || !std::io::stderr().is_terminal() {
            return None;
        }
        let pb = indicatif::ProgressBar::new(total as u64);
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        if let Ok(style) =
            indicatif::ProgressStyle::with_template("{spinner} AI analysis {pos}/{len} {wide_msg}")
        {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::core::{Category, FindingSource, Severity};
    use crate::error::TransportError;
    use serde_json::json;

    const REPLY: &str = r#"Here is my review:
```json
{"resource":"X","issues":[{"issue":"Queue has no dead-letter queue","recommendation":"Configure a RedrivePolicy","severity":"Medium","category":"Operational Excellence"}]}
```"#;

    fn queue(id: &str, retention: u64) -> Resource {
        Resource::new(id, "AWS::SQS::Queue")
            .with_properties(json!({"MessageRetentionPeriod": retention}))
    }

    fn analyzer(fake: Arc<FakeGenerator>, opts: AiOptions) -> AiAnalyzer {
        analyzer_with_cache(fake, Arc::new(FindingCache::in_memory()), opts)
    }

    fn analyzer_with_cache(
        fake: Arc<FakeGenerator>,
        cache: Arc<FindingCache>,
        opts: AiOptions,
    ) -> AiAnalyzer {
        let client = AiClient::new(fake).with_retry(RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        });
        AiAnalyzer::new(client, cache, opts)
    }

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "infralens-ai-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn findings_are_aligned_and_attributed() {
        let fake = Arc::new(FakeGenerator::replying(REPLY));
        let ai = analyzer(fake.clone(), AiOptions::default());
        let a = queue("A", 60);
        let b = queue("B", 120);

        let pass = ai.analyze_all(&[&a, &b]).await;
        assert_eq!(pass.findings.len(), 2);
        assert_eq!(pass.findings[0][0].resource, "A");
        assert_eq!(pass.findings[1][0].resource, "B");
        assert_eq!(pass.findings[0][0].source, FindingSource::Ai);
        assert_eq!(pass.findings[0][0].severity, Severity::Medium);

        let usage = pass.token_usage.expect("usage");
        assert_eq!(usage.input_tokens, 200);
        assert_eq!(usage.output_tokens, 40);
        assert!(usage.estimated_cost > 0.0);
    }

    #[tokio::test]
    async fn identical_declarations_call_the_service_once() {
        let fake = Arc::new(FakeGenerator::replying(REPLY));
        let ai = analyzer(fake.clone(), AiOptions::default());
        let a = queue("A", 60);
        let b = queue("B", 60);

        let pass = ai.analyze_all(&[&a, &b]).await;
        assert_eq!(fake.call_count(), 1);
        assert_eq!(pass.findings[1][0].resource, "B");

        ai.analyze_all(&[&a]).await;
        assert_eq!(fake.call_count(), 1);

        let changed = queue("A", 61);
        ai.analyze_all(&[&changed]).await;
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test]
    async fn malformed_reply_yields_no_findings_and_a_note() {
        let fake = Arc::new(FakeGenerator::replying("I cannot help with that."));
        let cache = Arc::new(FindingCache::in_memory());
        let ai = analyzer_with_cache(fake, Arc::clone(&cache), AiOptions::default());
        let a = queue("A", 60);

        let pass = ai.analyze_all(&[&a]).await;
        assert_eq!(pass.findings, vec![Vec::<Finding>::new()]);
        assert!(pass.notes.iter().any(|n| n.contains("failed for 1 of 1")));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn persistent_cache_skips_the_service_on_the_next_run() {
        use crate::cache::JsonFileStore;

        let dir = temp_dir("persist");
        let a = queue("A", 60);
        let mut calls = Vec::new();
        for _ in 0..2 {
            let fake = Arc::new(FakeGenerator::replying(REPLY));
            let cache = Arc::new(FindingCache::with_store(Box::new(JsonFileStore::new(&dir))));
            let ai = analyzer_with_cache(fake.clone(), cache, AiOptions::default());

            let pass = ai.analyze_all(&[&a]).await;
            assert_eq!(pass.findings[0].len(), 1);
            assert_eq!(pass.findings[0][0].resource, "A");
            calls.push(fake.call_count());
        }
        assert_eq!(calls, vec![1, 0]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unusable_store_does_not_fail_the_pass() {
        use crate::cache::JsonFileStore;

        let dir = temp_dir("broken");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let not_a_dir = dir.join("plain-file");
        std::fs::write(&not_a_dir, b"x").expect("write");

        let fake = Arc::new(FakeGenerator::replying(REPLY));
        let cache = Arc::new(FindingCache::with_store(Box::new(JsonFileStore::new(&not_a_dir))));
        let ai = analyzer_with_cache(fake.clone(), cache, AiOptions::default());
        let a = queue("A", 60);

        let pass = ai.analyze_all(&[&a]).await;
        assert_eq!(pass.findings[0].len(), 1);
        assert!(pass.token_usage.is_some());
        assert_eq!(fake.call_count(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_affect_only_that_resource() {
        let fake = Arc::new(
            FakeGenerator::replying(REPLY)
                .then(rate_limited())
                .then(rate_limited()),
        );
        let opts = AiOptions {
            max_concurrency: 1,
            ..AiOptions::default()
        };
        let ai = analyzer(fake, opts);
        let a = queue("A", 1);
        let b = queue("B", 2);

        let pass = ai.analyze_all(&[&a, &b]).await;
        assert!(pass.findings[0].is_empty());
        assert_eq!(pass.findings[1].len(), 1);
    }

    #[tokio::test]
    async fn no_usable_model_degrades_to_empty_pass() {
        let fake = Arc::new(FakeGenerator::new(&["models/text-bison"], Ok(reply(REPLY))));
        let ai = analyzer(fake.clone(), AiOptions::default());
        let a = queue("A", 60);

        let pass = ai.analyze_all(&[&a]).await;
        assert_eq!(pass.findings, vec![Vec::<Finding>::new()]);
        assert!(pass.token_usage.is_none());
        assert!(pass.notes[0].starts_with("AI analysis skipped"));
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn out_of_mode_categories_are_dropped() {
        let fake = Arc::new(FakeGenerator::replying(REPLY));
        let opts = AiOptions {
            modes: AnalysisModes::new([Category::Security]),
            ..AiOptions::default()
        };
        let ai = analyzer(fake, opts);
        let a = queue("A", 60);
        let pass = ai.analyze_all(&[&a]).await;
        assert!(pass.findings[0].is_empty());
    }

    #[tokio::test]
    async fn hard_transport_errors_are_not_retried() {
        let fake = Arc::new(FakeGenerator::new(
            &["gemini-pro"],
            Err(TransportError::Status {
                status: 400,
                body: "bad".to_string(),
            }),
        ));
        let ai = analyzer(fake.clone(), AiOptions::default());
        let a = queue("A", 60);
        let pass = ai.analyze_all(&[&a]).await;
        assert!(pass.findings[0].is_empty());
        assert_eq!(fake.call_count(), 1);
    }

    #[test]
    fn pricing_estimate() {
        let p = Pricing::default();
        let cost = p.estimate(1_000_000, 1_000_000);
        assert!((cost - 0.375).abs() < 1e-9);
    }
}

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};
use wait_timeout::ChildExt;

use crate::core::Template;

const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub command: String,
    pub output: PathBuf,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

pub fn load_template_file(path: &Path) -> Result<Template> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read template: {}", path.display()))?;
    let template = Template::from_json_str(&raw)
        .with_context(|| format!("failed to load template: {}", path.display()))?;
    debug!(path = %path.display(), resources = template.len(), "template loaded");
    Ok(template)
}

// a directory yields its first *.template.json by name
pub fn locate_template(output: &Path) -> Result<PathBuf> {
    if output.is_file() {
        return Ok(output.to_path_buf());
    }
    if !output.is_dir() {
        bail!("synth output not found: {}", output.display());
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(output)
        .with_context(|| format!("failed to list {}", output.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".template.json"))
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no *.template.json in {}", output.display()))
}

pub fn synthesize(opts: &SynthOptions) -> Result<Template> {
    let mut parts = opts.command.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("synth command is empty");
    };
    let args: Vec<&str> = parts.collect();

    info!(command = %opts.command, "running synth");
    let out = run_command(program, &args, opts.timeout, opts.working_dir.as_deref())?;
    if out.exit_code != 0 {
        bail!(
            "synth command exited with code {}: {}",
            out.exit_code,
            tail(&out.stderr, STDERR_TAIL_CHARS)
        );
    }

    let output = match &opts.working_dir {
        Some(dir) if opts.output.is_relative() => dir.join(&opts.output),
        _ => opts.output.clone(),
    };
    let path = locate_template(&output)?;
    load_template_file(&path)
}

pub fn run_command(
    cmd: &str,
    args: &[&str],
    timeout: Duration,
    working_dir: Option<&Path>,
) -> Result<CommandOutput> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start process: {cmd}"))?;

    // pipes are read while waiting; a full pipe would block the child
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("failed to wait for process: {cmd}"))?
    {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("timed out after {timeout:?}: {cmd}"));
        }
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: stdout.map(join_drain).unwrap_or_default(),
        stderr: stderr.map(join_drain).unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}

fn join_drain(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn tail(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    s.chars().skip(count - max_chars).collect()
}

//! Cache key resolution
//!
//! Key templates carry substitution tokens: `{{ arch }}`, `{{ branch }}`,
//! `{{ job }}`, and `{{ checksum "FILE" }}` (content hash of a file in the
//! job workspace). Resolution is deterministic given run inputs. Save keys
//! additionally receive a monotonically increasing discriminator so two
//! saves never resolve to the same key; restore templates therefore act as
//! prefixes of previously saved keys.

use std::path::Path;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Inputs available to key resolution for one job
#[derive(Debug, Clone, Copy)]
pub struct KeyContext<'a> {
    pub arch: &'a str,
    pub branch: &'a str,
    pub job: &'a str,
    /// Checksum files are resolved relative to this directory
    pub workdir: &'a Path,
}

fn key_token() -> &'static Regex {
    static KEY_TOKEN: OnceLock<Regex> = OnceLock::new();
    KEY_TOKEN.get_or_init(|| {
        Regex::new(r#"\{\{\s*([a-z]+)(?:\s+"([^"]+)")?\s*\}\}"#).expect("key token regex")
    })
}

static LAST_DISCRIMINATOR: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing discriminator, anchored to wall-clock milliseconds.
///
/// Two saves within the same millisecond still mint distinct keys.
fn next_discriminator() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    loop {
        let last = LAST_DISCRIMINATOR.load(Ordering::SeqCst);
        let candidate = now.max(last + 1);
        if LAST_DISCRIMINATOR
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate;
        }
    }
}

/// Resolve a restore-key template.
pub fn resolve_restore_key(template: &str, ctx: &KeyContext<'_>) -> Result<String> {
    resolve(template, ctx)
}

/// Resolve a save-key template, appending a fresh discriminator.
pub fn resolve_save_key(template: &str, ctx: &KeyContext<'_>) -> Result<String> {
    let resolved = resolve(template, ctx)?;
    Ok(format!("{resolved}-{}", next_discriminator()))
}

fn resolve(template: &str, ctx: &KeyContext<'_>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in key_token().captures_iter(template) {
        let token = caps.get(0).expect("capture group 0");
        let name = &caps[1];
        let value = match name {
            "arch" => ctx.arch.to_string(),
            "branch" => ctx.branch.to_string(),
            "job" => ctx.job.to_string(),
            "checksum" => {
                let file = caps
                    .get(2)
                    .with_context(|| format!("checksum token in '{template}' names no file"))?
                    .as_str();
                checksum(&ctx.workdir.join(file))
                    .with_context(|| format!("failed to checksum '{file}'"))?
            }
            other => anyhow::bail!("unknown cache key token '{other}' in '{template}'"),
        };
        out.push_str(&template[last..token.start()]);
        out.push_str(&value);
        last = token.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Hex-encoded SHA-256 of a file's contents
fn checksum(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

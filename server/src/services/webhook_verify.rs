//! Source-control webhook verification and event normalization.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validate a webhook signature header (`sha256=<hex>` over the raw body).
///
/// Fails closed: with no secret configured the check always returns false
/// rather than being skipped. `verify_slice` is the constant-time compare.
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, rejecting delivery");
        return false;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// A push event normalized out of the provider payload.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub repo_url: String,
    pub repo_full_name: String,
    pub pusher: String,
}

/// Extract a normalized push event from a webhook payload.
///
/// Returns `None` when the payload is missing the branch or head commit —
/// e.g. branch deletions, which arrive as pushes with a zero `after` ref.
pub fn parse_push_event(payload: &serde_json::Value) -> Option<PushEvent> {
    let branch = payload["ref"]
        .as_str()
        .unwrap_or_default()
        .strip_prefix("refs/heads/")
        .unwrap_or_default()
        .to_string();
    let commit_sha = payload["after"].as_str().unwrap_or_default().to_string();

    if branch.is_empty() || commit_sha.is_empty() || commit_sha.chars().all(|c| c == '0') {
        return None;
    }

    let repo_full_name = payload["repository"]["full_name"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let repo_url = payload["repository"]["clone_url"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| repo_full_name.clone());
    let commit_message = payload["head_commit"]["message"]
        .as_str()
        .map(str::to_string);
    let pusher = payload["pusher"]["name"]
        .as_str()
        .unwrap_or("unknown")
        .to_string();

    Some(PushEvent {
        branch,
        commit_sha,
        commit_message,
        repo_url,
        repo_full_name,
        pusher,
    })
}

/// Whether two repository references denote the same repository.
///
/// A configured repo URL and an inbound clone URL may differ syntactically
/// (https vs ssh, `.git` suffix, case) while naming the same repo, so both
/// sides reduce to a lowercase `(owner, repo)` pair before comparing.
pub fn repos_match(a: &str, b: &str) -> bool {
    match (extract_owner_repo(a), extract_owner_repo(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

/// Reduce a repository reference to `(owner, repo)`.
///
/// Accepts full https URLs, `git@host:owner/repo.git` remotes, and bare
/// `owner/repo` shorthand.
fn extract_owner_repo(reference: &str) -> Option<(String, String)> {
    let trimmed = reference.trim().trim_end_matches('/');

    let path = if let Some((_, rest)) = trimmed.split_once("://") {
        // https://host/owner/repo
        rest.split_once('/').map(|(_, p)| p)?
    } else if let Some((_, rest)) = trimmed.split_once('@') {
        // git@host:owner/repo
        rest.split_once(':').map(|(_, p)| p)?
    } else {
        trimmed
    };

    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    Some((owner.to_lowercase(), repo.to_lowercase()))
}

//! Identifier generation
//!
//! Task ids are content-addressed: two peers asking for the same URL (minus
//! filtered query keys) with the same metadata land on the same task.

use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::rpc::types::UrlMeta;

/// Compute the task id for a URL and its metadata
pub fn task_id(url: &str, meta: &UrlMeta) -> String {
    task_id_with_biz(url, meta, "")
}

/// Compute the task id, additionally keyed by a business id
pub fn task_id_with_biz(url: &str, meta: &UrlMeta, biz_id: &str) -> String {
    let filters: Vec<&str> = meta
        .filter
        .split('&')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(filter_query(url, &filters).as_bytes());
    for part in [&meta.digest, &meta.range, &meta.tag] {
        if !part.is_empty() {
            hasher.update(part.as_bytes());
        }
    }
    if !biz_id.is_empty() {
        hasher.update(biz_id.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// Remove the given query keys from a URL, keeping the rest in order
///
/// Unparseable URLs are returned unchanged.
pub fn filter_query(raw: &str, filters: &[&str]) -> String {
    if filters.is_empty() {
        return raw.to_string();
    }

    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.to_string();
    };

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !filters.iter().any(|f| **f == **key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    parsed.to_string()
}

/// Generate a unique peer id for a peer running on `ip`
pub fn peer_id(ip: &str) -> String {
    format!("{}-{}-{}", ip, std::process::id(), Uuid::new_v4())
}

/// Deterministic host UUID for a CDN seed node
pub fn cdn_host_uuid(seeder_name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("cdn:{seeder_name}").as_bytes()).to_string()
}

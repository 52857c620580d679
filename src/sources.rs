//! Citation extraction.
//!
//! Turns raw retrieval hits into the de-duplicated, ranked list of sources
//! shown under an answer.
//!
//! # Pipeline
//!
//! 1. **Resolve** an origin address per hit: the structured S3 location,
//!    then the structured web location, then the metadata keys
//!    `x-amz-bedrock-kb-source-uri`, `source`, `uri`, `url`. Hits with no
//!    address are dropped.
//! 2. **Classify** as `DOCUMENT` (document extension or `s3://`) or `WEB`.
//! 3. **Link**: `s3://` addresses get a presigned GET URL; if signing fails
//!    the raw address is shown instead.
//! 4. **Key** each source by filename (private storage) or by the last URL
//!    path segment (web), lower-cased. A web URL whose path ends in `/` is
//!    keyed by host and path instead.
//! 5. **Rank and de-duplicate**: walk by descending score (stable), keep the
//!    first source per key, except that a public web source replaces a kept
//!    private-storage one in place.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{HitLocation, RetrievalHit, Source, SourceType};
use crate::traits::UrlPresigner;

const METADATA_FALLBACK_KEYS: [&str; 4] = ["x-amz-bedrock-kb-source-uri", "source", "uri", "url"];
const DOCUMENT_EXTENSIONS: [&str; 3] = [".pdf", ".docx", ".txt"];
const S3_SCHEME: &str = "s3://";

/// Extract ranked, de-duplicated sources from `hits`.
pub fn extract_sources(
    hits: &[RetrievalHit],
    presigner: &dyn UrlPresigner,
    link_expiry: Duration,
) -> Vec<Source> {
    let mut sources = Vec::new();

    for hit in hits {
        let Some((address, title)) = resolve_address(hit) else {
            continue;
        };

        let url = if address.starts_with(S3_SCHEME) {
            match presigner.presign_get(&address, link_expiry) {
                Ok(url) => url,
                Err(e) => {
                    warn!(uri = %address, error = %e, "presigning failed, using raw address");
                    address.clone()
                }
            }
        } else {
            address.clone()
        };

        let title = title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Source {}", sources.len() + 1));
        debug!(title = %title, uri = %address, "extracted source");

        sources.push(Source {
            title,
            source_type: classify(&address),
            url,
            uri: address,
            score: hit.score.unwrap_or(0.0),
        });
    }

    let total = sources.len();
    let unique = deduplicate(sources);
    info!(total, unique = unique.len(), "sources extracted");
    unique
}

/// Find the origin address of a hit and the title that goes with it.
fn resolve_address(hit: &RetrievalHit) -> Option<(String, Option<String>)> {
    match hit.location {
        Some(HitLocation::S3 { ref uri }) if !uri.is_empty() => {
            return Some((uri.clone(), Some(document_title(uri))));
        }
        Some(HitLocation::Web { ref url }) if !url.is_empty() => {
            let title = hit
                .metadata_str("title")
                .or_else(|| hit.metadata_str("source"))
                .unwrap_or_else(|| "Web Page".to_string());
            return Some((url.clone(), Some(title)));
        }
        _ => {}
    }

    let address = METADATA_FALLBACK_KEYS
        .iter()
        .filter_map(|key| hit.metadata_str(key))
        .find(|value| !value.is_empty())?;

    let title = if address.contains(S3_SCHEME) {
        document_title(&address)
    } else {
        hit.metadata_str("title")
            .or_else(|| hit.metadata_str("source"))
            .unwrap_or_else(|| "Document".to_string())
    };
    Some((address, Some(title)))
}

/// Last path segment with the `.pdf` extension removed.
fn document_title(address: &str) -> String {
    last_segment(address).replace(".pdf", "")
}

fn last_segment(address: &str) -> &str {
    address.rsplit('/').next().unwrap_or(address)
}

fn classify(address: &str) -> SourceType {
    if address.starts_with(S3_SCHEME) {
        return SourceType::Document;
    }
    let lower = address.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    if DOCUMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        SourceType::Document
    } else {
        SourceType::Web
    }
}

/// Whether a source points at private storage rather than a public page.
fn is_private_storage(source: &Source) -> bool {
    if source.uri.starts_with(S3_SCHEME) {
        return true;
    }
    match url::Url::parse(&source.url) {
        Ok(parsed) => parsed
            .host_str()
            .is_some_and(|host| host.ends_with("amazonaws.com")),
        Err(_) => source.url.contains("amazonaws.com"),
    }
}

/// Key under which two sources count as the same document.
pub fn dedup_key(source: &Source) -> Option<String> {
    let key = if source.uri.starts_with(S3_SCHEME) {
        last_segment(&source.uri).to_lowercase()
    } else if is_private_storage(source) {
        let file = last_segment(&source.url);
        file.split('?').next().unwrap_or(file).to_lowercase()
    } else {
        match url::Url::parse(&source.url) {
            Ok(parsed) => {
                let segment = last_segment(parsed.path()).to_lowercase();
                if segment.is_empty() {
                    format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path())
                        .to_lowercase()
                } else {
                    segment
                }
            }
            Err(_) => source.url.to_lowercase(),
        }
    };

    (!key.is_empty()).then_some(key)
}

fn deduplicate(mut sources: Vec<Source>) -> Vec<Source> {
    // Stable: equal scores keep their retrieval order.
    sources.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut unique: Vec<Source> = Vec::with_capacity(sources.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for source in sources {
        let Some(key) = dedup_key(&source) else {
            debug!(title = %source.title, "skipped source with no key");
            continue;
        };

        match seen.get(&key) {
            None => {
                seen.insert(key, unique.len());
                unique.push(source);
            }
            Some(&index) => {
                if !is_private_storage(&source) && is_private_storage(&unique[index]) {
                    debug!(key = %key, title = %source.title, "public source replaces stored copy");
                    unique[index] = source;
                } else {
                    debug!(key = %key, title = %source.title, "skipped duplicate source");
                }
            }
        }
    }

    unique
}

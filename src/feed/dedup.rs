//! Story identity: degenerate-guid repair and story hashing.
//!
//! Some feeds stamp every item with the same guid (often the feed's own URL),
//! which would collapse a whole batch onto one stored story. Before hashing,
//! the batch is checked once and a per-entry substitute is chosen.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use super::document::RawEntry;
use crate::storage::Story;
use crate::util::strip_control_chars;

/// Hex characters of the identifier digest kept in a story hash
const HASH_HEX_LEN: usize = 16;

/// How the batch's declared guids are replaced, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidRepair {
    /// Guids are usable as declared
    Keep,
    /// Every entry shares one guid; permalinks tell them apart
    Permalink,
    /// Guid and permalink are both shared; fall back to publication time
    Published,
}

/// Decide whether the batch's guids are degenerate.
///
/// Guids are unreliable when more than one entry exists and all of them share
/// a single guid value (absence counts as a value). If the permalinks are
/// degenerate in the same way, the published timestamp is the only remaining
/// distinguisher.
pub fn detect_guid_repair(entries: &[RawEntry]) -> GuidRepair {
    let guids: HashSet<Option<&str>> = entries.iter().map(|e| e.guid.as_deref()).collect();
    let permalinks: HashSet<Option<&str>> = entries.iter().map(RawEntry::permalink).collect();

    let single_guid = guids.len() == 1 && guids.len() != entries.len();
    if !single_guid {
        return GuidRepair::Keep;
    }

    let single_permalink = permalinks.len() == 1 && permalinks.len() != entries.len();
    if single_permalink {
        GuidRepair::Published
    } else {
        GuidRepair::Permalink
    }
}

/// Deterministic storage key for a story: `"<feed_id>:<digest prefix>"`
pub fn story_hash(feed_id: i64, guid: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(guid.as_bytes()));
    format!("{}:{}", feed_id, &digest[..HASH_HEX_LEN])
}

/// String form of a publication time used as a substitute guid
pub fn published_guid(published: DateTime<Utc>) -> String {
    published.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Publication time for an entry: published, else updated, else `now`;
/// never later than `now`.
pub fn entry_published(entry: &RawEntry, now: DateTime<Utc>) -> DateTime<Utc> {
    entry
        .published
        .or(entry.updated)
        .unwrap_or(now)
        .min(now)
}

/// Identifier for an entry that has nothing better: its own date when it
/// declares one, else a digest of what it says.
///
/// Never derived from the fetch time, so refetching an unchanged document
/// resolves to the same identifiers.
fn fallback_guid(entry: &RawEntry) -> String {
    if let Some(date) = entry.published.or(entry.updated) {
        return published_guid(date);
    }
    let mut hasher = Sha256::new();
    for part in [&entry.title, &entry.content, &entry.summary] {
        hasher.update(part.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
    }
    format!("content:{:x}", hasher.finalize())
}

fn resolve_guid(entry: &RawEntry, repair: GuidRepair) -> String {
    let declared = match repair {
        GuidRepair::Keep => entry.guid.as_deref().or_else(|| entry.permalink()),
        GuidRepair::Permalink => entry.permalink(),
        GuidRepair::Published => None,
    };
    declared
        .map(str::to_owned)
        .unwrap_or_else(|| fallback_guid(entry))
}

/// Turn a batch of raw entries into stories for `feed_id`, repairing
/// degenerate guids and computing each story's hash.
pub fn build_stories(
    feed_id: i64,
    entries: &[RawEntry],
    now: DateTime<Utc>,
    verbose: bool,
) -> Vec<Story> {
    let repair = detect_guid_repair(entries);

    entries
        .iter()
        .map(|entry| {
            let published = entry_published(entry, now);
            let guid = resolve_guid(entry, repair);

            if verbose && repair != GuidRepair::Keep {
                tracing::debug!(
                    feed_id = feed_id,
                    declared = ?entry.guid,
                    replacement = %guid,
                    strategy = ?repair,
                    "Replacing degenerate guid"
                );
            }

            let title = entry
                .title
                .as_deref()
                .map(|t| strip_control_chars(t).trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            Story {
                story_hash: story_hash(feed_id, &guid),
                feed_id,
                guid,
                permalink: entry.permalink().map(str::to_owned),
                title,
                author: entry.author.clone(),
                content: entry.content.clone().or_else(|| entry.summary.clone()),
                published,
            }
        })
        .collect()
}

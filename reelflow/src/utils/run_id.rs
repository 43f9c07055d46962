//! Stable run ids derived from topics.

use sha2::{Digest, Sha256};

/// Longest slug kept from the topic.
pub const MAX_SLUG_LEN: usize = 40;

const HASH_PREFIX_LEN: usize = 12;

/// Lowercases `topic` and keeps ASCII alphanumerics, collapsing every other
/// run of characters into a single `-`.
#[must_use]
pub fn slugify(topic: &str) -> String {
    let mut slug = String::with_capacity(topic.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Derives the run id for a topic.
///
/// The id is the topic slug followed by the first twelve hex characters of
/// the topic's SHA-256, so the same topic always maps to the same
/// checkpoint while distinct topics with equal slugs do not collide.
///
/// # Examples
///
/// ```
/// use reelflow::utils::run_id_for_topic;
///
/// let id = run_id_for_topic("Why cats purr");
/// assert!(id.starts_with("why-cats-purr-"));
/// assert_eq!(id, run_id_for_topic("Why cats purr"));
/// ```
#[must_use]
pub fn run_id_for_topic(topic: &str) -> String {
    let digest = hex::encode(Sha256::digest(topic.as_bytes()));
    let hash = &digest[..HASH_PREFIX_LEN];
    let slug = slugify(topic);
    if slug.is_empty() {
        format!("run-{hash}")
    } else {
        format!("{slug}-{hash}")
    }
}

/// Returns true if `run_id` is usable as a single path component.
#[must_use]
pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= 128
        && !run_id.starts_with('.')
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

//! Pure card construction and merge rules. No I/O beyond reading the clock.

use cardpipe_core::{
    CardType, KnowledgeCard, SourceMaterial, SynthesisResult, UpdateFrequency,
    KEYWORD_SOURCE_PREFIX,
};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `source` for a card built from `topic`: the url for websites, `keyword:<kw>` otherwise.
pub fn card_source(card_type: CardType, topic: &str) -> String {
    match card_type {
        CardType::Website => topic.to_string(),
        CardType::Keyword => format!("{KEYWORD_SOURCE_PREFIX}{topic}"),
    }
}

/// Build a new card from a synthesis result.
///
/// - title: synthesis title, else the extracted page title, else `topic`
/// - items: exactly the synthesis items (never padded or truncated)
/// - tags: synthesis tags, else `tags` supplied by the caller
pub fn from_synthesis(
    topic: &str,
    material: &SourceMaterial,
    synthesis: SynthesisResult,
    tags: &[String],
    frequency: UpdateFrequency,
) -> KnowledgeCard {
    let card_type = material.card_type();
    let title = synthesis
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            material
                .page_title()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| topic.to_string());
    let tags = if synthesis.tags.is_empty() {
        tags.to_vec()
    } else {
        synthesis.tags
    };
    KnowledgeCard {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        summary: synthesis.summary,
        items: synthesis.items,
        source: card_source(card_type, topic),
        card_type,
        tags,
        update_frequency: frequency,
        last_updated: now_ms(),
    }
}

/// Merge a refresh into `prior` at time `now`.
///
/// `items` and `tags` are taken from `synthesis` as-is, including empty lists; absent
/// fields were already filled from `prior` during normalization. A blank summary keeps
/// the prior one. Identity fields
/// (`id`, `source`, `type`, `updateFrequency`, `title`) are never touched. `lastUpdated`
/// always moves strictly forward.
pub fn apply_update_at(prior: &KnowledgeCard, synthesis: SynthesisResult, now: u64) -> KnowledgeCard {
    let mut card = prior.clone();
    if !synthesis.summary.trim().is_empty() {
        card.summary = synthesis.summary;
    }
    card.items = synthesis.items;
    card.tags = synthesis.tags;
    card.last_updated = now.max(prior.last_updated.saturating_add(1));
    card
}

pub fn apply_update(prior: &KnowledgeCard, synthesis: SynthesisResult) -> KnowledgeCard {
    apply_update_at(prior, synthesis, now_ms())
}

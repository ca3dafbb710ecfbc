use crate::prompt::{self, BACKLINK_LABEL, MAX_ITEMS, MAX_SUMMARY_CHARS, MIN_ITEMS};
use cardpipe_core::{
    CompletionBackend, Error, KnowledgeCard, KnowledgeItem, Result, SourceMaterial,
    SynthesisRequest, SynthesisResult,
};

/// What a field falls back to when the completion omits it or gives it the wrong type.
///
/// Generate uses [`ShapeDefaults::empty`]; update uses the prior card's values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeDefaults {
    pub summary: String,
    pub items: Vec<KnowledgeItem>,
    pub tags: Vec<String>,
}

impl ShapeDefaults {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_card(card: &KnowledgeCard) -> Self {
        Self {
            summary: card.summary.clone(),
            items: card.items.clone(),
            tags: card.tags.clone(),
        }
    }
}

/// Drop one surrounding Markdown code fence (```json ... ```), if present.
fn strip_code_fence(raw: &str) -> &str {
    let s = raw.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let Some(body) = rest.trim_end().strip_suffix("```") else {
        return s;
    };
    // Skip the info string ("json") on the opening fence line.
    match body.find('\n') {
        Some(i) => body[i + 1..].trim(),
        None => body.trim(),
    }
}

fn item_from_value(v: &serde_json::Value) -> Option<KnowledgeItem> {
    let obj = v.as_object()?;
    let title = obj.get("title").and_then(|x| x.as_str()).unwrap_or_default();
    let content = obj.get("content").and_then(|x| x.as_str()).unwrap_or_default();
    if title.trim().is_empty() && content.trim().is_empty() {
        return None;
    }
    Some(KnowledgeItem {
        title: title.trim().to_string(),
        content: content.trim().to_string(),
    })
}

/// Parse completion content into a fully populated [`SynthesisResult`].
///
/// Field policy:
/// - `items`: array → entries that are objects with string `title`/`content` (at least one
///   non-empty); anything else → `defaults.items`.
/// - `summary`: non-empty string → kept; else `defaults.summary`.
/// - `tags`: array → its non-empty string entries; anything else → `defaults.tags`.
/// - `title`: non-empty string → `Some`; else `None`.
///
/// Content that is not JSON, or JSON that is not an object, is `MalformedCompletion`.
pub fn normalize_completion(raw: &str, defaults: &ShapeDefaults) -> Result<SynthesisResult> {
    let body = strip_code_fence(raw);
    let v: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        let excerpt: String = body.chars().take(120).collect();
        Error::MalformedCompletion(format!("not JSON ({e}): {excerpt:?}"))
    })?;
    let Some(obj) = v.as_object() else {
        return Err(Error::MalformedCompletion(
            "completion JSON is not an object".to_string(),
        ));
    };

    let title = obj
        .get("title")
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let summary = match obj.get("summary").and_then(|x| x.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            tracing::debug!("completion summary missing; using fallback");
            defaults.summary.clone()
        }
    };

    let items = match obj.get("items").and_then(|x| x.as_array()) {
        Some(arr) => arr.iter().filter_map(item_from_value).collect(),
        None => {
            tracing::debug!("completion items missing or not an array; using fallback");
            defaults.items.clone()
        }
    };

    let tags = match obj.get("tags").and_then(|x| x.as_array()) {
        Some(arr) => arr
            .iter()
            .filter_map(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        None => defaults.tags.clone(),
    };

    Ok(SynthesisResult {
        title,
        summary,
        items,
        tags,
    })
}

fn ends_with_markdown_link(s: &str) -> bool {
    let s = s.trim_end();
    let Some(head) = s.strip_suffix(')') else {
        return false;
    };
    head.rfind("](")
        .map(|i| &head[i + 2..])
        .is_some_and(|url| url.starts_with("http") && !url.contains(char::is_whitespace))
}

/// Soft checks on the prompt contract. Returned as human-readable warnings.
pub fn conformance_warnings(r: &SynthesisResult) -> Vec<String> {
    let mut out = Vec::new();
    let n = r.items.len();
    if !(MIN_ITEMS..=MAX_ITEMS).contains(&n) {
        out.push(format!(
            "expected {MIN_ITEMS}-{MAX_ITEMS} items, got {n}"
        ));
    }
    for (i, it) in r.items.iter().enumerate() {
        if !ends_with_markdown_link(&it.content) {
            out.push(format!("item {} does not end with a source link", i + 1));
        }
    }
    let lower = r.summary.to_ascii_lowercase();
    if lower.contains("http://")
        || lower.contains("https://")
        || lower.contains(&BACKLINK_LABEL.to_ascii_lowercase())
    {
        out.push("summary contains a link".to_string());
    }
    let chars = r.summary.chars().count();
    if chars > MAX_SUMMARY_CHARS {
        out.push(format!(
            "summary is {chars} characters (limit {MAX_SUMMARY_CHARS})"
        ));
    }
    out
}

/// Turns acquired material into structured card content via a completion backend.
pub struct SynthesisClient<C> {
    backend: C,
}

impl<C: CompletionBackend> SynthesisClient<C> {
    pub fn new(backend: C) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    async fn run(
        &self,
        action: &'static str,
        req: cardpipe_core::CompletionRequest,
        defaults: &ShapeDefaults,
    ) -> Result<SynthesisResult> {
        let raw = self.backend.complete(&req).await?;
        let out = match normalize_completion(&raw, defaults) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(action, error = %e, "completion could not be used");
                return Err(e);
            }
        };
        for w in conformance_warnings(&out) {
            tracing::warn!(action, warning = %w, "completion does not follow the card format");
        }
        Ok(out)
    }

    pub async fn generate(&self, topic: &str, material: &SourceMaterial) -> Result<SynthesisResult> {
        tracing::info!(topic, "generating card content");
        self.run(
            "generate",
            prompt::generate_request(topic, material),
            &ShapeDefaults::empty(),
        )
        .await
    }

    pub async fn update(
        &self,
        card: &KnowledgeCard,
        material: &SourceMaterial,
    ) -> Result<SynthesisResult> {
        tracing::info!(card_id = %card.id, "updating card content");
        self.run(
            "update",
            prompt::update_request(card, material),
            &ShapeDefaults::from_card(card),
        )
        .await
    }

    pub async fn synthesize(&self, req: &SynthesisRequest) -> Result<SynthesisResult> {
        match req {
            SynthesisRequest::Generate(g) => self.generate(&g.keyword, &g.material).await,
            SynthesisRequest::Update(u) => self.update(&u.card, &u.material).await,
        }
    }
}

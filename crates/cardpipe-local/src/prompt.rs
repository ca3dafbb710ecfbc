use cardpipe_core::{
    CompletionRequest, KnowledgeCard, SearchResult, SourceMaterial, WebsiteContent,
};
use std::fmt::Write as _;

/// Link text every item must end with: `[View source](url)`.
pub const BACKLINK_LABEL: &str = "View source";
pub const MAIN_TEXT_PROMPT_CHARS: usize = 500;
pub const MIN_ITEMS: usize = 4;
pub const MAX_ITEMS: usize = 6;
pub const MAX_SUMMARY_CHARS: usize = 200;

const MAX_TOKENS: u64 = 4_000;
const FREQUENCY_PENALTY: f64 = 0.5;

const GENERATE_SYSTEM: &str = "You are a knowledge curation assistant. You extract, summarize and \
organize knowledge from several sources into well-structured knowledge cards.
Always answer with a single valid JSON object with these fields:
- title: the card title
- summary: an overview of at most 200 characters
- items: an array of knowledge items, each with \"title\" and \"content\"
- tags: an array of 3-5 tags

Every knowledge item must carry real information (no filler, no repetition), be written as \
complete paragraphs, stay objective and accurate, and reflect how recent the information is.";

const UPDATE_SYSTEM: &str = "You are a knowledge update assistant. You spot new information and \
integrate it into existing knowledge, keeping each knowledge card current, accurate and complete. \
Always answer with a single valid JSON object.";

fn or_none(s: &str) -> &str {
    if s.trim().is_empty() {
        "none"
    } else {
        s
    }
}

fn backlink(url: &str) -> String {
    format!("[{BACKLINK_LABEL}]({url})")
}

fn website_section(w: &WebsiteContent) -> String {
    let b = w.bundle();
    let main: String = b.main_text.chars().take(MAIN_TEXT_PROMPT_CHARS).collect();
    let mut s = String::new();
    let _ = writeln!(s, "Site description: {}", or_none(&b.description));
    let _ = writeln!(s, "Keywords: {}", or_none(&b.keywords));
    let _ = writeln!(s, "Main navigation: {}", or_none(&b.navigation));
    let _ = writeln!(s, "Main content: {}", or_none(&main));
    s.push_str("\nLatest articles:\n");
    if b.articles.is_empty() {
        s.push_str("no recent articles\n");
    }
    for (i, a) in b.articles.iter().enumerate() {
        let _ = writeln!(
            s,
            "{}. Title: {}\n   Link: {}\n   Description: {}",
            i + 1,
            a.title,
            a.url,
            or_none(&a.description)
        );
    }
    s
}

fn search_section(results: &[SearchResult]) -> String {
    let mut s = String::new();
    for (i, r) in results.iter().enumerate() {
        let _ = writeln!(
            s,
            "Source {}: {}\nTitle: {}\nContent: {}\n",
            i + 1,
            r.url,
            r.title,
            r.content
        );
    }
    s
}

fn card_section(card: &KnowledgeCard) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "Title: {}", card.title);
    let _ = writeln!(s, "Summary: {}", card.summary);
    s.push_str("Knowledge items:\n");
    if card.items.is_empty() {
        s.push_str("no knowledge items yet\n");
    }
    for (i, it) in card.items.iter().enumerate() {
        let _ = writeln!(s, "{}. {}\n{}", i + 1, it.title, it.content);
    }
    let _ = writeln!(s, "Current tags: {}", card.tags.join(", "));
    s
}

fn shape_example(with_title: bool) -> String {
    let title = if with_title {
        "  \"title\": \"Topic title\",\n"
    } else {
        ""
    };
    format!(
        "{{\n{title}  \"summary\": \"Overview (at most {MAX_SUMMARY_CHARS} characters, no URLs)\",\n  \"items\": [\n    {{\"title\": \"Item 1 title\", \"content\": \"Item 1 details. {}\"}},\n    {{\"title\": \"Item 2 title\", \"content\": \"Item 2 details. {}\"}}\n  ],\n  \"tags\": [\"tag1\", \"tag2\", \"tag3\"]\n}}",
        backlink("https://example.com/article1"),
        backlink("https://example.com/article2"),
    )
}

fn closing_rules() -> String {
    format!(
        "Notes:\n\
         1. Return valid JSON only.\n\
         2. The items array must contain {MIN_ITEMS}-{MAX_ITEMS} knowledge items.\n\
         3. Every item's content must end with a Markdown link: {}.\n\
         4. Item content must be full paragraphs, not one-liners.\n\
         5. Avoid duplicated content.\n\
         6. Keep the content accurate and current.\n\
         7. The summary must never contain URLs or \"{BACKLINK_LABEL}\" link text.\n",
        backlink("URL")
    )
}

/// Completion request for a brand-new card about `topic`.
///
/// For website material `topic` is the site url, which also becomes the overview back-link.
pub fn generate_request(topic: &str, material: &SourceMaterial) -> CompletionRequest {
    let mut user = String::new();
    match material {
        SourceMaterial::Website(w) => {
            let source = if w.url.trim().is_empty() { topic } else { w.url.as_str() };
            let _ = writeln!(
                user,
                "Create a knowledge card about \"{topic}\" from the website content below.\n\
                 This is a website card; the main information of the site has already been collected:\n"
            );
            user.push_str(&website_section(w));
            let _ = writeln!(
                user,
                "\nRequirements:\n\
                 1. The first item must introduce the website as a whole and end with {}.\n\
                 2. The following items summarize the latest articles; each must end with {}.\n\
                 3. Produce {MIN_ITEMS}-{MAX_ITEMS} detailed, relevant items.\n\
                 4. Keep the content timely and varied.",
                backlink(source),
                backlink("article URL"),
            );
        }
        SourceMaterial::Search(_) => {
            let _ = writeln!(
                user,
                "Create a knowledge card about \"{topic}\" from the search results below."
            );
        }
    }
    let _ = writeln!(
        user,
        "\nThe card consists of:\n\
         1. Title: a concise statement of the topic.\n\
         2. Summary: a short overview of at most {MAX_SUMMARY_CHARS} characters; it must not contain any URL or \"{BACKLINK_LABEL}\" link text.\n\
         3. Knowledge items: {MIN_ITEMS}-{MAX_ITEMS} items, each with a short title and a detailed paragraph ending in {}.\n\
         4. Tags: 3-5 relevant tags.",
        backlink("URL")
    );
    if let SourceMaterial::Search(results) = material {
        user.push_str("\nSearch results:\n");
        user.push_str(&search_section(results));
    }
    let _ = writeln!(user, "\nAnswer in this JSON shape:\n{}\n", shape_example(true));
    user.push_str(&closing_rules());

    CompletionRequest {
        system: GENERATE_SYSTEM.to_string(),
        user,
        temperature: 0.6,
        top_p: 0.95,
        frequency_penalty: FREQUENCY_PENALTY,
        max_tokens: MAX_TOKENS,
        json_mode: true,
    }
}

/// Completion request that refreshes `card` with newly acquired material.
pub fn update_request(card: &KnowledgeCard, material: &SourceMaterial) -> CompletionRequest {
    let mut user = String::new();
    let kind = match material {
        SourceMaterial::Website(_) => "website",
        SourceMaterial::Search(_) => "search",
    };
    let _ = writeln!(
        user,
        "Update the knowledge card about \"{}\" using the new {kind} content below.\n",
        card.title
    );
    if let SourceMaterial::Website(w) = material {
        user.push_str("This is a website card; the latest information of the site has been collected:\n\n");
        user.push_str(&website_section(w));
        user.push('\n');
    }
    user.push_str("Current card:\n");
    user.push_str(&card_section(card));
    match material {
        SourceMaterial::Website(_) => {
            let _ = writeln!(
                user,
                "\nRequirements:\n\
                 1. Keep the first item as the site introduction, refreshed with the new information, ending with {}.\n\
                 2. Add the latest articles as new items; each must end with {}.\n\
                 3. Keep {MIN_ITEMS}-{MAX_ITEMS} detailed, relevant items.\n\
                 4. Refresh the summary to reflect the current state (no URLs).\n\
                 5. Update the tags if needed.\n\
                 6. Keep existing items whose content is still valid.",
                backlink(&card.source),
                backlink("article URL"),
            );
        }
        SourceMaterial::Search(results) => {
            user.push_str("\nNew search results:\n");
            user.push_str(&search_section(results));
            let _ = writeln!(
                user,
                "Requirements:\n\
                 1. Keep existing items that are still valuable.\n\
                 2. Add new items so the total stays between {MIN_ITEMS} and {MAX_ITEMS}.\n\
                 3. Every item must end with {}.\n\
                 4. Refresh the summary with the new information (no URLs).\n\
                 5. Update the tags if needed.",
                backlink("URL")
            );
        }
    }
    let _ = writeln!(user, "\nAnswer in this JSON shape:\n{}\n", shape_example(false));
    user.push_str(&closing_rules());

    CompletionRequest {
        system: UPDATE_SYSTEM.to_string(),
        user,
        temperature: 0.7,
        top_p: 0.9,
        frequency_penalty: FREQUENCY_PENALTY,
        max_tokens: MAX_TOKENS,
        json_mode: true,
    }
}

use crate::extract::norm_ws;
use crate::links;
use cardpipe_core::{PageSnapshot, SearchResult};
use html_scraper::{ElementRef, Html, Selector};

/// Result list entries on a Bing results page.
pub const RESULTS_SELECTOR: &str = "main > ol > li";
pub const MAX_SEARCH_RESULTS: usize = 5;
/// `{query}` is replaced by the url-encoded keyword.
pub const DEFAULT_SEARCH_URL_TEMPLATE: &str = "https://www.bing.com/search?q={query}";

const TITLE_SELECTOR: &str = "h2";
const SNIPPET_SELECTOR: &str = ".b_caption p";
const LINK_SELECTOR: &str = "h2 a";

pub fn search_url(template: &str, keyword: &str) -> String {
    let q: String = url::form_urlencoded::byte_serialize(keyword.trim().as_bytes()).collect();
    if template.contains("{query}") {
        template.replace("{query}", &q)
    } else {
        // Bare prefix like "https://host/search?q=".
        format!("{template}{q}")
    }
}

fn first_text(el: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    let t = norm_ws(&el.select(sel).next()?.text().collect::<String>());
    (!t.is_empty()).then_some(t)
}

/// Parse a results page into at most [`MAX_SEARCH_RESULTS`] hits.
///
/// Only the first five list entries are considered. An entry missing its title, snippet or
/// link (or with any of them empty) is skipped rather than failing the page.
pub fn parse_search_results(html: &str, page_url: &str) -> Vec<SearchResult> {
    let doc = Html::parse_document(html);
    let (Ok(entries), Ok(title_sel), Ok(snippet_sel), Ok(link_sel)) = (
        Selector::parse(RESULTS_SELECTOR),
        Selector::parse(TITLE_SELECTOR),
        Selector::parse(SNIPPET_SELECTOR),
        Selector::parse(LINK_SELECTOR),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in doc.select(&entries).take(MAX_SEARCH_RESULTS) {
        let Some(title) = first_text(&entry, &title_sel) else {
            continue;
        };
        let Some(content) = first_text(&entry, &snippet_sel) else {
            continue;
        };
        let Some(url) = entry
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|h| links::absolutize(h, page_url))
        else {
            continue;
        };
        out.push(SearchResult {
            title,
            content,
            url,
        });
    }
    out
}

pub fn results_from_snapshot(snap: &PageSnapshot, request_url: &str) -> Vec<SearchResult> {
    let base = if snap.final_url.trim().is_empty() {
        request_url
    } else {
        snap.final_url.as_str()
    };
    parse_search_results(&snap.html, base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(title: &str, snippet: &str, href: &str) -> String {
        format!(
            r#"<li class="b_algo"><h2><a href="{href}">{title}</a></h2><div class="b_caption"><p>{snippet}</p></div></li>"#
        )
    }

    fn page(entries: &[String]) -> String {
        format!(
            "<html><body><main><ol id=\"b_results\">{}</ol></main></body></html>",
            entries.join("")
        )
    }

    #[test]
    fn search_url_encodes_keyword() {
        assert_eq!(
            search_url(DEFAULT_SEARCH_URL_TEMPLATE, "rust async & tokio"),
            "https://www.bing.com/search?q=rust+async+%26+tokio"
        );
        assert_eq!(
            search_url("http://127.0.0.1:9/s?q=", "a b"),
            "http://127.0.0.1:9/s?q=a+b"
        );
    }

    #[test]
    fn parses_well_formed_entries_in_order() {
        let html = page(&[
            entry("First", "one", "https://a.test/1"),
            entry("Second", "two", "https://b.test/2"),
        ]);
        let rs = parse_search_results(&html, "https://www.bing.com/search?q=x");
        assert_eq!(rs.len(), 2);
        assert_eq!(rs[0].title, "First");
        assert_eq!(rs[0].content, "one");
        assert_eq!(rs[0].url, "https://a.test/1");
        assert_eq!(rs[1].title, "Second");
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let html = page(&[
            "<li><h2>No snippet</h2></li>".to_string(),
            entry("", "empty title", "https://a.test"),
            entry("Good", "snippet", "https://good.test"),
            r#"<li><h2>No link</h2><div class="b_caption"><p>x</p></div></li>"#.to_string(),
        ]);
        let rs = parse_search_results(&html, "https://www.bing.com/search?q=x");
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].title, "Good");
    }

    #[test]
    fn only_first_five_entries_are_considered() {
        let entries: Vec<String> = (0..8)
            .map(|i| entry(&format!("T{i}"), "s", &format!("https://e.test/{i}")))
            .collect();
        let rs = parse_search_results(&page(&entries), "https://www.bing.com/");
        assert_eq!(rs.len(), MAX_SEARCH_RESULTS);
        assert_eq!(rs[4].title, "T4");
    }

    #[test]
    fn results_outside_the_main_list_are_ignored() {
        let html = format!(
            "<html><body><ol>{}</ol><main><ol>{}</ol></main></body></html>",
            entry("Sidebar", "s", "https://side.test"),
            entry("Main", "m", "https://main.test")
        );
        let rs = parse_search_results(&html, "https://www.bing.com/");
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].title, "Main");
    }

    proptest! {
        #[test]
        fn search_extraction_is_bounded_and_complete(
            raw in prop::collection::vec(("[A-Za-z ]{0,8}", "[a-z ]{0,8}", prop_oneof![Just(""), Just("https://r.test/x"), Just("/rel")]), 0..12)
        ) {
            let entries: Vec<String> = raw.iter().map(|(t, s, h)| entry(t, s, h)).collect();
            let rs = parse_search_results(&page(&entries), "https://www.bing.com/search?q=x");
            prop_assert!(rs.len() <= MAX_SEARCH_RESULTS);
            for r in &rs {
                prop_assert!(!r.title.is_empty());
                prop_assert!(!r.content.is_empty());
                prop_assert!(!r.url.is_empty());
            }
        }
    }
}

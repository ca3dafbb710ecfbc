use crate::extract::{norm_ws, visible_text, within_noise};
use cardpipe_core::ArticleLink;
use html_scraper::{ElementRef, Html, Selector};

pub const MAX_ARTICLES: usize = 10;

/// Anchors whose href looks like an article path.
const ARTICLE_ANCHORS: &str = r#"a[href*="/p/"], a[href*="/article/"], a[href*="/news/"]"#;

/// Resolve `href` to an absolute url.
///
/// - Hrefs that already start with `http` are kept (after parsing).
/// - Everything else resolves against the *origin* of `page_url`, not its path.
pub fn absolutize_against_origin(href: &str, page_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.to_ascii_lowercase().starts_with("http") {
        return url::Url::parse(href).ok().map(|u| u.to_string());
    }
    let page = url::Url::parse(page_url).ok()?;
    let origin = url::Url::parse(&page.origin().ascii_serialization()).ok()?;
    origin.join(href).ok().map(|u| u.to_string())
}

/// Resolve `href` against the full `base_url` (path included).
pub fn absolutize(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Ok(u) = url::Url::parse(href) {
        return Some(u.to_string());
    }
    let base = url::Url::parse(base_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

fn enclosing_block<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| matches!(a.value().name(), "div" | "article"))
}

/// Candidate article links, in document order.
///
/// - Anchors inside noise regions (nav/header/footer/ads) are ignored.
/// - Description is the enclosing block's text with the title removed.
/// - Entries with an empty title/url, or any `#` in the url, are dropped.
/// - Returns at most `max` (itself capped at [`MAX_ARTICLES`]).
pub fn article_links(doc: &Html, page_url: &str, max: usize) -> Vec<ArticleLink> {
    let max = max.min(MAX_ARTICLES);
    if max == 0 {
        return Vec::new();
    }
    let Ok(sel) = Selector::parse(ARTICLE_ANCHORS) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for a in doc.select(&sel) {
        if out.len() >= max {
            break;
        }
        if within_noise(&a) {
            continue;
        }
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let title = norm_ws(&visible_text(a));
        let Some(url) = absolutize_against_origin(href, page_url) else {
            continue;
        };
        if title.is_empty() || url.is_empty() || url.contains('#') {
            continue;
        }
        let description = enclosing_block(&a)
            .map(|b| norm_ws(&visible_text(b)).replacen(&title, "", 1))
            .map(|d| norm_ws(&d))
            .unwrap_or_default();
        out.push(ArticleLink {
            title,
            url,
            description,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn links_of(html: &str, page_url: &str) -> Vec<ArticleLink> {
        article_links(&Html::parse_document(html), page_url, MAX_ARTICLES)
    }

    #[test]
    fn relative_hrefs_resolve_against_origin() {
        assert_eq!(
            absolutize_against_origin("p/1", "https://example.com/deep/path/").as_deref(),
            Some("https://example.com/p/1")
        );
        assert_eq!(
            absolutize_against_origin("/news/2", "https://example.com/x").as_deref(),
            Some("https://example.com/news/2")
        );
        assert_eq!(
            absolutize_against_origin("https://other.org/article/3", "https://example.com").as_deref(),
            Some("https://other.org/article/3")
        );
        assert_eq!(absolutize_against_origin("  ", "https://example.com"), None);
    }

    #[test]
    fn absolutize_uses_full_base_path() {
        assert_eq!(
            absolutize("next", "https://example.com/a/b").as_deref(),
            Some("https://example.com/a/next")
        );
    }

    #[test]
    fn article_links_carry_title_url_and_description() {
        let html = r#"<html><body>
          <div class="card"><a href="/p/42">Big News</a> Short blurb about it.</div>
          <a href="/about">About</a>
        </body></html>"#;
        let links = links_of(html, "https://example.com/home");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title, "Big News");
        assert_eq!(links[0].url, "https://example.com/p/42");
        assert_eq!(links[0].description, "Short blurb about it.");
    }

    #[test]
    fn fragment_links_and_empty_titles_are_dropped() {
        let html = r##"<html><body>
          <a href="/p/1#comments">Comments</a>
          <a href="/article/2"></a>
          <a href="/article/3">Kept</a>
        </body></html>"##;
        let links = links_of(html, "https://example.com");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/article/3");
    }

    #[test]
    fn anchors_in_noise_regions_are_ignored() {
        let html = r#"<html><body>
          <nav><a href="/news/nav">Nav item</a></nav>
          <footer><a href="/news/foot">Footer item</a></footer>
          <div class="popup"><a href="/news/pop">Popup item</a></div>
          <div><a href="/news/real">Real item</a></div>
        </body></html>"#;
        let links = links_of(html, "https://example.com");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title, "Real item");
    }

    #[test]
    fn article_links_are_capped_at_ten() {
        let mut html = String::from("<html><body>");
        for i in 0..25 {
            html.push_str(&format!("<div><a href=\"/p/{i}\">Post {i}</a></div>"));
        }
        html.push_str("</body></html>");
        let links = links_of(&html, "https://example.com");
        assert_eq!(links.len(), MAX_ARTICLES);
        assert_eq!(links[0].title, "Post 0");
        assert_eq!(links[9].title, "Post 9");
    }

    fn href_strategy() -> impl Strategy<Value = String> {
        let path = prop_oneof![Just("/p/"), Just("/article/"), Just("/news/"), Just("/misc/")];
        let tail = "[a-z0-9]{0,6}";
        let frag = prop_oneof![Just(""), Just("#top"), Just("#")];
        let host = prop_oneof![Just(""), Just("https://other.org"), Just("http://x.test")];
        (host, path, tail, frag).prop_map(|(h, p, t, f)| format!("{h}{p}{t}{f}"))
    }

    proptest! {
        #[test]
        fn article_extraction_is_bounded_and_fragment_free(
            anchors in prop::collection::vec((href_strategy(), "[A-Za-z ]{0,12}"), 0..40)
        ) {
            let mut html = String::from("<html><body>");
            for (href, text) in &anchors {
                html.push_str(&format!("<div><a href=\"{href}\">{text}</a> blurb</div>"));
            }
            html.push_str("</body></html>");
            let links = links_of(&html, "https://example.com/start");
            prop_assert!(links.len() <= MAX_ARTICLES);
            for l in &links {
                prop_assert!(!l.url.contains('#'), "url={}", l.url);
                prop_assert!(!l.title.is_empty());
                prop_assert!(l.url.starts_with("http"));
            }
        }
    }
}

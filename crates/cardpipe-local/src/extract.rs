use crate::links;
use cardpipe_core::{PageSnapshot, Result, WebsiteBundle, WebsiteContent};
use html_scraper::{ElementRef, Html, Selector};

/// Tags whose subtrees never contribute text or links.
const NOISE_TAGS: [&str; 6] = ["script", "style", "iframe", "nav", "header", "footer"];
const NOISE_CLASSES: [&str; 5] = ["advertisement", "ad", "banner", "popup", "modal"];
const NOISE_IDS: [&str; 1] = ["ad"];

/// Main-content candidates, highest priority first.
const MAIN_SELECTORS: [&str; 6] = ["main", "article", ".content", "#content", ".main", "#main"];

pub const MAX_NAV_LABELS: usize = 10;

pub(crate) fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn is_noise(el: &html_scraper::node::Element) -> bool {
    if NOISE_TAGS.contains(&el.name()) {
        return true;
    }
    if el.classes().any(|c| NOISE_CLASSES.contains(&c)) {
        return true;
    }
    el.id().is_some_and(|id| NOISE_IDS.contains(&id))
}

/// True when some ancestor of `el` is a noise element.
pub(crate) fn within_noise(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| is_noise(a.value()))
}

fn push_visible_text(el: ElementRef<'_>, out: &mut String) {
    if is_noise(el.value()) {
        return;
    }
    for child in el.children() {
        if let Some(t) = child.value().as_text() {
            out.push_str(t);
        } else if let Some(c) = ElementRef::wrap(child) {
            push_visible_text(c, out);
        }
    }
}

/// Text content of `el` with noise subtrees skipped (not whitespace-normalized).
pub(crate) fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_visible_text(el, &mut out);
    out
}

fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let el = doc.select(&sel).next()?;
    let v = el.value().attr(attr)?.trim().to_string();
    (!v.is_empty()).then_some(v)
}

fn document_title(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    let el = doc.select(&sel).next()?;
    let t = norm_ws(&el.text().collect::<String>());
    (!t.is_empty()).then_some(t)
}

fn pick_main_region(doc: &Html) -> Option<ElementRef<'_>> {
    for s in MAIN_SELECTORS {
        let Ok(sel) = Selector::parse(s) else {
            continue;
        };
        if let Some(el) = doc
            .select(&sel)
            .find(|el| !is_noise(el.value()) && !within_noise(el))
        {
            return Some(el);
        }
    }
    None
}

fn navigation_labels(doc: &Html, max: usize) -> String {
    let Ok(sel) = Selector::parse("nav a, header a") else {
        return String::new();
    };
    doc.select(&sel)
        .map(|a| norm_ws(&visible_text(a)))
        .filter(|t| !t.is_empty())
        .take(max)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run the website heuristics over a settled DOM.
///
/// `page_url` is the url the DOM was loaded from; relative article links resolve against
/// its origin.
pub fn extract_website_bundle(html: &str, page_url: &str) -> WebsiteBundle {
    let doc = Html::parse_document(html);

    let main_text = pick_main_region(&doc)
        .map(|el| norm_ws(&visible_text(el)))
        .unwrap_or_default();

    WebsiteBundle {
        description: first_attr(&doc, "meta[name=\"description\"]", "content").unwrap_or_default(),
        keywords: first_attr(&doc, "meta[name=\"keywords\"]", "content").unwrap_or_default(),
        navigation: navigation_labels(&doc, MAX_NAV_LABELS),
        main_text,
        articles: links::article_links(&doc, page_url, links::MAX_ARTICLES),
    }
}

/// Turn one browser snapshot into website-mode output.
///
/// The returned `url` is always the url the caller asked for, even after redirects.
pub fn website_content(request_url: &str, snap: &PageSnapshot) -> Result<WebsiteContent> {
    let page_url = if snap.final_url.trim().is_empty() {
        request_url
    } else {
        snap.final_url.as_str()
    };
    let bundle = extract_website_bundle(&snap.html, page_url);
    let title = match norm_ws(&snap.title) {
        t if !t.is_empty() => t,
        _ => document_title(&Html::parse_document(&snap.html)).unwrap_or_default(),
    };
    WebsiteContent::from_bundle(title, &bundle, request_url.to_string())
}

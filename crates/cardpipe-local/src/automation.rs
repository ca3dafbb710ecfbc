use crate::{extract, search};
use cardpipe_core::{
    parse_http_url, Acquirer, BrowserEndpoint, Error, PageSnapshot, PageTask, PageTimeouts,
    Result, SearchResult, WebsiteContent,
};
use std::future::Future;
use std::time::{Duration, Instant};

/// Bounded retry budget for one acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(2_000),
        }
    }
}

/// Where a retry loop currently is.
#[derive(Debug)]
pub enum RetryState<T> {
    Attempting(u32),
    Succeeded(T),
    Exhausted(Error),
}

/// Run `run(attempt)` until it succeeds, the error is not retryable, or the budget is spent.
///
/// Attempts are strictly sequential: attempt n+1 starts only after attempt n's future has
/// completed (and with it, released whatever it acquired). The last error is returned on
/// exhaustion; nothing from earlier attempts is reused.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut run: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = RetryState::Attempting(1);
    loop {
        state = match state {
            RetryState::Attempting(n) => match run(n).await {
                Ok(v) => RetryState::Succeeded(v),
                Err(e) if e.is_retryable() && n < max_attempts => {
                    tracing::warn!(
                        attempt = n,
                        max_attempts,
                        error = %e,
                        delay_ms = policy.delay.as_millis() as u64,
                        "acquisition attempt failed; retrying"
                    );
                    if !policy.delay.is_zero() {
                        tokio::time::sleep(policy.delay).await;
                    }
                    RetryState::Attempting(n + 1)
                }
                Err(e) => {
                    tracing::error!(attempt = n, max_attempts, error = %e, "acquisition failed");
                    RetryState::Exhausted(e)
                }
            },
            RetryState::Succeeded(v) => return Ok(v),
            RetryState::Exhausted(e) => return Err(e),
        };
    }
}

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub timeouts: PageTimeouts,
    pub retry: RetryPolicy,
    /// Search page url; `{query}` is replaced by the encoded keyword.
    pub search_url_template: String,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            timeouts: PageTimeouts::default(),
            retry: RetryPolicy::default(),
            search_url_template: search::DEFAULT_SEARCH_URL_TEMPLATE.to_string(),
        }
    }
}

/// Drives a [`BrowserEndpoint`] with the retry policy and the extraction heuristics.
pub struct AutomationDriver<E> {
    endpoint: E,
    config: AutomationConfig,
}

impl<E: BrowserEndpoint> AutomationDriver<E> {
    pub fn new(endpoint: E, config: AutomationConfig) -> Self {
        Self { endpoint, config }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// One full attempt: connect, load, extract, close.
    ///
    /// The session is closed on every path out of this function once `connect` succeeded.
    async fn attempt<T, F>(&self, task: &PageTask, attempt: u32, extract: F) -> Result<T>
    where
        F: FnOnce(&PageSnapshot) -> Result<T> + Send,
        T: Send,
    {
        let t0 = Instant::now();
        tracing::debug!(attempt, url = task.url(), "connecting to browser endpoint");
        let mut session = self.endpoint.connect().await?;

        let out = match session.load(task, &self.config.timeouts).await {
            Ok(snap) => extract(&snap),
            Err(e) => Err(e),
        };

        if let Err(e) = session.close().await {
            tracing::warn!(attempt, error = %e, "failed to release browser session");
        }
        tracing::debug!(
            attempt,
            ok = out.is_ok(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "attempt finished"
        );
        out
    }
}

#[async_trait::async_trait]
impl<E: BrowserEndpoint> Acquirer for AutomationDriver<E> {
    async fn search(&self, keyword: &str) -> Result<Vec<SearchResult>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(Error::InvalidRequest("search keyword must be non-empty".to_string()));
        }
        let url = search::search_url(&self.config.search_url_template, keyword);
        let task = PageTask::Search {
            url: url.clone(),
            wait_selector: search::RESULTS_SELECTOR.to_string(),
        };
        tracing::info!(keyword, "searching");
        let (task, url) = (&task, url.as_str());
        let results = run_with_retry(&self.config.retry, move |n| {
            self.attempt(task, n, move |snap| {
                Ok(search::results_from_snapshot(snap, url))
            })
        })
        .await?;
        tracing::info!(keyword, results = results.len(), "search results extracted");
        Ok(results)
    }

    async fn scrape_website(&self, url: &str) -> Result<WebsiteContent> {
        // Validate up front; the output keeps the caller's spelling of the url.
        parse_http_url(url)?;
        let url = url.trim();
        let task = PageTask::Website {
            url: url.to_string(),
        };
        tracing::info!(url, "scraping website");
        let task = &task;
        let content = run_with_retry(&self.config.retry, move |n| {
            self.attempt(task, n, move |snap| extract::website_content(url, snap))
        })
        .await?;
        tracing::info!(
            url,
            has_title = !content.title.is_empty(),
            content_len = content.content.len(),
            "website content extracted"
        );
        Ok(content)
    }
}

use cardpipe_core::{
    AutomationSession, BrowserEndpoint, Error, PageSnapshot, PageTask, PageTimeouts, Result,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};

pub const DEFAULT_CDP_ENDPOINT: &str = "http://localhost:9222";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Extra wall-clock allowance on top of each operation's own timeout.
const HARD_TIMEOUT_SLACK: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HTML_BYTES: usize = 5_000_000;

#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Remote browser control endpoint (Chrome started with `--remote-debugging-port`).
    pub cdp_endpoint: String,
    pub node_bin: String,
    /// Explicit NODE_PATH override for locating the Playwright package.
    pub node_path: Option<String>,
    pub user_agent: String,
    pub connect_timeout_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            cdp_endpoint: DEFAULT_CDP_ENDPOINT.to_string(),
            node_bin: "node".to_string(),
            node_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout_ms: 30_000,
        }
    }
}

// Line-delimited JSON protocol: one command per stdin line, one response per stdout line.
// Every response echoes the `op` it answers. Commands run strictly in order; the browser
// is released on `close` and on stdin EOF.
const JS: &str = r#"
const readline = require('readline');

let currentOp = null;
function send(obj) { process.stdout.write(JSON.stringify(obj) + '\n'); }
function fail(code, message) { send({ ok: false, op: currentOp, error: { code, message: String(message) } }); }
function messageOf(e) { return String(e && e.message ? e.message : e); }
function isTimeout(e) { return !!e && (e.name === 'TimeoutError' || /timeout/i.test(messageOf(e))); }

let pw = null;
for (const name of ['playwright-core', 'playwright']) {
  try { pw = require(name); break; } catch (_) {}
}

let browser = null;
let context = null;

async function release() {
  try { if (context) await context.close(); } catch (_) {}
  try { if (browser) await browser.close(); } catch (_) {}
  context = null;
  browser = null;
}

async function connect(req) {
  if (!pw) {
    return fail('not_configured',
      'Playwright is not installed for Node.js (require("playwright-core") failed). ' +
      'Install it with `npm i -g playwright-core` or point CARDPIPE_NODE_PATH at its node_modules.');
  }
  try {
    browser = await pw.chromium.connectOverCDP(req.endpoint, { timeout: req.timeout_ms });
  } catch (e) {
    return fail('connection_fault', `could not connect to ${req.endpoint}: ${messageOf(e)}`);
  }
  try {
    context = await browser.newContext({
      userAgent: req.user_agent,
      viewport: { width: 1920, height: 1080 },
    });
  } catch (e) {
    return fail('connection_fault', `could not open a browsing context: ${messageOf(e)}`);
  }
  send({ ok: true, op: 'connect' });
}

async function load(req) {
  if (!context) return fail('automation_failed', 'load before connect');
  const page = await context.newPage();
  page.setDefaultTimeout(req.navigation_timeout_ms);
  page.setDefaultNavigationTimeout(req.navigation_timeout_ms);
  try {
    await page.goto(req.url, { waitUntil: 'networkidle', timeout: req.navigation_timeout_ms });
  } catch (e) {
    return fail(isTimeout(e) ? 'navigation_timeout' : 'navigation_failed', `${req.url}: ${messageOf(e)}`);
  }
  if (req.kind === 'website') {
    await page.waitForLoadState('domcontentloaded');
    await page.waitForTimeout(req.settle_ms);
  } else {
    try {
      await page.waitForSelector(req.wait_selector, { timeout: req.selector_timeout_ms });
    } catch (e) {
      return fail('extraction_empty', `${req.wait_selector} did not appear within ${req.selector_timeout_ms}ms`);
    }
  }
  const title = await page.title();
  const html = await page.content();
  send({ ok: true, op: 'load', title, html, final_url: page.url() });
}

async function main() {
  const rl = readline.createInterface({ input: process.stdin, terminal: false });
  for await (const line of rl) {
    if (!line.trim()) continue;
    let req;
    currentOp = null;
    try { req = JSON.parse(line); } catch (_) { fail('automation_failed', 'bad JSON command'); continue; }
    currentOp = req.op;
    try {
      if (req.op === 'connect') await connect(req);
      else if (req.op === 'load') await load(req);
      else if (req.op === 'close') { await release(); send({ ok: true, op: 'close' }); break; }
      else fail('automation_failed', `unknown op ${req.op}`);
    } catch (e) {
      fail('automation_failed', messageOf(e));
    }
  }
  await release();
}

main().then(() => process.exit(0)).catch((e) => { fail('automation_failed', messageOf(e)); process.exit(0); });
"#;

fn node_path_candidates() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn has_playwright(root: &str) -> bool {
    let root = std::path::PathBuf::from(root.trim());
    ["playwright-core", "playwright"]
        .iter()
        .any(|p| root.join(p).is_dir())
}

/// NODE_PATH to hand the driver, when Playwright is not already resolvable.
fn detect_node_path(explicit: Option<&str>) -> Option<String> {
    if let Some(v) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(v.to_string());
    }
    let existing = std::env::var("NODE_PATH").unwrap_or_default();
    if existing.split(':').any(has_playwright) {
        return None;
    }
    let found = node_path_candidates().into_iter().find(|r| has_playwright(r))?;
    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

/// Map a driver `{ok:false, error:{code, message}}` line to the error taxonomy.
fn driver_error(v: &serde_json::Value) -> Error {
    let code = v
        .pointer("/error/code")
        .and_then(|x| x.as_str())
        .unwrap_or("automation_failed");
    let message = v
        .pointer("/error/message")
        .and_then(|x| x.as_str())
        .unwrap_or("browser driver failed")
        .to_string();
    match code {
        "not_configured" => Error::NotConfigured(message),
        "connection_fault" => Error::Connection(message),
        "navigation_timeout" => Error::NavigationTimeout(message),
        "navigation_failed" => Error::Navigation(message),
        "extraction_empty" => Error::ExtractionEmpty(message),
        _ => Error::Automation(message),
    }
}

/// Validate a `load` response at the browser boundary.
fn snapshot_from_response(v: serde_json::Value) -> Result<PageSnapshot> {
    let snap: PageSnapshot = serde_json::from_value(v)
        .map_err(|e| Error::Automation(format!("browser driver returned a bad page: {e}")))?;
    if snap.html.trim().is_empty() {
        return Err(Error::Automation(
            "browser driver returned empty HTML".to_string(),
        ));
    }
    if snap.html.len() > MAX_HTML_BYTES {
        return Err(Error::Automation(format!(
            "page HTML too large ({} bytes > {MAX_HTML_BYTES})",
            snap.html.len()
        )));
    }
    Ok(snap)
}

/// Spawns one Node.js + Playwright driver per attempt and connects it over CDP.
#[derive(Debug, Clone, Default)]
pub struct PlaywrightEndpoint {
    config: PlaywrightConfig,
}

impl PlaywrightEndpoint {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }

    fn spawn(&self) -> Result<PlaywrightSession> {
        let mut cmd = tokio::process::Command::new(&self.config.node_bin);
        if let Some(node_path) = detect_node_path(self.config.node_path.as_deref()) {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd
            .arg("-e")
            .arg(JS)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "browser automation requires Node.js (`{}`) and the Playwright npm package: {e}",
                    self.config.node_bin
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Automation("browser driver: missing stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Automation("browser driver: missing stdout pipe".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
                buf
            })
        });

        Ok(PlaywrightSession {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
            closed: false,
        })
    }
}

#[async_trait::async_trait]
impl BrowserEndpoint for PlaywrightEndpoint {
    async fn connect(&self) -> Result<Box<dyn AutomationSession>> {
        let mut session = self.spawn()?;
        let cmd = serde_json::json!({
            "op": "connect",
            "endpoint": self.config.cdp_endpoint,
            "timeout_ms": self.config.connect_timeout_ms,
            "user_agent": self.config.user_agent,
        });
        let hard = Duration::from_millis(self.config.connect_timeout_ms) + HARD_TIMEOUT_SLACK;
        match session.exchange(cmd, hard).await {
            Ok(_) => {
                tracing::debug!(endpoint = %self.config.cdp_endpoint, "browser endpoint connected");
                Ok(Box::new(session))
            }
            Err(e) => {
                // Nothing to release remotely; just make sure the driver is gone.
                session.kill().await;
                Err(e)
            }
        }
    }
}

/// Interpret one stdout line as the reply to `op`.
///
/// `None` for stray output (library warnings) and for replies to an earlier command,
/// e.g. a `load` that finished after its hard timeout fired.
fn reply_to(op: &str, line: &str) -> Option<Result<serde_json::Value>> {
    let v = serde_json::from_str::<serde_json::Value>(line.trim()).ok()?;
    let ok = v.get("ok").and_then(|x| x.as_bool())?;
    if v.get("op").and_then(|x| x.as_str()) != Some(op) {
        return None;
    }
    Some(if ok { Ok(v) } else { Err(driver_error(&v)) })
}

/// One Node.js driver process holding one browsing context.
pub struct PlaywrightSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
    stderr_task: Option<tokio::task::JoinHandle<Vec<u8>>>,
    closed: bool,
}

impl PlaywrightSession {
    async fn exchange(
        &mut self,
        cmd: serde_json::Value,
        hard_timeout: Duration,
    ) -> Result<serde_json::Value> {
        let op = cmd
            .get("op")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string();
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Automation("browser session already closed".to_string()))?;
        let mut line = cmd.to_string();
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Automation(format!("browser driver stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Automation(format!("browser driver stdin: {e}")))?;

        let deadline = tokio::time::Instant::now() + hard_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.stdout.next_line())
                .await
                .map_err(|_| {
                    Error::Automation(format!(
                        "browser driver hard timeout after {}ms",
                        hard_timeout.as_millis()
                    ))
                })?
                .map_err(|e| Error::Automation(format!("browser driver stdout: {e}")))?;
            let Some(line) = next else {
                let stderr = self.stderr_excerpt().await;
                return Err(Error::Automation(if stderr.is_empty() {
                    "browser driver exited without a response".to_string()
                } else {
                    format!("browser driver exited without a response. stderr: {stderr}")
                }));
            };
            match reply_to(&op, &line) {
                Some(reply) => return reply,
                None => {
                    tracing::debug!(op = %op, "skipping driver output that does not answer the command");
                }
            }
        }
    }

    async fn stderr_excerpt(&mut self) -> String {
        let Some(task) = self.stderr_task.take() else {
            return String::new();
        };
        let buf = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default();
        let s = String::from_utf8_lossy(&buf).trim().to_string();
        s.chars().take(500).collect()
    }

    async fn kill(&mut self) {
        self.closed = true;
        self.stdin.take();
        let _ = self.child.kill().await;
        if let Some(t) = self.stderr_task.take() {
            t.abort();
        }
    }
}

#[async_trait::async_trait]
impl AutomationSession for PlaywrightSession {
    async fn load(&mut self, task: &PageTask, timeouts: &PageTimeouts) -> Result<PageSnapshot> {
        let cmd = match task {
            PageTask::Website { url } => serde_json::json!({
                "op": "load",
                "kind": "website",
                "url": url,
                "navigation_timeout_ms": timeouts.navigation_ms,
                "settle_ms": timeouts.settle_ms,
            }),
            PageTask::Search { url, wait_selector } => serde_json::json!({
                "op": "load",
                "kind": "search",
                "url": url,
                "wait_selector": wait_selector,
                "navigation_timeout_ms": timeouts.navigation_ms,
                "selector_timeout_ms": timeouts.selector_ms,
            }),
        };
        let budget_ms = timeouts
            .navigation_ms
            .saturating_add(timeouts.selector_ms.max(timeouts.settle_ms));
        let hard = Duration::from_millis(budget_ms) + HARD_TIMEOUT_SLACK;
        let v = self.exchange(cmd, hard).await?;
        snapshot_from_response(v)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let said_bye = self
            .exchange(serde_json::json!({ "op": "close" }), CLOSE_TIMEOUT)
            .await;
        // EOF also makes the driver release and exit.
        self.stdin.take();
        if tokio::time::timeout(CLOSE_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            let _ = self.child.kill().await;
        }
        if let Some(t) = self.stderr_task.take() {
            t.abort();
        }
        said_bye.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_are_matched_to_the_command_sent() {
        let late_load = r#"{"ok":true,"op":"load","title":"t","html":"<p>x</p>","final_url":"https://e.com"}"#;
        assert!(reply_to("close", late_load).is_none());
        assert!(reply_to("close", "(node:1) ExperimentalWarning: something").is_none());
        assert!(reply_to("close", r#"{"ok":true,"op":"close"}"#).is_some_and(|r| r.is_ok()));

        let err = reply_to(
            "load",
            r#"{"ok":false,"op":"load","error":{"code":"navigation_timeout","message":"slow"}}"#,
        )
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, Error::NavigationTimeout(_)));
        assert!(reply_to(
            "close",
            r#"{"ok":false,"op":"load","error":{"code":"navigation_failed","message":"x"}}"#,
        )
        .is_none());
    }

    #[test]
    fn driver_error_codes_map_onto_taxonomy() {
        let e = |code: &str| {
            driver_error(&serde_json::json!({"ok": false, "error": {"code": code, "message": "m"}}))
        };
        assert!(matches!(e("connection_fault"), Error::Connection(_)));
        assert!(matches!(e("navigation_timeout"), Error::NavigationTimeout(_)));
        assert!(matches!(e("navigation_failed"), Error::Navigation(_)));
        assert!(matches!(e("extraction_empty"), Error::ExtractionEmpty(_)));
        assert!(matches!(e("not_configured"), Error::NotConfigured(_)));
        assert!(matches!(e("weird"), Error::Automation(_)));
        assert!(matches!(
            driver_error(&serde_json::json!({"ok": false})),
            Error::Automation(ref m) if m == "browser driver failed"
        ));
    }

    #[test]
    fn snapshot_boundary_rejects_empty_html() {
        let v = serde_json::json!({"ok": true, "op": "load", "title": "t", "html": "  ", "final_url": "https://e.com"});
        assert!(matches!(snapshot_from_response(v), Err(Error::Automation(_))));

        let v = serde_json::json!({"ok": true, "op": "load", "title": "t", "html": "<html></html>", "final_url": "https://e.com"});
        let snap = snapshot_from_response(v).unwrap();
        assert_eq!(snap.title, "t");
        assert_eq!(snap.final_url, "https://e.com");
    }

    #[test]
    fn explicit_node_path_wins() {
        assert_eq!(
            detect_node_path(Some(" /opt/x/node_modules ")).as_deref(),
            Some("/opt/x/node_modules")
        );
    }

    #[tokio::test]
    async fn missing_node_binary_is_not_configured() {
        let ep = PlaywrightEndpoint::new(PlaywrightConfig {
            node_bin: "/nonexistent/cardpipe-node-binary".to_string(),
            ..PlaywrightConfig::default()
        });
        let err = match ep.connect().await {
            Ok(_) => panic!("expected spawn failure"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::NotConfigured(_)), "{err}");
        assert!(!err.is_retryable());
    }
}

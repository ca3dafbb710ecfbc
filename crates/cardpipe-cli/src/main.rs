use anyhow::{Context, Result};
use cardpipe_core::{
    user_facing_message, AcquireRequest, AcquireSearch, AcquireWebsite, Acquirer, CardStore,
    SynthesisRequest, UpdateFrequency,
};
use cardpipe_local::automation::AutomationDriver;
use cardpipe_local::config::AppConfig;
use cardpipe_local::openai_compat::OpenAiCompatClient;
use cardpipe_local::render_playwright::PlaywrightEndpoint;
use cardpipe_local::service::CardService;
use cardpipe_local::synthesis::SynthesisClient;
use cardpipe_local::FsCardStore;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cardpipe")]
#[command(about = "Turn a website or a search keyword into a knowledge card", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the browser and print the acquired material (json).
    Acquire(AcquireCmd),
    /// Run one synthesis request (`{"action": "generate" | "update", ...}`) and print the result.
    Synthesize(SynthesizeCmd),
    /// Create and store a new card.
    #[command(subcommand)]
    Create(CreateCmd),
    /// Re-acquire a stored card's source and merge the new content into it.
    Refresh(CardIdCmd),
    /// Print a stored card.
    Show(CardIdCmd),
    /// List stored cards, newest first.
    List,
    /// Delete a stored card.
    Delete(CardIdCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum AcquireKind {
    Search,
    Website,
}

#[derive(clap::Args, Debug)]
struct AcquireCmd {
    /// Search keyword, or the page url when `--type website`.
    #[arg(long)]
    keyword: String,
    #[arg(long = "type", value_enum, default_value = "search")]
    kind: AcquireKind,
}

#[derive(clap::Args, Debug)]
struct SynthesizeCmd {
    /// Request file, or `-` for stdin.
    #[arg(long)]
    request: String,
}

#[derive(clap::Args, Debug)]
struct CardOpts {
    /// Tag to use when synthesis proposes none (repeatable).
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// daily|weekly|monthly
    #[arg(long, default_value = "weekly")]
    frequency: UpdateFrequency,
}

#[derive(Subcommand, Debug)]
enum CreateCmd {
    /// Card built from one website.
    Website {
        url: String,
        #[command(flatten)]
        opts: CardOpts,
    },
    /// Card built from search results for a keyword.
    Keyword {
        keyword: String,
        #[command(flatten)]
        opts: CardOpts,
    },
}

#[derive(clap::Args, Debug)]
struct CardIdCmd {
    id: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Probe the browser endpoint and the Node.js runtime.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    check_browser: bool,
    /// Timeout for each probe (ms).
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn driver(cfg: &AppConfig) -> AutomationDriver<PlaywrightEndpoint> {
    AutomationDriver::new(
        PlaywrightEndpoint::new(cfg.playwright.clone()),
        cfg.automation.clone(),
    )
}

fn synthesis_client(cfg: &AppConfig) -> cardpipe_core::Result<SynthesisClient<OpenAiCompatClient>> {
    let backend = OpenAiCompatClient::new(reqwest::Client::new(), &cfg.completion)?;
    Ok(SynthesisClient::new(backend))
}

fn card_service(
    cfg: &AppConfig,
) -> cardpipe_core::Result<CardService<AutomationDriver<PlaywrightEndpoint>, OpenAiCompatClient, FsCardStore>>
{
    Ok(CardService::new(
        driver(cfg),
        synthesis_client(cfg)?,
        FsCardStore::new(cfg.store_dir.clone()),
    ))
}

fn read_request(src: &str) -> Result<String> {
    if src.trim() == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("read request from stdin")?;
        Ok(s)
    } else {
        std::fs::read_to_string(src).with_context(|| format!("read request file {src}"))
    }
}

// Optional env-file loader (opt-in via CARDPIPE_ENV_FILE).
// Sets only keys missing from the process environment; values are never logged.
fn load_env_file() {
    let Ok(p) = std::env::var("CARDPIPE_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn probe_node(node_bin: &str, timeout: Duration) -> serde_json::Value {
    let t0 = std::time::Instant::now();
    let run = tokio::process::Command::new(node_bin)
        .arg("--version")
        .kill_on_drop(true)
        .output();
    let (ok, detail) = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(out)) if out.status.success() => (
            true,
            String::from_utf8_lossy(&out.stdout).trim().to_string(),
        ),
        Ok(Ok(out)) => (false, format!("exit status {}", out.status)),
        Ok(Err(e)) => (false, e.to_string()),
        Err(_) => (false, "timed out".to_string()),
    };
    serde_json::json!({
        "name": "node_runtime",
        "ok": ok,
        "message": detail,
        "hint": if ok { "" } else { "Install Node.js and the playwright-core package, or set CARDPIPE_NODE." },
        "elapsed_ms": t0.elapsed().as_millis() as u64,
    })
}

async fn probe_cdp(endpoint: &str, timeout: Duration) -> serde_json::Value {
    let t0 = std::time::Instant::now();
    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let res = reqwest::Client::new().get(&url).timeout(timeout).send().await;
    let (ok, detail) = match res {
        Ok(r) if r.status().is_success() => (true, "browser endpoint answered".to_string()),
        Ok(r) => (false, format!("HTTP {}", r.status())),
        Err(e) => (false, e.to_string()),
    };
    serde_json::json!({
        "name": "browser_endpoint",
        "ok": ok,
        "message": detail,
        "hint": if ok { "" } else { "Start Chrome with --remote-debugging-port=9222 or set CARDPIPE_CDP_ENDPOINT." },
        "elapsed_ms": t0.elapsed().as_millis() as u64,
    })
}

async fn doctor(args: DoctorCmd) -> Result<serde_json::Value> {
    let t0 = std::time::Instant::now();
    let mut checks: Vec<serde_json::Value> = Vec::new();

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            checks.push(serde_json::json!({
                "name": "config",
                "ok": false,
                "message": e.to_string(),
                "hint": "Fix the CARDPIPE_* variables or the settings file.",
            }));
            return Ok(serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": false,
                "name": "cardpipe",
                "version": env!("CARGO_PKG_VERSION"),
                "checks": checks,
                "elapsed_ms": t0.elapsed().as_millis() as u64,
            }));
        }
    };

    let store_ok = (|| -> std::io::Result<()> {
        std::fs::create_dir_all(&cfg.store_dir)?;
        let probe = cfg.store_dir.join(".cardpipe-doctor.probe");
        std::fs::write(&probe, b"ok")?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    })()
    .is_ok();
    checks.push(serde_json::json!({
        "name": "store_dir_writable",
        "ok": store_ok,
        "message": if store_ok { "store dir is writable" } else { "store dir is not writable" },
        "hint": if store_ok { "" } else { "Set CARDPIPE_STORE_DIR to a writable directory." },
    }));

    let has_key = cfg.completion.api_key.is_some();
    checks.push(serde_json::json!({
        "name": "api_key",
        "ok": has_key,
        "message": if has_key { "API key configured" } else { "no API key configured" },
        "hint": if has_key { "" } else { "Set CARDPIPE_API_KEY or apiKey in the settings file." },
    }));

    if args.check_browser {
        let timeout = Duration::from_millis(args.timeout_ms);
        checks.push(probe_node(&cfg.playwright.node_bin, timeout).await);
        checks.push(probe_cdp(&cfg.playwright.cdp_endpoint, timeout).await);
    }

    let ok = checks.iter().all(|c| c["ok"].as_bool() == Some(true));
    Ok(serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "cardpipe",
        "version": env!("CARGO_PKG_VERSION"),
        "configured": {
            "api_key": has_key,
            "model": cfg.completion.model,
            "base_url": cfg.completion.base_url,
            "cdp_endpoint": cfg.playwright.cdp_endpoint,
            "search_url": cfg.automation.search_url_template,
            "store_dir": cfg.store_dir.display().to_string(),
            "settings_file": cfg.settings_path.as_ref().map(|p| p.display().to_string()),
            "retry_max_attempts": cfg.automation.retry.max_attempts,
        },
        "checks": checks,
        "elapsed_ms": t0.elapsed().as_millis() as u64,
    }))
}

async fn run(command: Commands) -> Result<serde_json::Value> {
    match command {
        Commands::Acquire(args) => {
            let cfg = AppConfig::from_env()?;
            let req = match args.kind {
                AcquireKind::Search => AcquireRequest::Search(AcquireSearch {
                    keyword: args.keyword,
                }),
                AcquireKind::Website => AcquireRequest::Website(AcquireWebsite { url: args.keyword }),
            };
            let out = driver(&cfg).acquire(&req).await?;
            Ok(serde_json::to_value(out)?)
        }
        Commands::Synthesize(args) => {
            let cfg = AppConfig::from_env()?;
            let client = synthesis_client(&cfg)?;
            let raw = read_request(&args.request)?;
            let req: SynthesisRequest =
                serde_json::from_str(&raw).context("parse synthesis request")?;
            let out = client.synthesize(&req).await?;
            Ok(serde_json::to_value(out)?)
        }
        Commands::Create(target) => {
            let cfg = AppConfig::from_env()?;
            let svc = card_service(&cfg)?;
            let card = match target {
                CreateCmd::Website { url, opts } => {
                    svc.create_from_website(&url, &opts.tags, opts.frequency)
                        .await?
                }
                CreateCmd::Keyword { keyword, opts } => {
                    svc.create_from_keyword(&keyword, &opts.tags, opts.frequency)
                        .await?
                }
            };
            Ok(serde_json::to_value(card)?)
        }
        Commands::Refresh(args) => {
            let cfg = AppConfig::from_env()?;
            let card = card_service(&cfg)?.refresh(&args.id).await?;
            Ok(serde_json::to_value(card)?)
        }
        Commands::Show(args) => {
            let cfg = AppConfig::from_env()?;
            let card = FsCardStore::new(cfg.store_dir.clone())
                .get(&args.id)
                .await?
                .ok_or_else(|| cardpipe_core::Error::NotFound(format!("card {}", args.id)))?;
            Ok(serde_json::to_value(card)?)
        }
        Commands::List => {
            let cfg = AppConfig::from_env()?;
            let cards = FsCardStore::new(cfg.store_dir.clone()).list()?;
            Ok(serde_json::to_value(cards)?)
        }
        Commands::Delete(args) => {
            let cfg = AppConfig::from_env()?;
            FsCardStore::new(cfg.store_dir.clone())
                .delete(&args.id)
                .await?;
            tracing::info!(card_id = %args.id, "card deleted");
            Ok(serde_json::json!({ "deleted": args.id }))
        }
        Commands::Doctor(args) => doctor(args).await,
        Commands::Version(_) => Ok(serde_json::json!({
            "schema_version": 1,
            "kind": "version",
            "ok": true,
            "name": "cardpipe",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    }
}

fn error_envelope(err: &anyhow::Error) -> serde_json::Value {
    match err.downcast_ref::<cardpipe_core::Error>() {
        Some(e) => serde_json::json!({
            "error": user_facing_message(e),
            "code": e.code(),
        }),
        None => serde_json::json!({
            "error": format!("{err:#}"),
            "code": "invalid_request",
        }),
    }
}

#[tokio::main]
async fn main() {
    load_env_file();
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Version(args) = &cli.command {
        if args.output.eq_ignore_ascii_case("text") {
            println!("cardpipe {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    }

    match run(cli.command).await {
        Ok(v) => println!("{v}"),
        Err(e) => {
            tracing::debug!(error = %format!("{e:#}"), "command failed");
            println!("{}", error_envelope(&e));
            std::process::exit(1);
        }
    }
}

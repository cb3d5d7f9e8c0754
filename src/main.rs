use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use futures_util::future::BoxFuture;
use livechat::adapter::SupabaseAdapter;
use livechat::config::ChatConfig;
use livechat::identity::{MemorySessionStore, resolve_identity, user_from_url};
use livechat::session::{ChatSession, Outcome};
use livechat::types::ChatStatus;
use livechat::view::{self, Composer, KeyAction, Transcript};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "livechat", about = "Terminal client for the live chat demo")]
struct Cli {
    /// Display name for this session.
    #[arg(long, env = "LIVECHAT_USER")]
    user: Option<String>,

    /// Page URL; its `user` query parameter is used when --user is absent.
    #[arg(long, env = "LIVECHAT_URL")]
    url: Option<String>,

    /// Snapshot row limit; overrides CHAT_MAX_MESSAGES.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
enum Intent {
    Send,
    Clear,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn open_session(cli: &Cli) -> ChatSession {
    let store = MemorySessionStore::default();
    let requested = cli.user.clone().or_else(|| cli.url.as_deref().and_then(user_from_url));
    let identity = resolve_identity(requested.as_deref(), &store);

    let connected = ChatConfig::from_env().and_then(|mut config| {
        if let Some(limit) = cli.limit {
            config.max_messages = limit;
        }
        let adapter = SupabaseAdapter::new(&config)?;
        Ok((adapter, config.max_messages))
    });

    match connected {
        Ok((adapter, limit)) => {
            info!(user = %identity, limit, "starting chat session");
            ChatSession::start(Arc::new(adapter), identity, limit)
        }
        Err(error) => {
            warn!(%error, "chat backend unavailable");
            ChatSession::unavailable(identity, &error)
        }
    }
}

fn print_lines(lines: &[String]) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

fn notice(text: &str) -> Result<(), CliError> {
    print_lines(&[format!("   {text}")])
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let session = open_session(&cli);
    let identity = session.identity().to_owned();
    let mut updates = session.watch();
    let mut transcript = Transcript::default();
    let mut composer = Composer::default();
    let mut confirm_clear = false;
    let mut pending: Option<BoxFuture<'_, (Intent, Outcome)>> = None;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    print_lines(&transcript.render(&updates.borrow_and_update(), &identity))?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let lines = transcript.render(&updates.borrow_and_update(), &identity);
                print_lines(&lines)?;
            }
            Some((intent, outcome)) = async {
                match pending.as_mut() {
                    Some(fut) => Some(fut.await),
                    None => None,
                }
            }, if pending.is_some() => {
                pending = None;
                if let Intent::Send = intent {
                    composer.finish_send(outcome);
                }
            }
            line = input.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let status = session.state().status;

                if confirm_clear {
                    confirm_clear = false;
                    if matches!(line.trim(), "y" | "Y" | "yes") && pending.is_none() {
                        pending = Some(Box::pin(async { (Intent::Clear, session.clear().await) }));
                    } else {
                        notice("clear cancelled")?;
                    }
                    continue;
                }

                match line.trim() {
                    "/quit" => break,
                    "/clear" => {
                        if view::show_clear(status) {
                            confirm_clear = true;
                            notice("Clear all messages for everyone? [y/N]")?;
                        } else {
                            notice(view::input_placeholder(status))?;
                        }
                        continue;
                    }
                    _ => {}
                }

                if composer.sending || pending.is_some() {
                    notice("still sending, try again")?;
                    continue;
                }

                let (text, shift) = match line.strip_suffix('\\') {
                    Some(head) => (head, true),
                    None => (line.as_str(), false),
                };
                match view::key_action("Enter", shift) {
                    KeyAction::NewLine => composer.push_line(text),
                    KeyAction::Send => {
                        composer.push_line(text);
                        if let Some(body) = composer.begin_send(status) {
                            let session = &session;
                            pending = Some(Box::pin(async move { (Intent::Send, session.send(&body).await) }));
                        } else {
                            composer.draft.clear();
                            if status != ChatStatus::Ready {
                                notice(view::input_placeholder(status))?;
                            }
                        }
                    }
                    KeyAction::Passthrough => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(pending);
    session.teardown();
    Ok(())
}

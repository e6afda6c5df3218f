//! Smart Bookmarks CLI
//!
//! Terminal client for the bookmark dashboard:
//! - Sign in and out
//! - List, add and delete bookmarks
//! - Live dashboard that follows changes from other sessions

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use smart_bookmarks::auth::SessionGuard;
use smart_bookmarks::backend::{Backend, Bookmark, BookmarkId, MemoryBackend, SupabaseClient, User};
use smart_bookmarks::config::{generate_default_config, Config, LoggingConfig};
use smart_bookmarks::sync::{
    BookmarkList, DashboardState, Visibility, VisibilityHandle, WakeDetector, WriteOutcome,
};
use smart_bookmarks::views::{CurrentRoute, DashboardView, LandingView, Route};

#[derive(Parser)]
#[command(name = "bookmarks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Personal bookmark dashboard with live updates")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use an in-memory backend with a demo account
    #[arg(long, global = true)]
    pub offline: bool,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with the configured identity provider
    Login,

    /// Sign out
    Logout,

    /// Show session status
    Status,

    /// List bookmarks, newest first
    List,

    /// Add a bookmark
    Add {
        /// Display title
        title: String,
        /// Target URL
        url: String,
    },

    /// Delete a bookmark by id
    Delete {
        /// Bookmark id (see `bookmarks list`)
        id: String,
    },

    /// Open the live dashboard
    Dashboard,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return write_config(output.as_ref());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    tracing::debug!("Smart Bookmarks v{}", env!("CARGO_PKG_VERSION"));

    if cli.offline {
        let backend = Arc::new(offline_backend());
        run(&cli, &config, backend).await
    } else {
        let backend = Arc::new(
            SupabaseClient::new(config.supabase())
                .context("Set backend.url and backend.anon_key, or run with --offline")?,
        );
        run(&cli, &config, backend).await
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "smart_bookmarks={0},bookmarks={0}",
            config.level
        ))
    });

    let writer = match &config.file {
        Some(path) => {
            let path = PathBuf::from(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Cannot open log file {:?}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        // Keep stdout for command output
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init();
    }
    Ok(())
}

fn write_config(output: Option<&PathBuf>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content)?;
            println!("Config written to {:?}", path);
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// In-memory backend signed in as a demo user
fn offline_backend() -> MemoryBackend {
    let user = User {
        id: "offline-user".to_string(),
        email: Some("offline@localhost".to_string()),
    };
    let backend = MemoryBackend::new();
    backend.grant_on_exchange(user.clone());
    backend.sign_in_as(user.clone());
    backend.seed(&user.id, "Rust documentation", "https://doc.rust-lang.org");
    backend.seed(&user.id, "Supabase", "https://supabase.com");
    backend
}

async fn run<B: Backend + 'static>(cli: &Cli, config: &Config, backend: Arc<B>) -> anyhow::Result<()> {
    let route = Arc::new(CurrentRoute::new(Route::Landing));

    match &cli.command {
        Commands::Login => {
            let view = LandingView::new(Arc::clone(&backend), route.clone(), config.sign_in());
            if view.mount().await {
                println!("Already signed in.");
                return Ok(());
            }

            view.sign_in(|url| {
                println!("Open this URL in your browser to sign in:");
                println!();
                println!("  {}", url);
                println!();
                println!("Waiting for the redirect...");
            })
            .await?;
            print_status(backend.as_ref()).await?;
        }

        Commands::Logout => {
            SessionGuard::new(Arc::clone(&backend), route.clone())
                .sign_out()
                .await;
            println!("Signed out.");
        }

        Commands::Status => print_status(backend.as_ref()).await?,

        Commands::List => {
            let list = BookmarkList::new(backend);
            let status = list.resync().await;
            if !status.success {
                bail!(
                    "Failed to load bookmarks: {}",
                    status.error.unwrap_or_default()
                );
            }
            print_bookmarks(&list.bookmarks(), &cli.format)?;
        }

        Commands::Add { title, url } => {
            let list = BookmarkList::new(backend);
            list.set_title(title.as_str()).await;
            list.set_url(url.as_str()).await;
            match list.add_bookmark().await {
                WriteOutcome::Applied => println!("Added \"{}\".", title),
                WriteOutcome::Skipped => bail!("Both title and url are required"),
                WriteOutcome::Failed(e) => bail!("Failed to add bookmark: {}", e),
            }
        }

        Commands::Delete { id } => {
            let list = BookmarkList::new(backend);
            match list.delete_bookmark(&BookmarkId::new(id.as_str())).await {
                WriteOutcome::Failed(e) => bail!("Failed to delete bookmark: {}", e),
                _ => println!("Deleted {}.", id),
            }
        }

        Commands::Dashboard => run_dashboard(config, backend, route).await?,

        Commands::Config { output } => write_config(output.as_ref())?,
    }

    Ok(())
}

async fn print_status<B: Backend>(backend: &B) -> anyhow::Result<()> {
    match backend.session().await? {
        Some(session) => {
            println!("Signed in");
            println!("  User:    {}", session.user.id);
            if let Some(email) = &session.user.email {
                println!("  Email:   {}", email);
            }
            if let Some(expires) = session.expires() {
                println!("  Expires: {}", expires.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        None => {
            println!("Not signed in.");
            println!();
            println!("Sign in with:");
            println!("  bookmarks login");
        }
    }
    Ok(())
}

fn print_bookmarks(bookmarks: &[Bookmark], format: &str) -> anyhow::Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(bookmarks)?);
        return Ok(());
    }

    if bookmarks.is_empty() {
        println!("No bookmarks yet.");
        return Ok(());
    }

    println!("{:<4} {:<30} {:<40} {}", "#", "Title", "URL", "Added");
    println!("{}", "-".repeat(90));
    for (i, b) in bookmarks.iter().enumerate() {
        println!(
            "{:<4} {:<30} {:<40} {}",
            i + 1,
            truncate(&b.title, 30),
            truncate(&b.url, 40),
            b.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn header(state: &DashboardState) -> String {
    match state.synced_at {
        Some(at) => format!(
            "== Bookmarks == (synced {})",
            at.with_timezone(&chrono::Local).format("%H:%M:%S")
        ),
        None => "== Bookmarks == (not synced)".to_string(),
    }
}

fn render(state: &DashboardState) {
    println!();
    println!("{}", header(state));
    if let Some(error) = &state.last_error {
        println!("! {}", error);
    }
    for (i, b) in state.bookmarks.iter().enumerate() {
        println!("{:>3}. {}  <{}>", i + 1, b.title, b.url);
    }
    if state.bookmarks.is_empty() {
        println!("  (empty)");
    }
    println!("Commands: add <title> | <url>, del <n|id>, hide, show, logout, quit");
}

/// A line typed at the dashboard prompt
#[derive(Debug, PartialEq)]
enum DashboardCommand {
    Add { title: String, url: String },
    Delete(String),
    Hide,
    Show,
    Logout,
    Quit,
    Help,
}

fn parse_command(line: &str) -> Option<DashboardCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match word {
        "add" => {
            let (title, url) = rest.split_once('|').unwrap_or((rest, ""));
            Some(DashboardCommand::Add {
                title: title.trim().to_string(),
                url: url.trim().to_string(),
            })
        }
        "del" | "delete" if !rest.is_empty() => Some(DashboardCommand::Delete(rest.to_string())),
        "hide" => Some(DashboardCommand::Hide),
        "show" => Some(DashboardCommand::Show),
        "logout" => Some(DashboardCommand::Logout),
        "quit" | "exit" | "q" => Some(DashboardCommand::Quit),
        "help" | "?" => Some(DashboardCommand::Help),
        _ => None,
    }
}

/// Resolve a list position (1-based) or a literal id
fn resolve_target(target: &str, bookmarks: &[Bookmark]) -> BookmarkId {
    target
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| bookmarks.get(i))
        .map(|b| b.id.clone())
        .unwrap_or_else(|| BookmarkId::new(target))
}

async fn run_dashboard<B: Backend + 'static>(
    config: &Config,
    backend: Arc<B>,
    route: Arc<CurrentRoute>,
) -> anyhow::Result<()> {
    let visibility = VisibilityHandle::new();
    let detector = config
        .wake_detector()
        .map(|c| WakeDetector::new(visibility.clone(), c).spawn());

    let view = DashboardView::new(backend, route.clone(), visibility.clone());
    let Some(mounted) = view.mount().await else {
        println!("Not signed in. Run `bookmarks login` first.");
        if let Some(task) = detector {
            task.abort();
        }
        return Ok(());
    };

    let list = Arc::clone(mounted.list());
    let mut state = list.subscribe_state();
    render(&state.borrow_and_update());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sign_out = false;

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if visibility.current() == Visibility::Visible {
                    render(&state.borrow_and_update());
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Some(DashboardCommand::Add { title, url }) => {
                        list.set_title(title).await;
                        list.set_url(url).await;
                        if list.add_bookmark().await == WriteOutcome::Skipped {
                            println!("Both title and url are required: add <title> | <url>");
                        }
                    }
                    Some(DashboardCommand::Delete(target)) => {
                        let id = resolve_target(&target, &list.bookmarks());
                        list.delete_bookmark(&id).await;
                    }
                    Some(DashboardCommand::Hide) => {
                        visibility.hide();
                        println!("(hidden; type `show` to resume)");
                    }
                    Some(DashboardCommand::Show) => {
                        if !visibility.show() {
                            render(&state.borrow_and_update());
                        }
                    }
                    Some(DashboardCommand::Logout) => {
                        sign_out = true;
                        break;
                    }
                    Some(DashboardCommand::Quit) => break,
                    Some(DashboardCommand::Help) => render(&state.borrow_and_update()),
                    None if line.trim().is_empty() => {}
                    None => println!("Unknown command: {}", line.trim()),
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if sign_out {
        mounted.sign_out().await;
        println!("Signed out.");
    } else {
        mounted.unmount().await;
    }
    if let Some(task) = detector {
        task.abort();
    }
    tracing::debug!(route = %route.get(), "Dashboard closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bookmark(id: &str) -> Bookmark {
        Bookmark {
            id: BookmarkId::new(id),
            title: id.to_string(),
            url: format!("https://{}.example", id),
            user_id: "alice".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_header_shows_sync_time() {
        let mut state = DashboardState::default();
        assert_eq!(header(&state), "== Bookmarks == (not synced)");

        let at = Utc::now();
        state.synced_at = Some(at);
        let expected = at.with_timezone(&chrono::Local).format("%H:%M:%S").to_string();
        assert!(header(&state).ends_with(&format!("(synced {})", expected)));
    }

    #[test]
    fn test_parse_add() {
        assert_eq!(
            parse_command("add Rust book | https://doc.rust-lang.org/book/"),
            Some(DashboardCommand::Add {
                title: "Rust book".to_string(),
                url: "https://doc.rust-lang.org/book/".to_string(),
            })
        );
        // Missing url still parses; the add itself is skipped
        assert_eq!(
            parse_command("add Only a title"),
            Some(DashboardCommand::Add {
                title: "Only a title".to_string(),
                url: String::new(),
            })
        );
    }

    #[test]
    fn test_parse_other_commands() {
        assert_eq!(parse_command("del 2"), Some(DashboardCommand::Delete("2".to_string())));
        assert_eq!(parse_command("del"), None);
        assert_eq!(parse_command("  hide "), Some(DashboardCommand::Hide));
        assert_eq!(parse_command("q"), Some(DashboardCommand::Quit));
        assert_eq!(parse_command("frobnicate"), None);
    }

    #[test]
    fn test_resolve_target() {
        let rows = vec![bookmark("a"), bookmark("b")];
        assert_eq!(resolve_target("2", &rows), BookmarkId::new("b"));
        assert_eq!(resolve_target("0", &rows), BookmarkId::new("0"));
        assert_eq!(resolve_target("9", &rows), BookmarkId::new("9"));
        assert_eq!(resolve_target("a", &rows), BookmarkId::new("a"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        assert_eq!(truncate("much longer title", 8), "much lo…");
    }
}

//! MailDCN - command-line DCN monitor for the secure email server

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use maildcn_common::config::LoggingConfig;
use maildcn_common::types::ProtocolEvent;
use maildcn_common::Config;
use maildcn_core::api::{AnalysisRequest, CompositionRequest, ReplyRequest, TestEmailRequest};
use maildcn_core::session::KeyValueStore;
use maildcn_core::{
    ApiClient, AuthSession, FileStore, LocalChannel, MonitorCommand, MonitorHandle,
    MonitorService, NoticeLevel, PushChannel, SocketIoChannel,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod console;
mod render;

use console::{ConsoleCommand, DEMO_BATCHES};

#[derive(Parser)]
#[command(name = "maildcn")]
#[command(
    about = "Live protocol monitor for the AI-enhanced secure email server",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and remember the session
    Login {
        email: String,

        #[arg(short, long, env = "MAILDCN_PASSWORD")]
        password: String,
    },

    /// Create an account
    Signup {
        email: String,

        #[arg(short, long, env = "MAILDCN_PASSWORD")]
        password: String,
    },

    /// Forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Follow protocol events and walk through the delivery story
    Monitor {
        /// Request demonstration traffic once running
        #[arg(long)]
        demo: bool,

        /// Read events from a JSON-lines file instead of the backend
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,

        /// Delay between replayed events
        #[arg(long, default_value = "250")]
        replay_interval_ms: u64,
    },

    /// Start or stop the backend mail servers
    #[command(subcommand)]
    Servers(ServerAction),

    /// Show backend metrics
    Metrics,

    /// List received emails
    Emails {
        /// Everything sent or received instead of the inbox
        #[arg(long)]
        history: bool,
    },

    /// Print the analysis report of one email
    Report { id: String },

    /// Send an encrypted test email through the server
    SendTest {
        #[arg(long)]
        to: String,

        #[arg(long, default_value = "Test Email")]
        subject: String,

        #[arg(long, default_value = "This is a test email.")]
        content: String,

        /// Sender; the backend uses the signed-in user when omitted
        #[arg(long)]
        from: Option<String>,
    },

    /// Show or clear the activity log
    Logs {
        #[arg(short, long)]
        limit: Option<u32>,

        #[arg(long)]
        clear: bool,
    },

    /// Run the AI spam, keyword and phishing analysis on a message
    Analyze {
        content: String,

        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "")]
        sender: String,
    },

    /// Ask for writing suggestions on a draft
    Compose {
        content: String,

        #[arg(long, default_value = "")]
        context: String,

        #[arg(long, default_value = "professional")]
        tone: String,
    },

    /// Draft a reply to an email
    Reply {
        original: String,

        #[arg(long, default_value = "")]
        context: String,

        #[arg(long, default_value = "professional")]
        tone: String,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    Start,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(Some(path.as_path()))?,
        None => Config::load()?,
    };
    config.validate()?;

    init_logging(&config.logging);

    let store = FileStore::open(config.session.path.as_deref())?;

    match cli.command {
        Commands::Login { email, password } => login(&config, &store, &email, &password).await,
        Commands::Signup { email, password } => {
            let reply = ApiClient::new(&config.backend)?
                .sign_up(&email, &password)
                .await
                .with_context(|| format!("sign up as {} failed", email))?;
            println!("{}", reply.message);
            println!("Run `maildcn login {}` to sign in", email);
            Ok(())
        }
        Commands::Logout => {
            AuthSession::logout(&store)?;
            println!("Signed out");
            Ok(())
        }
        Commands::Whoami => {
            match AuthSession::restore(&store).user() {
                Some(user) => println!(
                    "{} (TLS verified: {})",
                    user.email,
                    if user.tls_verified { "yes" } else { "no" }
                ),
                None => println!("Not signed in"),
            }
            Ok(())
        }
        Commands::Monitor {
            demo,
            replay,
            replay_interval_ms,
        } => {
            let session = AuthSession::restore(&store);
            monitor(
                &config,
                &session,
                demo,
                replay.as_deref(),
                Duration::from_millis(replay_interval_ms),
            )
            .await
        }
        Commands::Servers(action) => {
            let api = api_client(&config, &store)?;
            let reply = match action {
                ServerAction::Start => api.start_servers().await?,
                ServerAction::Stop => api.stop_servers().await?,
            };
            println!("{}", reply.message);
            Ok(())
        }
        Commands::Metrics => {
            let metrics = api_client(&config, &store)?.metrics().await?;
            println!("Total emails:    {}", metrics.total_emails);
            println!("Spam detected:   {}", metrics.spam_detected);
            println!("Encryption rate: {}", metrics.encryption_rate);
            println!("TLS connections: {}", metrics.tls_connections);
            println!("Security score:  {:.1}", metrics.security_score);
            Ok(())
        }
        Commands::Emails { history } => {
            let api = api_client(&config, &store)?;
            let list = if history {
                api.email_history().await?
            } else {
                api.list_emails().await?
            };
            for email in &list.emails {
                println!("{}", render::email_line(email));
            }
            println!("{} emails", list.count);
            Ok(())
        }
        Commands::Report { id } => {
            let report = api_client(&config, &store)?.email_report(&id).await?;
            print_json(&report)
        }
        Commands::SendTest {
            to,
            subject,
            content,
            from,
        } => {
            let email = TestEmailRequest {
                from,
                to,
                subject,
                content,
            };
            let reply = api_client(&config, &store)?.send_test_email(&email).await?;
            print_json(&reply)
        }
        Commands::Logs { limit, clear } => {
            let api = api_client(&config, &store)?;
            if clear {
                println!("{}", api.clear_logs().await?.message);
                return Ok(());
            }
            let logs = api.logs(limit).await?;
            for entry in &logs.logs {
                println!("{}", render::log_line(entry));
            }
            println!("{} entries", logs.count);
            Ok(())
        }
        Commands::Analyze {
            content,
            subject,
            sender,
        } => {
            let request = AnalysisRequest {
                content,
                subject,
                sender,
            };
            let analysis = api_client(&config, &store)?
                .comprehensive_analysis(&request)
                .await?;
            print_json(&analysis)
        }
        Commands::Compose {
            content,
            context,
            tone,
        } => {
            let request = CompositionRequest {
                content,
                context,
                tone,
            };
            let help = api_client(&config, &store)?
                .composition_help(&request)
                .await?;
            print_json(&help)
        }
        Commands::Reply {
            original,
            context,
            tone,
        } => {
            let request = ReplyRequest {
                original_email: original,
                context,
                tone,
            };
            let reply = api_client(&config, &store)?.generate_reply(&request).await?;
            print_json(&reply)
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn api_client(config: &Config, store: &dyn KeyValueStore) -> Result<ApiClient> {
    let api = ApiClient::new(&config.backend)?;
    Ok(match AuthSession::restore(store).token() {
        Some(token) => api.with_token(token),
        None => api,
    })
}

async fn login(
    config: &Config,
    store: &dyn KeyValueStore,
    email: &str,
    password: &str,
) -> Result<()> {
    let api = ApiClient::new(&config.backend)?;
    let response = api
        .sign_in(email, password)
        .await
        .with_context(|| format!("sign in as {} failed", email))?;
    let session = AuthSession::login(store, response.user, response.token)?;
    if let Some(user) = session.user() {
        println!("Signed in as {}", user.email);
    }
    Ok(())
}

async fn monitor(
    config: &Config,
    session: &AuthSession,
    demo: bool,
    replay: Option<&Path>,
    replay_interval: Duration,
) -> Result<()> {
    let mut socket = None;
    let mut replay_task = None;

    let channel: Option<Arc<dyn PushChannel>> = match replay {
        Some(path) => {
            let local = Arc::new(LocalChannel::new());
            let events = read_replay(path).await?;
            info!("Replaying {} events from {}", events.len(), path.display());
            replay_task = Some(tokio::spawn(replay_events(
                local.clone(),
                config.channel.event_topic.clone(),
                events,
                replay_interval,
            )));
            let local: Arc<dyn PushChannel> = local;
            Some(local)
        }
        None => match SocketIoChannel::open(&config.backend, &config.channel, session.token()) {
            Some(channel) => {
                let channel = Arc::new(channel);
                socket = Some(channel.clone());
                let channel: Arc<dyn PushChannel> = channel;
                Some(channel)
            }
            None => {
                warn!("Not signed in, live events are unavailable. Run `maildcn login` first.");
                None
            }
        },
    };

    let (service, handle) = MonitorService::new(config, channel);
    let service_task = tokio::spawn(service.run());
    let render_task = tokio::spawn(print_feed(handle.clone()));

    if demo {
        handle.send(MonitorCommand::RequestDemo {
            count: DEMO_BATCHES,
        })?;
    }
    if !session.is_authenticated() && replay.is_none() {
        handle.send(MonitorCommand::Notify(
            NoticeLevel::Warning,
            "Sign in to receive protocol events".to_string(),
        ))?;
    }

    println!("Type 'help' for commands.");
    read_commands(&handle).await?;

    handle.shutdown();
    if let Some(task) = replay_task {
        task.abort();
    }
    if let Some(socket) = socket {
        socket.close();
    }
    let _ = service_task.await;
    render_task.abort();

    info!("Monitor stopped");
    Ok(())
}

async fn read_commands(handle: &MonitorHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match console::parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Monitor(command))) => handle.send(command)?,
            Ok(Some(ConsoleCommand::Status)) => print!("{}", render::status(&handle.snapshot())),
            Ok(Some(ConsoleCommand::Help)) => println!("{}", console::HELP),
            Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
            Err(message) => println!("{}", message),
        }
    }
}

async fn print_feed(handle: MonitorHandle) {
    let mut snapshots = handle.subscribe();
    let mut feed = render::Feed::default();

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        for line in feed.update(&snapshot) {
            println!("{}", line);
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

async fn read_replay(path: &Path) -> Result<Vec<serde_json::Value>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut events = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))?;
        if serde_json::from_value::<ProtocolEvent>(value.clone()).is_err() {
            warn!("{}:{}: not a protocol event, skipped", path.display(), n + 1);
            continue;
        }
        events.push(value);
    }

    if events.is_empty() {
        bail!("{} contains no protocol events", path.display());
    }
    Ok(events)
}

async fn replay_events(
    channel: Arc<LocalChannel>,
    topic: String,
    events: Vec<serde_json::Value>,
    interval: Duration,
) {
    for event in events {
        channel.publish(&topic, event);
        tokio::time::sleep(interval).await;
    }
    info!("Replay finished");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},maildcn=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backend_commands_parse() {
        let cli = Cli::try_parse_from(["maildcn", "emails", "--history"]).unwrap();
        assert!(matches!(cli.command, Commands::Emails { history: true }));

        let cli = Cli::try_parse_from(["maildcn", "report", "abc123"]).unwrap();
        assert!(matches!(cli.command, Commands::Report { id } if id == "abc123"));

        let cli = Cli::try_parse_from(["maildcn", "logs", "--clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Logs {
                limit: None,
                clear: true
            }
        ));

        let cli = Cli::try_parse_from(["maildcn", "send-test", "--to", "bob@example.com"]).unwrap();
        match cli.command {
            Commands::SendTest {
                to, subject, from, ..
            } => {
                assert_eq!(to, "bob@example.com");
                assert_eq!(subject, "Test Email");
                assert_eq!(from, None);
            }
            _ => panic!("expected send-test"),
        }

        let cli = Cli::try_parse_from(["maildcn", "analyze", "win a prize", "--sender", "x@y.z"])
            .unwrap();
        match cli.command {
            Commands::Analyze {
                content, sender, ..
            } => assert_eq!((content.as_str(), sender.as_str()), ("win a prize", "x@y.z")),
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_signup_takes_password_flag() {
        let cli = Cli::try_parse_from(["maildcn", "signup", "a@b.c", "-p", "pw"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Signup { email, password } if email == "a@b.c" && password == "pw"
        ));
    }
}

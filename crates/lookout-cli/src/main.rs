use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// D-Bus proxy — thin client for the lookoutd daemon.
#[zbus::proxy(
    interface = "io.lookout.Lookout1",
    default_service = "io.lookout.Lookout1",
    default_path = "/io/lookout/Lookout1"
)]
trait Lookout {
    async fn get_visual_context(&self) -> zbus::Result<String>;
    async fn update_identity(
        &self,
        identity_id: &str,
        name: &str,
        relationship_status: &str,
    ) -> zbus::Result<String>;
    async fn import_contacts(&self, csv: &str) -> zbus::Result<String>;
    async fn get_identity(&self, identity_id: &str) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn recent_events(
        &self,
        session_id: &str,
        identity_id: &str,
        limit: u32,
    ) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "lookout", about = "Lookout identity-resolution CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import identities from a CSV file (name, linkedin_url, headshot_media_url)
    Import {
        /// Path to the CSV file
        file: std::path::PathBuf,
    },
    /// List known identities
    List,
    /// Show one identity
    Show {
        /// Identity ID
        id: String,
    },
    /// Correct an identity's name or relationship status
    Update {
        /// Identity ID to update
        id: String,
        /// New name
        #[arg(short, long)]
        name: Option<String>,
        /// New relationship status
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show recent audit events, newest first
    Events {
        /// Only events from this session
        #[arg(long)]
        session: Option<String>,
        /// Only events about this identity
        #[arg(long)]
        identity: Option<String>,
        /// Maximum number of events
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Show the current visual context
    Context,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to session bus")?;
    let proxy = LookoutProxy::new(&connection)
        .await
        .context("connecting to lookoutd (is it running?)")?;

    match cli.command {
        Commands::Import { file } => {
            let csv = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let summary = proxy.import_contacts(&csv).await?;
            println!("{}", pretty(&summary));
        }
        Commands::List => {
            let identities = proxy.list_identities().await?;
            println!("{}", pretty(&identities));
        }
        Commands::Show { id } => {
            let identity = proxy.get_identity(&id).await?;
            println!("{}", pretty(&identity));
        }
        Commands::Update { id, name, status } => {
            let result = proxy
                .update_identity(
                    &id,
                    name.as_deref().unwrap_or(""),
                    status.as_deref().unwrap_or(""),
                )
                .await?;
            println!("{result}");
        }
        Commands::Events {
            session,
            identity,
            limit,
        } => {
            let events = proxy
                .recent_events(
                    session.as_deref().unwrap_or(""),
                    identity.as_deref().unwrap_or(""),
                    limit,
                )
                .await?;
            println!("{}", pretty(&events));
        }
        Commands::Context => {
            let context = proxy.get_visual_context().await?;
            println!("{}", pretty(&context));
        }
        Commands::Status => {
            let status = proxy.status().await?;
            println!("{}", pretty(&status));
        }
    }

    Ok(())
}

/// Pretty-print JSON payloads; pass non-JSON strings through untouched.
fn pretty(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

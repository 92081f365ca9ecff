mod civitai;
mod config;
mod credentials;
mod download;
mod interactive;
mod job;
mod router;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use config::Config;
use credentials::{CredentialStore, mask};
use interactive::TerminalProgress;
use job::JobSettings;
use reqwest::Client;
use router::{AppState, create_router};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(name = "civitai-downloader", version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,

    #[clap(flatten)]
    config: Config,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP download endpoint (default)
    Serve,
    /// Download a model from a Civitai link
    Download {
        /// Model page link, with or without `?modelVersionId=`
        url: String,
        /// Civitai API key; saved for later runs, an empty value forgets the saved key
        #[clap(long)]
        api_key: Option<String>,
    },
    /// Manage the saved API key
    Key {
        #[clap(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Save a key, replacing any previous one
    Set { token: String },
    /// Forget the saved key
    Clear,
    /// Show which key would be used
    Show,
}

fn http_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!("civitai-downloader/", env!("CARGO_PKG_VERSION")))
        .build()
}

async fn serve(config: Config) -> color_eyre::Result<()> {
    if !config.model_dir.exists() {
        tokio::fs::create_dir_all(&config.model_dir).await?;
        tracing::info!("Directory '{}' does not exist, creating...", config.model_dir.display());
    } else {
        tracing::info!("Directory '{}' already exists, skipping...", config.model_dir.display());
    }

    let app = create_router(AppState::new(http_client()?, &config));
    let listener = tokio::net::TcpListener::bind(&config.host).await?;
    tracing::info!("Listening on: {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn manage_key(store: &CredentialStore, action: KeyAction) -> color_eyre::Result<()> {
    match action {
        KeyAction::Set { token } => {
            let token = token.trim();
            if token.is_empty() {
                color_eyre::eyre::bail!("refusing to save an empty key, use `key clear` instead");
            }
            store.save(token).await?;
            println!("Saved API key to {}", store.key_path().display());
        }
        KeyAction::Clear => {
            store.clear().await?;
            println!("Saved API key removed");
        }
        KeyAction::Show => match store.resolve(None).await {
            Some(credential) => println!("{} ({})", mask(&credential.token), credential.source),
            None => println!("No API key configured, requests are anonymous"),
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = cli.config;
    let store = CredentialStore::new(config.config_dir());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await?,
        Command::Download { url, api_key } => {
            let outcome = interactive::download(
                http_client()?,
                &JobSettings::from(&config),
                &store,
                &url,
                api_key.as_deref(),
                &TerminalProgress::default(),
            )
            .await;

            println!("{}", interactive::status_text(&outcome));
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Command::Key { action } => manage_key(&store, action).await?,
    }

    Ok(())
}

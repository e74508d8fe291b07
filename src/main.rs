mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bd_client::{ApiClient, ClientConfig, FileCredentialStore, LoginOutcome};
use clap::Parser;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_tracing(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so response bodies on stdout stay pipeable
fn setup_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli).await?;
    debug!(base_url = %config.base_url, "Using API");

    let storage_dir = match &cli.credentials_dir {
        Some(dir) => dir.clone(),
        None => FileCredentialStore::default_storage_dir()?,
    };
    let store = FileCredentialStore::new(&storage_dir)
        .await
        .with_context(|| format!("Failed to open credential store at {}", storage_dir.display()))?;
    let client = ApiClient::new(config, Arc::new(store))?;

    match cli.command {
        Command::Login { email, password } => match client.login(&email, &password).await? {
            LoginOutcome::Authenticated { user } => {
                println!("Logged in as {email}");
                if let Some(user) = user {
                    print_json(&user)?;
                }
            }
            LoginOutcome::TwoFactorRequired {
                two_factor_token,
                methods,
            } => {
                println!("Second factor required ({})", methods.join(", "));
                println!("Run: bizdesk verify2fa {two_factor_token} <code>");
            }
        },
        Command::Verify2fa {
            two_factor_token,
            code,
            method,
        } => {
            client
                .verify_two_factor(&two_factor_token, &code, &method)
                .await
                .context("Two-factor verification failed")?;
            println!("Logged in");
        }
        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => match client.current_claims().await {
            Some(claims) if client.is_authenticated().await => {
                println!("id:      {}", claims.subject_id.as_deref().unwrap_or("-"));
                println!("email:   {}", claims.email.as_deref().unwrap_or("-"));
                println!("name:    {}", claims.display_name.as_deref().unwrap_or("-"));
                println!("role:    {}", claims.role.as_deref().unwrap_or("-"));
                if let Some(expires_at) = claims.expires_at {
                    println!("expires: {}", expires_at.to_rfc3339());
                }
            }
            _ => println!("Not logged in"),
        },
        Command::Get { path, query } => {
            let params: Vec<(&str, &str)> = query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let body: Value = client.get(&path, &params).await?;
            print_json(&body)?;
        }
        Command::Post { path, data } => {
            let body: Value = client.post(&path, &parse_body(&data)?).await?;
            print_json(&body)?;
        }
        Command::Put { path, data } => {
            let body: Value = client.put(&path, &parse_body(&data)?).await?;
            print_json(&body)?;
        }
        Command::Patch { path, data } => {
            let body: Value = client.patch(&path, &parse_body(&data)?).await?;
            print_json(&body)?;
        }
        Command::Delete { path } => {
            let body: Value = client.delete(&path).await?;
            print_json(&body)?;
        }
    }

    Ok(())
}

/// Explicit `--config`, else `config.toml` in the platform config dir, else defaults
async fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => default_config_file().filter(|p| p.exists()),
    };

    let mut config = match path {
        Some(path) => ClientConfig::load(&path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url
            .parse()
            .with_context(|| format!("Invalid base URL: {base_url}"))?;
    }

    Ok(config)
}

fn default_config_file() -> Option<PathBuf> {
    ClientConfig::default_config_dir()
        .ok()
        .map(|dir| dir.join("config.toml"))
}

fn parse_body(data: &str) -> Result<Value> {
    serde_json::from_str(data).context("Request body is not valid JSON")
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

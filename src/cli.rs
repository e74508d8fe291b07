//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line client for the bizdesk API
#[derive(Parser, Debug)]
#[command(name = "bizdesk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "BIZDESK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// API base URL, overrides the configuration file
    #[arg(long, env = "BIZDESK_API_URL", global = true)]
    pub base_url: Option<String>,

    /// Directory holding stored credentials
    #[arg(long, env = "BIZDESK_CREDENTIALS_DIR", global = true)]
    pub credentials_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "BIZDESK_LOG_LEVEL", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store credentials
    Login {
        email: String,

        #[arg(long, env = "BIZDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Answer a two-factor challenge issued by `login`
    Verify2fa {
        /// Challenge token printed by `login`
        two_factor_token: String,

        code: String,

        #[arg(long, default_value = "totp")]
        method: String,
    },

    /// Close the server session and clear stored credentials
    Logout,

    /// Show the identity of the stored credentials
    Whoami,

    /// GET a resource
    Get {
        path: String,

        /// Query parameter as key=value, repeatable
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },

    /// POST a JSON body
    Post {
        path: String,

        /// JSON request body
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// PUT a JSON body
    Put {
        path: String,

        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// PATCH a JSON body
    Patch {
        path: String,

        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// DELETE a resource
    Delete { path: String },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

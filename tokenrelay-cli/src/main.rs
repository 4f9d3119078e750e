//! TokenRelay CLI
//!
//! Command-line interface for signing in to the remote API and making
//! authenticated calls with the stored session.
//!
//! # Usage
//!
//! ```bash
//! # Sign in and store the session credentials
//! tokenrelay login ada@example.com hunter2
//!
//! # Call an endpoint; an expired token is refreshed transparently
//! tokenrelay request GET /wallet/balance
//!
//! # End the session
//! tokenrelay logout
//! ```
//!
//! Sessions survive between invocations only with the `file` or `keyring`
//! store backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::ExitCode;
use tokenrelay_core::{
    ApiError, ApiRequest, ApiResponse, AuthClient, ClientConfig, CredentialKind, Method,
    SessionStatus,
};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "tokenrelay")]
#[command(about = "Session credentials and authenticated API calls")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config.toml (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in with email and password
    Login {
        email: String,
        password: String,
    },

    /// Create an account
    Register {
        /// Registration payload as JSON
        #[arg(long)]
        body: String,
    },

    /// Confirm a one-time code sent after registration or login
    VerifyOtp {
        email: String,
        code: String,
    },

    /// Send an authenticated request
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the base URL (e.g., /wallet/balance)
        path: String,

        /// Request body as JSON
        #[arg(long)]
        body: Option<String>,
    },

    /// Renew the access token now
    Refresh,

    /// End the session and clear stored credentials
    Logout,

    /// Show the stored session
    Status,

    /// Read or set a stored preference flag
    Flag {
        name: String,

        /// New value; omit to print the current one
        value: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let terminated = e
                .downcast_ref::<ApiError>()
                .is_some_and(ApiError::is_session_terminated);
            if terminated {
                eprintln!("Session expired, please log in again");
                return ExitCode::from(2);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_path(path),
        None => ClientConfig::load(),
    }
    .context("failed to load configuration")?;

    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    init_logging(&config.log_level, cli.verbose);
    debug!(base_url = %config.base_url, backend = ?config.store.backend, "Configuration loaded");

    let client = AuthClient::from_config(config).context("failed to create client")?;
    client.restore().await;

    match cli.command {
        Commands::Login { email, password } => {
            let response = client
                .login(json!({ "email": email, "password": password }))
                .await?;
            report_session(&client, &response, "Logged in");
        }
        Commands::Register { body } => {
            let response = client.register(parse_body(&body)?).await?;
            report_session(&client, &response, "Registered");
        }
        Commands::VerifyOtp { email, code } => {
            let response = client
                .verify_otp(json!({ "email": email, "otp": code }))
                .await?;
            report_session(&client, &response, "Code verified");
        }
        Commands::Request { method, path, body } => {
            let mut request = ApiRequest::new(parse_method(&method)?, path);
            if let Some(body) = body {
                request = request.json(parse_body(&body)?);
            }
            let response = client.perform(request).await?;
            print_response(&response);
        }
        Commands::Refresh => {
            client.refresh_now().await?;
            println!("Access token refreshed");
        }
        Commands::Logout => {
            let remote = client.logout().await;
            println!("Local session cleared");
            remote.context("server did not acknowledge logout")?;
        }
        Commands::Status => {
            show_status(&client).await;
        }
        Commands::Flag { name, value } => match value {
            Some(enabled) => {
                client.credentials().set_flag(&name, enabled).await?;
                println!("{} = {}", name, enabled);
            }
            None => {
                println!("{} = {}", name, client.credentials().flag(&name).await);
            }
        },
    }

    Ok(())
}

fn init_logging(default_level: &str, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { default_level })
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method: {}", method))
}

fn parse_body(body: &str) -> Result<Value> {
    serde_json::from_str(body).context("--body must be valid JSON")
}

fn report_session(client: &AuthClient, response: &ApiResponse, action: &str) {
    if client.status() == SessionStatus::Active {
        println!("{}; session stored", action);
    } else {
        println!("{}", action);
    }
    if client.config().store.backend == tokenrelay_core::StoreBackend::Memory {
        eprintln!("Note: memory store in use, the session ends with this process");
    }
    debug!(status = %response.status, "Session endpoint responded");
}

fn print_response(response: &ApiResponse) {
    match response.json_value() {
        Ok(Value::Null) => println!("{}", response.status),
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", response.text()),
        },
        Err(_) => println!("{}", response.text()),
    }
}

async fn show_status(client: &AuthClient) {
    let credentials = client.credentials();
    let present = |present: bool| if present { "stored" } else { "absent" };

    println!("Session: {:?}", client.status());
    println!("  API:           {}", client.config().base_url);
    println!("  Store:         {:?}", client.config().store.backend);
    println!(
        "  Access token:  {}",
        present(credentials.get(CredentialKind::Access).await.is_some())
    );
    println!(
        "  Refresh token: {}",
        present(credentials.get(CredentialKind::Refresh).await.is_some())
    );
}

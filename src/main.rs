//! Hearthguard - secure request path for the household app
//!
//! Validates access tokens on the client side, seals flagged request bodies
//! in an RSA-OAEP + AES-GCM envelope, and runs the key service that publishes
//! public keys and opens envelopes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Method;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod client;
mod config;
mod crypto;
mod error;
mod metrics;
mod server;
mod shutdown;
mod token;

#[cfg(test)]
mod test_vectors;

use client::{ApiClient, RequestOptions, SessionState};
use config::AppConfig;
use crypto::{KeyFetcher, KeyRing, encrypt_payload};
use metrics::Metrics;
use server::KeyServer;
use shutdown::ShutdownHandler;
use token::{MintClaims, TokenValidator, mint_token};

/// Smallest RSA modulus accepted by `generate-keys`.
const MIN_KEY_BITS: usize = 2048;

/// Hearthguard - token validation and hybrid request encryption
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    config: String,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the key service (default)
    Serve,

    /// Generate a key pair into the keys directory
    GenerateKeys {
        /// Key identifier
        #[arg(long, default_value = "v1")]
        key_id: String,

        /// RSA modulus size
        #[arg(long, default_value_t = MIN_KEY_BITS)]
        bits: usize,
    },

    /// Decode a token and report its expiry without verifying the signature
    InspectToken {
        token: String,
    },

    /// Seal a JSON value and print the envelope
    Encrypt {
        /// Recipient key id (defaults to `client.default_key_id`)
        #[arg(long)]
        key_id: Option<String>,

        /// Read the public key from a PEM file instead of fetching it
        #[arg(long)]
        public_key: Option<PathBuf>,

        /// JSON payload
        json: String,
    },

    /// Mint an HS256 development token
    MintToken {
        #[arg(long)]
        sub: String,

        #[arg(long)]
        email: Option<String>,

        /// Role claim, repeatable
        #[arg(long = "role")]
        roles: Vec<String>,

        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,

        /// HMAC signing secret
        #[arg(long)]
        secret: String,
    },

    /// POST a JSON body to an API path through the client pipeline
    Send {
        /// API path, e.g. `/inbox`
        path: String,

        /// JSON body
        json: String,

        /// Seal the body before sending
        #[arg(long)]
        encrypt: bool,

        #[arg(long)]
        key_id: Option<String>,

        /// Bearer token to attach
        #[arg(long)]
        token: Option<String>,

        /// Log in first with these credentials
        #[arg(long, requires = "password", conflicts_with = "token")]
        email: Option<String>,

        #[arg(long, requires = "email")]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_logging(&config.logging)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, &args.config).await,
        Command::GenerateKeys { key_id, bits } => generate_keys(&config, &key_id, bits),
        Command::InspectToken { token } => inspect_token(&config, &token),
        Command::Encrypt {
            key_id,
            public_key,
            json,
        } => encrypt(&config, key_id, public_key.as_deref(), &json).await,
        Command::MintToken {
            sub,
            email,
            roles,
            ttl_secs,
            secret,
        } => {
            let mut claims = MintClaims::new(sub, Duration::from_secs(ttl_secs))?;
            claims.email = email;
            claims.roles = roles;
            println!("{}", mint_token(&claims, secret.as_bytes())?);
            Ok(())
        }
        Command::Send {
            path,
            json,
            encrypt,
            key_id,
            token,
            email,
            password,
        } => {
            let mut options = if encrypt {
                RequestOptions::encrypted()
            } else {
                RequestOptions::default()
            };
            if let Some(key_id) = key_id {
                options = options.with_key_id(key_id);
            }
            send(&config, &path, &json, &options, token, email.zip(password)).await
        }
    }
}

/// Load the config file, or the environment alone when the file is absent.
fn load_config(path: &str) -> Result<AppConfig> {
    if Path::new(path).exists() {
        AppConfig::load(path).with_context(|| format!("Failed to load config from {path}"))
    } else {
        AppConfig::from_env().context("Failed to load config from environment")
    }
}

/// Run the key service until SIGINT or SIGTERM.
async fn serve(config: AppConfig, config_path: &str) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path,
        "Starting hearthguard key service"
    );

    let metrics = Metrics::new().context("Failed to create metrics")?;
    metrics.init_server_info(env!("CARGO_PKG_VERSION"));

    let keys = KeyRing::load_dir(&config.server.keys_dir).with_context(|| {
        format!(
            "Failed to load keys from {}",
            config.server.keys_dir.display()
        )
    })?;

    if keys.is_empty() {
        warn!("No keys loaded - run `hearthguard generate-keys` first");
    }
    for key_id in keys.key_ids() {
        if let Some(opener) = keys.get(key_id) {
            info!(key_id, fingerprint = %opener.fingerprint()?, "Serving key");
        }
    }

    let server = KeyServer::new(&config, keys, metrics);
    let shutdown = ShutdownHandler::new();

    let server_shutdown = shutdown.subscribe();
    let mut server_handle = tokio::spawn(async move { server.run(server_shutdown).await });

    tokio::select! {
        () = shutdown.wait_for_signal() => {}
        joined = &mut server_handle => {
            joined.context("Key service task panicked")??;
            warn!("Key service stopped");
            return Ok(());
        }
    }

    info!("Initiating graceful shutdown");

    let drained = shutdown::graceful_shutdown(config.server.shutdown_timeout(), async {
        match (&mut server_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Key service error"),
            Err(e) => error!(error = %e, "Key service task failed"),
        }
    })
    .await;

    if !drained {
        server_handle.abort();
    }

    info!("Hearthguard stopped");
    Ok(())
}

/// Generate a key pair and print the public half.
fn generate_keys(config: &AppConfig, key_id: &str, bits: usize) -> Result<()> {
    if bits < MIN_KEY_BITS {
        anyhow::bail!("RSA keys must be at least {MIN_KEY_BITS} bits");
    }

    let keys_dir = &config.server.keys_dir;
    let opener = KeyRing::generate(keys_dir, key_id, bits)
        .with_context(|| format!("Failed to generate key '{key_id}'"))?;

    println!("Generated {bits}-bit key pair '{key_id}' in {}\n", keys_dir.display());
    println!("Fingerprint (SHA-256): {}\n", opener.fingerprint()?);
    println!("{}", opener.public_key_pem()?);
    println!("Clients fetch it from {}", crypto::public_key_path(key_id));
    println!("To make it the default for sealing:");
    println!("  export HEARTHGUARD_CLIENT__DEFAULT_KEY_ID=\"{key_id}\"");

    Ok(())
}

/// Print a token report as JSON.
fn inspect_token(config: &AppConfig, token: &str) -> Result<()> {
    let report = TokenValidator::from_config(&config.token).inspect(token);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Seal a JSON payload and print the envelope.
async fn encrypt(
    config: &AppConfig,
    key_id: Option<String>,
    public_key: Option<&Path>,
    json: &str,
) -> Result<()> {
    let value: Value = serde_json::from_str(json).context("Payload is not valid JSON")?;
    let key_id = key_id.unwrap_or_else(|| config.client.default_key_id.clone());

    let envelope = match public_key {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            encrypt_payload(&value, &pem, &key_id)?
        }
        None => {
            let http_client = reqwest::Client::builder()
                .timeout(config.client.request_timeout())
                .build()?;
            let fetcher = KeyFetcher::new(http_client, config.client.base_url.clone(), 1);
            let key = fetcher
                .public_key(&key_id)
                .await
                .with_context(|| format!("Failed to fetch public key '{key_id}'"))?;
            encrypt_payload(&value, &key, &key_id)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// POST through the API client and print the response.
async fn send(
    config: &AppConfig,
    path: &str,
    json: &str,
    options: &RequestOptions,
    token: Option<String>,
    credentials: Option<(String, String)>,
) -> Result<()> {
    let body: Value = serde_json::from_str(json).context("Body is not valid JSON")?;

    let metrics = Metrics::new().context("Failed to create metrics")?;
    let client = ApiClient::new(
        config.client.clone(),
        TokenValidator::from_config(&config.token),
    )?
    .with_metrics(metrics.clone());

    if let Some(token) = token {
        client.tokens().set_token(&token).await;
    }
    let logged_in = match credentials {
        Some((email, password)) => {
            client.login(&email, &password).await.context("Login failed")?;
            true
        }
        None => false,
    };

    match client.guard().await {
        SessionState::Active(claims) => {
            info!(subject = claims.subject().unwrap_or("-"), "Sending with active session");
        }
        SessionState::Expired => warn!("Stored token is expired, sending without it"),
        SessionState::Missing => {}
    }

    let response = client
        .request(Method::POST, path, Some(&body), options)
        .await
        .context("Request failed")?;

    if metrics.encryption_fallbacks_total.get() > 0 {
        warn!("Body was sent unencrypted");
    }

    println!("{}", response.status());
    println!("{}", response.text().await?);

    if logged_in {
        client.logout().await;
    }
    Ok(())
}

/// Initialize the tracing subscriber based on configuration.
///
/// Logs go to stderr so command output on stdout stays clean.
fn init_logging(config: &config::LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
        "off" => {}
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

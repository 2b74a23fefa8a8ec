//! OIDC code-flow demo services
//!
//! Runs either the relying-party web application or the bearer-protected
//! resource server, depending on the subcommand.

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use oidc_codeflow::oidc::{
    CodeExchanger, ConfigJson, ProviderConfig, SigningKeyCache, TokenVerifier, VerifierConfig,
};
use oidc_codeflow::relying_party::{self, RelyingPartyState, ResourceClient};
use oidc_codeflow::resource_server::{self, ResourceServerState};
use oidc_codeflow::session::cookie::DEFAULT_COOKIE_NAME;
use oidc_codeflow::session::types::MAX_SESSION_TTL_SECS;
use oidc_codeflow::session::{
    spawn_cleanup_task, MemorySessionStore, RedbSessionStore, SessionCookie, SessionStore,
    DEFAULT_CLEANUP_INTERVAL_SECS,
};

/// Timeout for calls from the relying party to the resource server.
const RESOURCE_CALL_TIMEOUT_SECS: u64 = 10;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "oidc-codeflow")]
#[command(about = "OpenID Connect relying party and resource server")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true, env = "VERBOSE")]
    verbose: bool,

    /// JSON file with configuration overrides
    #[arg(long, global = true, env = "OIDC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the browser-facing relying party
    RelyingParty(RelyingPartyArgs),
    /// Run the bearer-protected resource server
    ResourceServer(ResourceServerArgs),
}

#[derive(ClapArgs, Debug)]
struct RelyingPartyArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:5000", env = "RP_LISTEN")]
    listen: String,

    /// OAuth client ID
    #[arg(long, default_value = "", env = "CLIENT_ID")]
    client_id: String,

    /// OAuth client secret
    #[arg(long, default_value = "", env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Realm base reachable from this process (token, userinfo)
    #[arg(long, default_value = "", env = "AUTH_SERVER_INTERNAL")]
    auth_server_internal: String,

    /// Realm base reachable from the browser (auth, logout)
    #[arg(long, default_value = "", env = "AUTH_SERVER_PUBLIC")]
    auth_server_public: String,

    /// Callback URL registered with the provider
    #[arg(long, default_value = "http://localhost:5000/callback", env = "REDIRECT_URI")]
    redirect_uri: String,

    /// Where the provider returns the browser after logout
    #[arg(long, default_value = "http://localhost:5000/", env = "POST_LOGOUT_REDIRECT_URI")]
    post_logout_redirect_uri: String,

    /// Base URL of the resource server
    #[arg(long, default_value = "http://resource_server:5001", env = "RESOURCE_SERVER_URL")]
    resource_server_url: String,

    /// Secret used to sign session cookies (at least 32 bytes)
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    session_secret: String,

    /// redb file for sessions; sessions stay in memory when unset
    #[arg(long, env = "SESSION_STORE_PATH")]
    session_store: Option<PathBuf>,

    /// Session lifetime in seconds
    #[arg(
        long,
        default_value_t = 3600,
        env = "SESSION_TTL_SECS",
        value_parser = clap::value_parser!(u64).range(1..=MAX_SESSION_TTL_SECS)
    )]
    session_ttl_secs: u64,

    /// Mark the session cookie Secure
    #[arg(long, env = "SECURE_COOKIE")]
    secure_cookie: bool,
}

#[derive(ClapArgs, Debug)]
struct ResourceServerArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:5001", env = "RS_LISTEN")]
    listen: String,

    /// Provider JWKS endpoint
    #[arg(long, default_value = "", env = "JWKS_URL")]
    jwks_url: String,

    /// Expected token issuer
    #[arg(long, default_value = "", env = "EXPECTED_ISSUER")]
    issuer: String,

    /// Expected token audience
    #[arg(long, default_value = "my-client", env = "EXPECTED_AUDIENCE")]
    audience: String,

    /// Re-fetch the key set after this many seconds (0 = never)
    #[arg(long, default_value_t = 0, env = "JWKS_REFRESH_SECS")]
    jwks_refresh_secs: u64,

    /// Minimum key-set age before an unknown kid triggers a re-fetch
    #[arg(long, default_value_t = 60, env = "JWKS_MIN_REFRESH_SECS")]
    jwks_min_refresh_secs: u64,

    /// Clock skew tolerance for exp, in seconds
    #[arg(long, default_value_t = 30, env = "CLOCK_SKEW_SECS")]
    clock_skew_secs: u64,
}

impl RelyingPartyArgs {
    fn provider_config(&self, overlay: Option<&ConfigJson>) -> Result<ProviderConfig> {
        let mut config = ProviderConfig {
            issuer_internal: self.auth_server_internal.clone(),
            issuer_public: self.auth_server_public.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
            post_logout_redirect_uri: self.post_logout_redirect_uri.clone(),
            ..Default::default()
        };
        if let Some(overlay) = overlay {
            overlay.apply_to_provider(&mut config);
        }
        config
            .validate()
            .map_err(|e| anyhow!("Invalid provider configuration: {}", e))?;
        Ok(config)
    }
}

impl ResourceServerArgs {
    fn verifier_config(&self, overlay: Option<&ConfigJson>) -> Result<VerifierConfig> {
        let mut config = VerifierConfig {
            jwks_url: self.jwks_url.clone(),
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            jwks_refresh_secs: self.jwks_refresh_secs,
            jwks_min_refresh_secs: self.jwks_min_refresh_secs,
            clock_skew_secs: self.clock_skew_secs,
            ..Default::default()
        };
        if let Some(overlay) = overlay {
            overlay.apply_to_verifier(&mut config);
        }
        config
            .validate()
            .map_err(|e| anyhow!("Invalid verifier configuration: {}", e))?;
        Ok(config)
    }
}

fn load_overlay(path: &Path) -> Result<ConfigJson> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

async fn serve(listen: &str, app: axum::Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!(address = %listen, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_relying_party(args: RelyingPartyArgs, overlay: Option<ConfigJson>) -> Result<()> {
    let config = args.provider_config(overlay.as_ref())?;
    info!(
        client_id = %config.client_id,
        issuer_internal = %config.issuer_internal,
        issuer_public = %config.issuer_public,
        redirect_uri = %config.redirect_uri,
        "Provider configuration loaded"
    );

    let sessions: Arc<dyn SessionStore> = match &args.session_store {
        Some(path) => {
            let store = RedbSessionStore::open(path.clone())?;
            info!(path = %path.display(), "Session store initialized");
            Arc::new(store)
        }
        None => {
            warn!("No session store path configured, sessions are kept in memory");
            Arc::new(MemorySessionStore::new())
        }
    };

    info!("Starting session cleanup task");
    let _cleanup_handle = spawn_cleanup_task(Arc::clone(&sessions), DEFAULT_CLEANUP_INTERVAL_SECS);

    let state = RelyingPartyState {
        exchanger: Arc::new(CodeExchanger::new(config)?),
        sessions,
        cookie: SessionCookie::new(
            DEFAULT_COOKIE_NAME,
            args.session_secret.as_bytes(),
            args.secure_cookie,
        )?,
        resource: Arc::new(ResourceClient::new(
            args.resource_server_url.clone(),
            Duration::from_secs(RESOURCE_CALL_TIMEOUT_SECS),
        )?),
        session_ttl_secs: args.session_ttl_secs,
    };

    serve(&args.listen, relying_party::router(state)).await
}

async fn run_resource_server(args: ResourceServerArgs, overlay: Option<ConfigJson>) -> Result<()> {
    let config = args.verifier_config(overlay.as_ref())?;
    info!(
        jwks_url = %config.jwks_url,
        issuer = %config.issuer,
        audience = %config.audience,
        refresh_secs = config.jwks_refresh_secs,
        "Verifier configuration loaded"
    );

    let keys = Arc::new(SigningKeyCache::new(&config)?);
    let state = ResourceServerState {
        verifier: Arc::new(TokenVerifier::new(&config, keys)),
    };

    serve(&args.listen, resource_server::router(state)).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    let overlay = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration overrides");
            Some(load_overlay(path)?)
        }
        None => None,
    };

    match args.command {
        Command::RelyingParty(rp) => {
            info!("Starting relying party");
            run_relying_party(rp, overlay).await
        }
        Command::ResourceServer(rs) => {
            info!("Starting resource server");
            run_resource_server(rs, overlay).await
        }
    }
}

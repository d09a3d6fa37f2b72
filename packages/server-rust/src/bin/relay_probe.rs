//! `relay-probe`: authenticates once, checks stock for a list of books
//! through the resilient pipeline, and prints the resulting usage report.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use relay_core::ObservationKey;
use relay_server::client::{HttpIdentityProvider, HttpInventoryClient, InventoryFallback};
use relay_server::service::{
    build_invocation_pipeline, with_request_scope, CounterAggregator, CredentialAuthenticator,
    IdentityExchange, RelayConfig, RelayGateway, RequestContext, ResilientInvoker, RetryPolicy,
    RetryingOperation, StaticCredentialPolicy, TokenIssuer,
};
use relay_server::telemetry::{init_tracing, install_metrics_exporter, LogFormat};
use tracing::{info, info_span, warn, Instrument};

type ProbeGateway = RelayGateway<StaticCredentialPolicy, HttpIdentityProvider>;

#[derive(Parser, Debug)]
#[command(name = "relay-probe")]
#[command(about = "Resilient, authenticated stock lookups with usage analytics")]
struct Args {
    /// Node identifier attached to the root span
    #[arg(long, env = "RELAY_NODE_ID", default_value = "relay-probe")]
    node_id: String,

    /// Inventory service base URL
    #[arg(long, env = "RELAY_INVENTORY_URL", default_value = "http://localhost:8082")]
    inventory_url: String,

    /// Identity provider API base URL
    #[arg(long, env = "RELAY_IDENTITY_URL", default_value = "https://api.github.com")]
    identity_url: String,

    /// User-Agent sent to the identity provider
    #[arg(long, env = "RELAY_USER_AGENT", default_value = "relay")]
    user_agent: String,

    /// Timeout of a single live inventory call (ms)
    #[arg(long, env = "RELAY_LIVE_TIMEOUT_MS", default_value_t = 2_000)]
    live_timeout_ms: u64,

    /// Lifetime of the probe's request scope (ms)
    #[arg(long, env = "RELAY_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    request_timeout_ms: u64,

    /// Concurrent invocations admitted before shedding
    #[arg(long, env = "RELAY_MAX_CONCURRENT", default_value_t = 1000)]
    max_concurrent: u32,

    /// Attempts per live call, including the first
    #[arg(long, env = "RELAY_LIVE_ATTEMPTS", default_value_t = 1)]
    live_attempts: u32,

    /// Secret for signing local bearer tokens
    #[arg(
        long,
        env = "RELAY_TOKEN_SECRET",
        default_value = "pleaseChangeThisSecretForANewOne",
        hide_env_values = true
    )]
    token_secret: String,

    /// Local identity to log in as
    #[arg(long, env = "RELAY_USERNAME")]
    username: Option<String>,

    /// Secret for `--username`
    #[arg(long, env = "RELAY_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Provider access token to exchange instead of a local login
    #[arg(
        long,
        env = "RELAY_PROVIDER_TOKEN",
        hide_env_values = true,
        conflicts_with = "username"
    )]
    provider_token: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "RELAY_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Books to check, as `code` or `code=name`
    #[arg(required = true)]
    books: Vec<String>,
}

impl Args {
    fn config(&self) -> RelayConfig {
        RelayConfig {
            node_id: self.node_id.clone(),
            live_call_timeout_ms: self.live_timeout_ms,
            request_timeout_ms: self.request_timeout_ms,
            max_concurrent_invocations: self.max_concurrent,
            inventory_base_url: self.inventory_url.clone(),
            identity_base_url: self.identity_url.clone(),
            user_agent: self.user_agent.clone(),
            token_secret: self.token_secret.clone(),
            ..RelayConfig::default()
        }
    }
}

fn parse_book(raw: &str) -> ObservationKey {
    match raw.split_once('=') {
        Some((code, name)) => ObservationKey::new(code.trim(), name.trim()),
        None => ObservationKey::new(raw.trim(), raw.trim()),
    }
}

fn build_gateway(config: &RelayConfig, live_attempts: u32) -> anyhow::Result<ProbeGateway> {
    let aggregator = Arc::new(CounterAggregator::new());

    let policy = RetryPolicy {
        max_attempts: live_attempts,
        ..RetryPolicy::default()
    };
    let attempt_timeout = policy.attempt_timeout(config.live_call_timeout());
    let live = RetryingOperation::new(
        HttpInventoryClient::new(&config.inventory_base_url, attempt_timeout)?,
        policy,
    );
    let invoker = ResilientInvoker::builder()
        .live(live)
        .fallback(InventoryFallback)
        .aggregator(Arc::clone(&aggregator))
        .live_timeout(config.live_call_timeout())
        .build()?;

    let identity = HttpIdentityProvider::new(
        &config.identity_base_url,
        &config.user_agent,
        config.request_timeout(),
    )?;

    Ok(RelayGateway::new(
        CredentialAuthenticator::new(StaticCredentialPolicy::demo()),
        IdentityExchange::new(identity),
        TokenIssuer::from_config(config),
        build_invocation_pipeline(invoker, config),
        aggregator,
    ))
}

async fn authenticate(
    gateway: &ProbeGateway,
    ctx: &RequestContext,
    args: &Args,
) -> anyhow::Result<()> {
    if let Some(token) = &args.provider_token {
        let result = gateway.oauth_callback(ctx, token).await?;
        match result.principal() {
            Some(principal) => info!(principal, "authenticated through identity provider"),
            None => warn!(reason = result.reason(), "provider token rejected"),
        }
    } else if let Some(username) = &args.username {
        let login = gateway.login(ctx, username, &args.password)?;
        match login.tokens {
            Some(tokens) => info!(
                principal = %tokens.username,
                expires_in = tokens.expires_in,
                "logged in"
            ),
            None => warn!(reason = login.result.reason(), "login rejected"),
        }
    }
    Ok(())
}

async fn run(args: Args, config: RelayConfig) -> anyhow::Result<()> {
    let gateway = build_gateway(&config, args.live_attempts)?;
    let keys: Vec<ObservationKey> = args.books.iter().map(String::as_str).map(parse_book).collect();

    let gateway_ref = &gateway;
    let args_ref = &args;
    with_request_scope(config.request_timeout(), |ctx| async move {
        authenticate(gateway_ref, &ctx, args_ref).await?;
        for key in keys {
            match gateway_ref.check_stock(&ctx, key.clone()).await {
                Ok(outcome) => info!(
                    key = %key,
                    in_stock = ?outcome.value,
                    degraded = outcome.degraded,
                    "stock checked"
                ),
                Err(err) => warn!(key = %key, error = %err, "stock check failed"),
            }
        }
        anyhow::Ok(())
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&gateway.analytics())?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;
    if let Some(addr) = args.metrics_addr {
        install_metrics_exporter(addr)?;
    }

    let config = args.config();
    let span = info_span!("relay_probe", node_id = %config.node_id);
    run(args, config).instrument(span).await
}

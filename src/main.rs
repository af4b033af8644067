use std::sync::Arc;

use onboard_client::api::HttpBackend;
use onboard_client::cli::{self, Repl, TerminalGoogle, TerminalOutlook};
use onboard_client::config::ClientConfig;
use onboard_client::connection::{ConnectionManager, WsTransport};
use onboard_client::providers::{
    GoogleContacts, OutlookContacts, ProviderName, ProviderTokenAdapter,
};
use onboard_client::session::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ONBOARD_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ClientConfig::from_env()?;

    eprintln!("🔑 Onboard client v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Auth API: {}", config.endpoints.auth);
    eprintln!("   Channel: {}", config.channel_url);

    let api = Arc::new(HttpBackend::new(
        config.endpoints.clone(),
        config.http_timeout,
    )?);

    let transport = Arc::new(WsTransport::new(config.channel_url.clone()));
    let channel = Arc::new(ConnectionManager::spawn(transport, config.reconnect.clone()));

    let lines = cli::spawn_stdin_reader();

    // ── Contact providers ───────────────────────────────────────────────
    let mut providers = ProviderTokenAdapter::new();
    if config.google.client_id.is_some() {
        providers.register(Arc::new(GoogleContacts::new(
            TerminalGoogle::new(config.google.clone(), Arc::clone(&lines)),
            config.google.scopes.clone(),
        )));
    }
    if config.outlook.client_id.is_some() {
        providers.register(Arc::new(OutlookContacts::new(
            TerminalOutlook::new(config.outlook.clone(), Arc::clone(&lines)),
            config.outlook.login_scopes.clone(),
            config.outlook.token_scopes.clone(),
        )));
    }
    for name in [ProviderName::Google, ProviderName::Outlook] {
        let status = if providers.is_registered(name) {
            "enabled"
        } else {
            "not configured"
        };
        eprintln!("   {name} contacts: {status}");
    }
    eprintln!("   Type 'help' for commands, 'quit' to exit.\n");

    let orchestrator = Arc::new(Orchestrator::new(api, providers, channel.clone()));

    let _session_printer = cli::spawn_session_printer(orchestrator.subscribe());
    let _server_printer = cli::spawn_server_printer(channel.subscribe());

    Repl::new(Arc::clone(&orchestrator), lines).run().await;

    if let Err(e) = channel.stop().await {
        tracing::warn!(error = %e, "Failed to stop notification channel");
    }
    eprintln!("Bye.");
    Ok(())
}

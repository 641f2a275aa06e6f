use std::sync::Arc;

use anyhow::Context;
use nikwela::app_core::SignUpProfile;
use nikwela::app_state::Role;
use nikwela::app_ui::GateView;
use nikwela::backend_client::InMemoryBackend;
use nikwela::storage::KvStore;
use nikwela::{App, AppConfig};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const DEMO_EMAIL: &str = "demo@nikwela.app";
const DEMO_PASSWORD: &str = "nikwela";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))?;

    let config = AppConfig::from_env().context("invalid configuration")?;

    if config.backend.is_some() {
        let app = App::start(config).await.context("failed to start")?;
        let state = app.auth().wait_for(|s| !s.loading).await;
        info!(signed_in = state.identity.is_some(), "session restored");
        print_view(&app);
        app.shutdown();
        return Ok(());
    }

    run_offline_demo().await
}

/// Walk the in-memory backend through sign-up, sign-out and sign-in
async fn run_offline_demo() -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let kv = Arc::new(KvStore::in_memory().context("failed to open in-memory cache")?);
    let app = App::with_backend(backend.clone(), backend, kv).await;

    app.auth().wait_for(|s| !s.loading).await;
    print_view(&app);

    app.open("/auth/register");
    print_view(&app);

    let profile = SignUpProfile::new("Demo Driver", "+254700000000", Role::Driver)?;
    app.auth().sign_up(DEMO_EMAIL, DEMO_PASSWORD, profile).await?;
    app.auth().wait_for(|s| s.is_authenticated()).await;
    print_view(&app);

    app.auth().sign_out().await?;
    app.auth().wait_for(|s| s.is_signed_out()).await;
    print_view(&app);

    app.auth().sign_in(DEMO_EMAIL, DEMO_PASSWORD).await?;
    app.auth().wait_for(|s| s.is_authenticated()).await;
    print_view(&app);

    app.shutdown();
    Ok(())
}

fn print_view(app: &App) {
    let screen = app.current_screen().map(|r| r.title()).unwrap_or("-");
    match app.view() {
        GateView::Blank => println!("[blank]"),
        GateView::SignedOut { routes } => {
            let names: Vec<_> = routes.iter().map(|r| r.title()).collect();
            println!("[signed out] screens: {} | showing: {screen}", names.join(", "));
        }
        GateView::SignedIn { role, tabs } => {
            let labels: Vec<_> = tabs.iter().map(|t| t.label()).collect();
            println!("[{role}] tabs: {} | showing: {screen}", labels.join(", "));
        }
    }
}

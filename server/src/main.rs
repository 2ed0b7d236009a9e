use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod access;
mod atomic_write;
mod editor;
mod error;
mod sandbox;
mod session;
mod versions;

use access::AllowedNetworks;
use sandbox::PathSandbox;
use session::SessionAuth;
use versions::VersionTracker;

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Edit text files under a local directory through a web front end.
#[derive(Parser, Debug)]
#[command(name = "webedit-server", version, about)]
struct Args {
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short = 'P', long, default_value_t = 9113)]
    port: u16,

    /// Root directory exposed by the editor.
    #[arg(long, default_value = ".", value_name = "DIRECTORY")]
    root: PathBuf,

    /// Password required for editing. Without it the editor is open.
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Networks allowed to connect (CIDR or single address). May be
    /// repeated; an empty list allows everyone.
    #[arg(long = "allow-ip", value_name = "NETWORK")]
    allow_ip: Vec<String>,

    /// Fixed session-signing secret. Generated fresh each run if unset,
    /// which invalidates sessions across restarts.
    #[arg(long)]
    secret_key: Option<String>,
}

// -----------------------------------------------------------------------------
// Shared state
// -----------------------------------------------------------------------------

/// Process-wide state shared by all request handlers. Everything except
/// the interior of `VersionTracker` is read-only after startup.
pub struct AppState {
    pub sandbox: PathSandbox,
    pub versions: VersionTracker,
    pub networks: AllowedNetworks,
    pub auth: SessionAuth,
    /// One token per process; rotating it requires a restart.
    pub csrf_token: String,
    pub password: Option<String>,
}

pub type SharedState = Arc<AppState>;

fn app(state: SharedState) -> Router {
    Router::new()
        .route("/", get(editor::index))
        .route("/login", get(session::login_page).post(session::login))
        .route("/logout", post(session::logout))
        .route("/e/*path", get(editor::edit))
        .route("/save", post(editor::save))
        .layer(middleware::from_fn_with_state(state.clone(), access::gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// -----------------------------------------------------------------------------
// Main entry
// -----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let sandbox = PathSandbox::new(&args.root)
        .with_context(|| format!("cannot use {} as editor root", args.root.display()))?;
    let networks = AllowedNetworks::parse(&args.allow_ip).context("bad --allow-ip")?;
    let secret = args.secret_key.unwrap_or_else(session::make_secret);

    info!("editor root: {}", sandbox.root().display());
    if args.password.is_none() {
        info!("no password configured; editing is open to every allowed address");
    }

    let state: SharedState = Arc::new(AppState {
        sandbox,
        versions: VersionTracker::default(),
        networks,
        auth: SessionAuth::new(secret, args.port),
        csrf_token: session::make_secret(),
        password: args.password,
    });

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("cannot bind {}:{}", args.host, args.port))?;
    info!("webedit listening on http://{}:{}", args.host, args.port);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

//! Vitrine CLI - Storefront client from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Look up an address by CEP
//! vitrine cep 01310-100
//!
//! # Detect the CEP from coordinates (or from the IP address without them)
//! vitrine locate --lat -23.5614 --lon -46.6559
//!
//! # Quote shipping for a cart file
//! vitrine quote 30140-071 --cart cart.yaml
//!
//! # Manage the saved cart
//! vitrine cart add --id 12 --name "Vestido Midi" --price 189.90 --size M
//! vitrine cart show
//!
//! # Check out with PIX
//! vitrine checkout --email ana@example.com --address 3 --method pix
//!
//! # Follow a shipment
//! vitrine track 321 --follow
//! ```
//!
//! # Commands
//!
//! - `cep` - Address lookup
//! - `locate` - CEP detection
//! - `quote` - Shipping quotes
//! - `cart` - Saved cart
//! - `checkout` - Place an order and pay
//! - `track` - Shipment tracking
//! - `carrier` - Carrier account authorization

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitrine_storefront::config::StorefrontConfig;
use vitrine_storefront::error::{StorefrontError, report};
use vitrine_storefront::state::AppState;

mod commands;

use commands::Reported;

#[derive(Parser)]
#[command(name = "vitrine")]
#[command(author, version, about = "Vitrine storefront client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up the address for a CEP
    Cep {
        /// CEP, with or without the dash
        cep: String,
    },
    /// Detect the buyer's CEP
    Locate {
        /// Latitude in decimal degrees
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude in decimal degrees
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Quote shipping to a CEP
    Quote {
        /// Destination CEP
        cep: String,

        /// Cart file (YAML); the saved cart when omitted
        #[arg(long)]
        cart: Option<PathBuf>,
    },
    /// Manage the saved cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Place an order for the cart and pay for it
    Checkout(commands::checkout::CheckoutArgs),
    /// Show tracking for an order
    Track {
        /// Order ID
        order_id: i64,

        /// Keep polling until the shipment is delivered
        #[arg(long)]
        follow: bool,
    },
    /// Carrier account authorization
    Carrier {
        #[command(subcommand)]
        action: CarrierAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Add a product
    Add {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        name: String,

        /// Unit price (e.g. 189.90 or 189,90)
        #[arg(long)]
        price: String,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Garment size
        #[arg(short, long)]
        size: Option<String>,
    },
    /// Remove a product line
    Remove {
        #[arg(long)]
        id: i64,

        #[arg(short, long)]
        size: Option<String>,
    },
    /// Replace the saved cart with a cart file
    Import {
        /// Cart file (YAML)
        file: PathBuf,
    },
    /// Show the saved cart
    Show,
    /// Empty the saved cart
    Clear,
}

#[derive(Subcommand)]
enum CarrierAction {
    /// Whether the store's carrier account is authorized
    Status,
    /// Print the authorization link for the carrier account
    Authorize,
    /// Complete authorization with the code from the carrier redirect
    Complete {
        #[arg(long)]
        code: String,

        /// `state` returned by the carrier
        #[arg(long)]
        state: String,

        /// `state` printed by `carrier authorize`
        #[arg(long)]
        expected_state: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.as_str().into()),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing(config: Option<&StorefrontConfig>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vitrine=info,vitrine_storefront=info".into());
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter));

    if config.is_some_and(|c| !c.is_development()) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(None);
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Sentry before the subscriber so its layer has a client.
    let sentry_guard = init_sentry(&config);
    init_tracing(Some(&config));

    let development = config.is_development();
    let result = match AppState::new(config).await {
        Ok(state) => {
            let result = run(cli, &state).await;
            if let Err(e) = state.shutdown().await {
                report(&e);
            }
            result
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        fail(e.as_ref(), development);
        drop(sentry_guard);
        std::process::exit(1);
    }
}

/// Top-level error boundary: details in development, a generic message
/// otherwise.
fn fail(error: &(dyn std::error::Error + 'static), development: bool) {
    if let Some(err) = unreported(error) {
        report(err);
    }

    if development {
        let mut chain = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        tracing::error!("Command failed: {chain}");
    } else {
        tracing::error!("{}", buyer_message(error));
    }
}

/// The storefront error still to be reported. The checkout reports its own
/// failures.
fn unreported<'a>(error: &'a (dyn std::error::Error + 'static)) -> Option<&'a StorefrontError> {
    error.downcast_ref::<StorefrontError>()
}

fn buyer_message(error: &(dyn std::error::Error + 'static)) -> String {
    error
        .downcast_ref::<Reported>()
        .map(|reported| &reported.0)
        .or_else(|| error.downcast_ref::<StorefrontError>())
        .map_or_else(
            || "Something went wrong. Please try again.".to_string(),
            StorefrontError::user_message,
        )
}

async fn run(cli: Cli, state: &AppState) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Cep { cep } => commands::lookup::cep(state, &cep).await?,
        Commands::Locate { lat, lon } => commands::lookup::locate(state, lat.zip(lon)).await?,
        Commands::Quote { cep, cart } => commands::quote::quote(state, &cep, cart.as_deref()).await?,
        Commands::Cart { action } => match action {
            CartAction::Add {
                id,
                name,
                price,
                quantity,
                size,
            } => commands::cart::add(state, id, name, &price, quantity, size).await?,
            CartAction::Remove { id, size } => {
                commands::cart::remove(state, id, size.as_deref()).await?;
            }
            CartAction::Import { file } => commands::cart::import(state, &file).await?,
            CartAction::Show => commands::cart::show(state).await,
            CartAction::Clear => state.cart().clear().await,
        },
        Commands::Checkout(args) => commands::checkout::run(state, args).await?,
        Commands::Track { order_id, follow } => {
            commands::track::track(state, order_id, follow).await?;
        }
        Commands::Carrier { action } => match action {
            CarrierAction::Status => commands::carrier::status(state).await?,
            CarrierAction::Authorize => commands::carrier::authorize(state)?,
            CarrierAction::Complete {
                code,
                state: returned,
                expected_state,
            } => commands::carrier::complete(state, &code, &returned, &expected_state).await?,
        },
    }
    Ok(())
}

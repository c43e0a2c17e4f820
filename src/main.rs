use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatch_crm::{
    api,
    call_history::{self, CallHistoryClient},
    config::Config,
    db::Database,
    models::{CreateUserInput, Role},
    notify::{Notifier, TelegramAlertLayer},
    recordings::{MediaStore, Reconciler},
};

#[derive(Parser)]
#[command(name = "crm")]
#[command(about = "Dispatch CRM for appliance-repair service requests")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Create a back-office account, creating its city if needed
    CreateUser {
        #[arg(long)]
        login: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
        /// City name
        #[arg(long)]
        city: String,
        /// admin, director, callcentre, kc or avitolog
        #[arg(long, default_value = "admin")]
        role: String,
    },
    /// Attach call recordings to matching requests, from a directory or
    /// from the telephony vendor's call history
    ImportRecordings {
        #[arg(required_unless_present = "from_api", conflicts_with = "from_api")]
        dir: Option<PathBuf>,

        /// Fetch recordings through the call-history API
        #[arg(long)]
        from_api: bool,

        /// First day to fetch (YYYY-MM-DD, local to the recording offset); yesterday by default
        #[arg(long, requires = "from_api")]
        since: Option<NaiveDate>,

        /// Last day to fetch, inclusive; today by default
        #[arg(long, requires = "from_api")]
        until: Option<NaiveDate>,

        /// Report matches without storing anything
        #[arg(long)]
        dry_run: bool,
    },
}

/// Log to stdout; when Telegram is configured, `ERROR` events are also
/// forwarded to the operations chat.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "dispatch_crm=debug,tower_http=debug".into()),
    );

    let alerts = config
        .telegram
        .as_ref()
        .map(|telegram| TelegramAlertLayer::spawn(Notifier::new(Some(telegram))));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(alerts)
        .init();
}

/// `[since 00:00, until + 1 day 00:00)` at `offset`, in UTC.
fn day_range(
    since: NaiveDate,
    until: NaiveDate,
    offset: FixedOffset,
) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
    if until < since {
        anyhow::bail!("--until {} is before --since {}", until, since);
    }
    let start_of = |day: NaiveDate| {
        offset
            .from_local_datetime(&day.and_time(NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| anyhow::anyhow!("Invalid date {}", day))
    };
    Ok((start_of(since)?, start_of(until)? + Duration::days(1)))
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    tracing::debug!("Opening database at {}", config.database_path.display());
    let db = Database::open(&config.database_path)?;
    db.migrate()?;
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    match cli.command.unwrap_or(Commands::Serve {
        port: 8000,
        host: "127.0.0.1".to_string(),
    }) {
        Commands::Serve { port, host } => {
            if config.ephemeral_secret {
                tracing::warn!(
                    "CRM_SECRET_KEY is not set; using a random key, sessions will not survive a restart"
                );
            }
            if config.telephony.is_none() {
                tracing::warn!("Telephony keys are not set; webhook signatures are not checked");
            }

            let db = open_database(&config)?;
            let app = api::create_router(api::AppState::new(db, config));

            let addr = format!("{}:{}", host, port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("Dispatch CRM listening on http://{}", addr);

            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
        }
        Commands::Migrate => {
            open_database(&config)?;
            println!("Migrations applied to {}", config.database_path.display());
        }
        Commands::CreateUser {
            login,
            password,
            name,
            city,
            role,
        } => {
            let role = Role::from_str(&role)
                .filter(|r| *r != Role::Master)
                .ok_or_else(|| anyhow::anyhow!("Unknown back-office role: {}", role))?;

            let db = open_database(&config)?;
            let city = db.get_or_create_city(&city)?;
            let user = db.create_user(CreateUserInput {
                city_id: city.id,
                name,
                role,
                login,
                password,
                is_active: true,
                note: None,
            })?;
            println!(
                "Created {} '{}' in {} ({})",
                user.role.as_str(),
                user.login,
                city.name,
                user.id
            );
        }
        Commands::ImportRecordings {
            dir,
            from_api,
            since,
            until,
            dry_run,
        } => {
            let db = open_database(&config)?;
            let reconciler = Reconciler::new(
                db,
                MediaStore::new(config.media_dir.clone()),
                config.recording_utc_offset,
            );

            let report = match dir {
                Some(dir) if !from_api => {
                    if !dir.is_dir() {
                        anyhow::bail!("Not a directory: {}", dir.display());
                    }
                    reconciler.import_directory(&dir, dry_run)?
                }
                _ => {
                    let keys = config.telephony.clone().ok_or_else(|| {
                        anyhow::anyhow!("CRM_TELEPHONY_KEY and CRM_TELEPHONY_SALT are required")
                    })?;
                    let offset = config.recording_utc_offset;
                    let today = Utc::now().with_timezone(&offset).date_naive();
                    let since = since.unwrap_or(today - Duration::days(1));
                    let until = until.unwrap_or(today);
                    let (from, to) = day_range(since, until, offset)?;

                    let client = CallHistoryClient::new(&config.telephony_api_url, keys)?;
                    call_history::import_calls(&client, &reconciler, from, to, dry_run)
                        .await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

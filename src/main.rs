use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

mod models;
mod repositories;
pub mod services;
pub mod settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = settings::Settings::new(&args.config)?;

    init_logging(&args.log4rs)?;
    log::info!("Starting referral ledger.");

    let conn = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;

    sqlx::migrate!("./migrations").run(&conn).await?;
    log::info!("Database migrations applied.");

    let store: Arc<dyn repositories::LedgerStore> =
        Arc::new(repositories::postgres::PgLedgerStore::new(conn));

    if let Some(admin) = &config.admin {
        services::users::UserRequestHandler::new(store.clone())
            .seed_admin(&admin.name, &admin.email)
            .await?;
    }

    let channels = services::start_services(store, config.referrals);

    services::http::start_http_server(&args.listen, channels).await?;

    Ok(())
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use timecapsule::cli::{import_capsules, Cli, Command};
use timecapsule::config::{AuthConfig, Config};
use timecapsule::{build_app, db};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("timecapsule=info,tower_http=info")),
        )
        .init();

    let pool = db::init_pool(&config.database_url, config.max_connections).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Import { file, user } => {
            let imported = import_capsules(&pool, &file, &user).await?;
            println!("Imported {} capsules", imported);
        }
        Command::Serve => {
            let auth = AuthConfig::from_env()?;
            let app = build_app(pool, auth, &config.cors_allowed_origins);

            let addr = config.server_address();
            let listener = TcpListener::bind(&addr).await?;

            tracing::info!("listening on {}", addr);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

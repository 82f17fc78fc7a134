use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub cors_allowed_origins: Vec<String>,
}

/// Settings for verifying bearer tokens minted by the identity provider.
/// Loaded separately from [`Config`] since only the server needs them.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: Option<String>,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok()
}

impl Config {
    const DEFAULT_PORT: u16 = 3000;
    const DEFAULT_MAX_CONNECTIONS: u32 = 5;

    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(env_var)
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match var("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| format!("Invalid PORT: {e}"))?,
            None => Self::DEFAULT_PORT,
        };

        let database_url =
            var("DATABASE_URL").unwrap_or_else(|| "sqlite:data/timecapsule.db".to_string());

        let max_connections = match var("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| "DB_MAX_CONNECTIONS must be a valid number".to_string())?,
            None => Self::DEFAULT_MAX_CONNECTIONS,
        };

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            database_url,
            max_connections,
            cors_allowed_origins,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(env_var)
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let jwt_secret = var("AUTH_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "AUTH_JWT_SECRET environment variable is required".to_string())?;
        let issuer = var("AUTH_ISSUER").filter(|s| !s.is_empty());

        Ok(Self { jwt_secret, issuer })
    }
}

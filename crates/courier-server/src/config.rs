use anyhow::{Context, Result};

/// Process configuration, read from the environment once at startup.
/// Nothing else reads ambient environment after this point; the secret and
/// work factor flow into shared state explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub jwt_secret: String,
    pub hash_time_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = std::env::var("COURIER_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("COURIER_PORT must be a number")?;
        let db_path = std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".into());
        let jwt_secret =
            std::env::var("COURIER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
        let hash_time_cost = std::env::var("COURIER_HASH_TIME_COST")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .context("COURIER_HASH_TIME_COST must be a number")?;

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            hash_time_cost,
        })
    }
}

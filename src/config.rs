use std::{env, fmt::Display, str::FromStr};

use tracing::info;

pub struct Config {
    pub port: u16,
    pub mongodb_uri: String,
    pub database: String,
    pub auth_secret: String,
    pub token_ttl_hours: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: try_load("PORT", "8080"),
            mongodb_uri: env::var("MONGODB_URI")
                .expect("You need to add the MONGODB_URI to the env"),
            database: try_load("DATABASE", "sibupark"),
            auth_secret: env::var("AUTH_SECRET")
                .expect("You need to add the AUTH_SECRET to the env"),
            token_ttl_hours: try_load("TOKEN_TTL_HOURS", "72"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .unwrap_or_else(|e| panic!("Invalid {key} value: {e}"))
}

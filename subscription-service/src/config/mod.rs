use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub yookassa: YookassaConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct YookassaConfig {
    pub shop_id: String,
    pub secret_key: Secret<String>,
    pub api_base_url: String,
    pub return_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("SUBSCRIPTION_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SUBSCRIPTION_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()
            .context("SUBSCRIPTION_SERVICE_PORT must be a port number")?;

        let db_url = env::var("SUBSCRIPTION_DATABASE_URL")
            .context("SUBSCRIPTION_DATABASE_URL must be set")?;
        let max_connections = env::var("SUBSCRIPTION_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("SUBSCRIPTION_DATABASE_MAX_CONNECTIONS must be a number")?;
        let min_connections = env::var("SUBSCRIPTION_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("SUBSCRIPTION_DATABASE_MIN_CONNECTIONS must be a number")?;

        let shop_id = env::var("YOOKASSA_SHOP_ID").unwrap_or_default();
        let secret_key = env::var("YOOKASSA_SECRET_KEY").unwrap_or_default();
        let api_base_url = env::var("YOOKASSA_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.yookassa.ru/v3".to_string());
        let return_url = env::var("PAYMENT_RETURN_URL")
            .unwrap_or_else(|_| "https://localhost/payment/success".to_string());

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("OTLP_ENDPOINT").ok();

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            yookassa: YookassaConfig {
                shop_id,
                secret_key: Secret::new(secret_key),
                api_base_url,
                return_url,
            },
            service_name: "subscription-service".to_string(),
            log_level,
            otlp_endpoint,
        })
    }
}

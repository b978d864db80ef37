pub struct Config {
    pub database_url: String,
    pub public_url: String,
    pub telephony_account_sid: String,
    pub telephony_auth_token: String,
    pub telephony_api_base: String,
    pub system_phone_number: String,
    pub development_mode: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            public_url: require_env("PUBLIC_URL")?,
            telephony_account_sid: require_env("ACCOUNT_SID")?,
            telephony_auth_token: require_env("AUTH_TOKEN")?,
            telephony_api_base: std::env::var("TELEPHONY_API_BASE")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
            system_phone_number: require_env("SYSTEM_PHONE_NUMBER")?,
            development_mode: std::env::var("DEVELOPMENT_MODE").is_ok(),
        })
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable {key}"))
}

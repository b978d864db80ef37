/// Process-wide configuration for the media bridge (spec §6).
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub public_url: String,
    pub public_ws_url: String,
    pub model_api_key: String,
    pub model_ws_url: String,
    pub max_concurrent_calls: usize,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let public_url = require_env("PUBLIC_URL")?;
        let public_ws_url = public_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: std::env::var("BRIDGE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8082),
            public_url,
            public_ws_url,
            model_api_key: require_env("MODEL_API_KEY")?,
            model_ws_url: std::env::var("MODEL_WS_URL").unwrap_or_else(|_| {
                "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string()
            }),
            // spec §5: configurable concurrent-call limit bounding total spawn.
            max_concurrent_calls: std::env::var("MAX_CONCURRENT_CALLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
        })
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable {key}"))
}

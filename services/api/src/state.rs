use std::sync::Arc;

use axum::extract::FromRef;
use authn::JwtKeys;
use sqlx::{Pool, Postgres};
use telephony::TelephonyClient;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub jwt: JwtKeys,
    pub telephony: Arc<dyn TelephonyClient>,
    pub public_url: Arc<String>,
    pub system_phone_number: Arc<String>,
    pub development_mode: bool,
}

impl AppState {
    pub fn new(db: Pool<Postgres>, config: &Config, telephony: Arc<dyn TelephonyClient>) -> Self {
        AppState {
            db,
            jwt: JwtKeys::from_secret(&config.secret_key),
            telephony,
            public_url: Arc::new(config.public_url.clone()),
            system_phone_number: Arc::new(config.system_phone_number.clone()),
            development_mode: config.development_mode,
        }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

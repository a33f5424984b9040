use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Frontend base URL, used to build checkout redirect links
    pub frontend_url: String,
    pub stripe_secret_key: Option<String>,
    /// When unset, webhook signatures are not verified
    pub stripe_webhook_secret: Option<String>,
    /// Coupon id that grants a free open call listing
    pub free_call_coupon_id: Option<String>,
    /// Skip dispatch for event ids that were already logged
    pub dedupe_webhook_events: bool,
    /// Seconds between deferred task polls
    pub task_poll_secs: u64,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("ARTLIST_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let frontend_url = env::var("FRONTEND_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| "http://localhost:3001".to_string());

        let dedupe_webhook_events = env::var("WEBHOOK_DEDUPE")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let task_poll_secs: u64 = env::var("TASK_POLL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "artlist.db".to_string()),
            frontend_url,
            stripe_secret_key: non_empty_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET"),
            free_call_coupon_id: non_empty_var("FREE_CALL_COUPON_ID"),
            dedupe_webhook_events,
            task_poll_secs,
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

use std::time::Duration;

/// Process configuration, read once at startup. Invalid values fall back to
/// the documented default rather than aborting.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub mongodb_uri: Option<String>,
    pub flush_interval: Duration,
    pub state_cache_ttl: Duration,
    pub move_log_ttl: Duration,
    pub move_log_max_items: usize,
    pub engagement_dice_enabled: bool,
    pub taunt_system_enabled: bool,
    pub taunt_cooldown_ms: u64,
    pub taunt_limit_per_min: usize,
    pub taunt_auto_burst_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_origins: Vec::new(),
            mongodb_uri: None,
            flush_interval: Duration::from_millis(2_000),
            state_cache_ttl: Duration::from_secs(3_600),
            move_log_ttl: Duration::from_secs(86_400),
            move_log_max_items: 300,
            engagement_dice_enabled: true,
            taunt_system_enabled: true,
            taunt_cooldown_ms: 5_000,
            taunt_limit_per_min: 6,
            taunt_auto_burst_limit: 2,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGIN")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            mongodb_uri: std::env::var("MONGODB_URI")
                .ok()
                .filter(|uri| !uri.trim().is_empty()),
            flush_interval: Duration::from_millis(env_parse(
                "GAME_STATE_FLUSH_INTERVAL_MS",
                defaults.flush_interval.as_millis() as u64,
            )),
            state_cache_ttl: Duration::from_secs(env_parse(
                "GAME_STATE_CACHE_TTL_SECONDS",
                defaults.state_cache_ttl.as_secs(),
            )),
            move_log_ttl: Duration::from_secs(env_parse(
                "GAME_MOVE_LOG_TTL_SECONDS",
                defaults.move_log_ttl.as_secs(),
            )),
            move_log_max_items: env_parse("GAME_MOVE_LOG_MAX_ITEMS", defaults.move_log_max_items),
            engagement_dice_enabled: env_flag("ENGAGEMENT_DICE_ENABLED", true),
            taunt_system_enabled: env_flag("TAUNT_SYSTEM_ENABLED", true),
            taunt_cooldown_ms: env_parse("TAUNT_COOLDOWN_MS", defaults.taunt_cooldown_ms),
            taunt_limit_per_min: env_parse("TAUNT_LIMIT_PER_MIN", defaults.taunt_limit_per_min),
            taunt_auto_burst_limit: env_parse(
                "TAUNT_AUTO_BURST_LIMIT",
                defaults.taunt_auto_burst_limit,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

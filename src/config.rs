use chrono::{Local, NaiveDate, Utc};
use secrecy::Secret;
use serde::Deserialize;

/// Which calendar decides what "today" is at the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanClock {
    /// The server's local day, matching the devices that render tickets
    #[default]
    Local,
    Utc,
    /// Pinned day, for rehearsals and tests
    #[serde(skip)]
    Fixed(NaiveDate),
}

impl ScanClock {
    pub fn today(&self) -> NaiveDate {
        match self {
            ScanClock::Local => Local::now().date_naive(),
            ScanClock::Utc => Utc::now().date_naive(),
            ScanClock::Fixed(day) => *day,
        }
    }
}

impl std::str::FromStr for ScanClock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ScanClock::Local),
            "utc" => Ok(ScanClock::Utc),
            other => Err(format!("unknown scan clock '{}', expected 'local' or 'utc'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // HMAC key for ticket credentials; rotating it invalidates unscanned QR codes
    pub credential_secret: Secret<String>,

    pub scan_clock: ScanClock,
    pub max_credential_skew_days: Option<u32>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Self::from_source(&config)
    }

    fn from_source(config: &config::Config) -> Result<Self, config::ConfigError> {
        let scan_clock = match optional::<String>(config, "scan_clock")? {
            Some(raw) => raw.parse().map_err(config::ConfigError::Message)?,
            None => ScanClock::default(),
        };

        Ok(Self {
            database_url: config.get("database_url")?,
            host: optional(config, "host")?.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: config.get("port")?,

            credential_secret: Secret::new(config.get("credential_secret")?),

            scan_clock,
            max_credential_skew_days: optional(config, "max_credential_skew_days")?,
        })
    }
}

/// Reads a key that may be absent; a present but malformed value is an error
fn optional<T: serde::de::DeserializeOwned>(
    config: &config::Config,
    key: &str,
) -> Result<Option<T>, config::ConfigError> {
    match config.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

use bigdecimal::BigDecimal;
use eyre::{eyre, Result, WrapErr};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::validators::parse_public_key;

/// Main configuration for the bridge operator
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chains: ChainsConfig,
    pub validators: Vec<ValidatorConfig>,
    pub bridge: BridgeParams,
    pub monitor: MonitorConfig,
    pub api: ApiConfig,
    pub overrides: OverrideConfig,
    pub alerts: AlertConfig,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Chain adapter endpoints and the reserve accounts tracked on each chain
#[derive(Debug, Clone)]
pub struct ChainsConfig {
    pub ethereum_adapter_url: String,
    pub solana_adapter_url: String,
    pub ethereum_reserve_account: String,
    pub solana_reserve_account: String,
    pub request_timeout_ms: u64,
}

/// One remote validator: `id@public_key_hex@url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub id: String,
    pub public_key: String,
    pub url: String,
}

impl FromStr for ValidatorConfig {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, '@');
        let (Some(id), Some(public_key), Some(url)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(eyre!("validator entry {:?} must be id@public_key@url", s));
        };
        if id.is_empty() || public_key.is_empty() || url.is_empty() {
            return Err(eyre!("validator entry {:?} has an empty field", s));
        }
        Ok(Self {
            id: id.to_string(),
            public_key: public_key.to_string(),
            url: url.to_string(),
        })
    }
}

/// Protocol parameters for transfers and recovery
#[derive(Debug, Clone)]
pub struct BridgeParams {
    pub min_amount: BigDecimal,
    pub max_amount: BigDecimal,
    /// Fraction of the amount taken as fee (0.001 = 0.1%)
    pub fee_percentage: BigDecimal,
    pub rebalance_threshold: BigDecimal,
    pub critical_liquidity_ratio: BigDecimal,
    pub min_validators: usize,
    pub max_retries: u32,
    pub timeout_minutes: i64,
    pub max_pending_transactions: usize,
    pub max_stuck_transactions: usize,
    pub signature_window: Duration,
}

impl Default for BridgeParams {
    fn default() -> Self {
        Self {
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            fee_percentage: default_fee_percentage(),
            rebalance_threshold: default_rebalance_threshold(),
            critical_liquidity_ratio: default_critical_liquidity_ratio(),
            min_validators: default_min_validators(),
            max_retries: default_max_retries(),
            timeout_minutes: default_timeout_minutes(),
            max_pending_transactions: default_max_pending_transactions(),
            max_stuck_transactions: default_max_stuck_transactions(),
            signature_window: Duration::from_secs(default_signature_window_secs()),
        }
    }
}

/// Background loop intervals
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub monitor_interval: Duration,
    pub recovery_interval: Duration,
    pub health_check_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(default_monitor_interval_secs()),
            recovery_interval: Duration::from_secs(default_recovery_interval_secs()),
            health_check_interval: Duration::from_secs(default_health_check_interval_secs()),
        }
    }
}

/// Status API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

impl ApiConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .wrap_err("API_BIND_ADDRESS/API_PORT do not form a valid socket address")
    }
}

/// Supervisory override configuration
#[derive(Clone, Default)]
pub struct OverrideConfig {
    /// Token that unlocks force_complete. Unset disables it.
    pub admin_token: Option<String>,
}

/// Custom Debug that redacts the admin token.
impl fmt::Debug for OverrideConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideConfig")
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Alert delivery configuration
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub dedupe_ttl: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            dedupe_ttl: Duration::from_secs(default_alert_dedupe_ttl_secs()),
        }
    }
}

/// Default functions
fn default_min_amount() -> BigDecimal {
    BigDecimal::new(1.into(), 2) // 0.01
}

fn default_max_amount() -> BigDecimal {
    BigDecimal::from(100)
}

fn default_fee_percentage() -> BigDecimal {
    BigDecimal::new(1.into(), 3) // 0.001
}

fn default_rebalance_threshold() -> BigDecimal {
    BigDecimal::new(3.into(), 1) // 0.3
}

fn default_critical_liquidity_ratio() -> BigDecimal {
    BigDecimal::new(2.into(), 1) // 0.2
}

fn default_min_validators() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_minutes() -> i64 {
    60
}

fn default_max_pending_transactions() -> usize {
    1000
}

fn default_max_stuck_transactions() -> usize {
    5
}

fn default_signature_window_secs() -> u64 {
    30
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_recovery_interval_secs() -> u64 {
    60
}

fn default_health_check_interval_secs() -> u64 {
    120
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_api_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    9090
}

fn default_alert_dedupe_ttl_secs() -> u64 {
    3600
}

/// Read an optional variable, falling back to `default` when unset or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("{} environment variable is required", key))
}

/// Parse `VALIDATORS`: comma separated `id@public_key@url` entries
pub fn parse_validators(raw: &str) -> Result<Vec<ValidatorConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ValidatorConfig::from_str)
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
        };

        let chains = ChainsConfig {
            ethereum_adapter_url: required("ETHEREUM_ADAPTER_URL")?,
            solana_adapter_url: required("SOLANA_ADAPTER_URL")?,
            ethereum_reserve_account: required("ETHEREUM_RESERVE_ACCOUNT")?,
            solana_reserve_account: required("SOLANA_RESERVE_ACCOUNT")?,
            request_timeout_ms: env_or("CHAIN_REQUEST_TIMEOUT_MS", default_request_timeout_ms()),
        };

        let validators = parse_validators(&required("VALIDATORS")?)
            .wrap_err("VALIDATORS is malformed")?;

        let bridge = BridgeParams {
            min_amount: env_or("MIN_BRIDGE_AMOUNT", default_min_amount()),
            max_amount: env_or("MAX_BRIDGE_AMOUNT", default_max_amount()),
            fee_percentage: env_or("BRIDGE_FEE_PERCENTAGE", default_fee_percentage()),
            rebalance_threshold: env_or("REBALANCE_THRESHOLD", default_rebalance_threshold()),
            critical_liquidity_ratio: env_or(
                "CRITICAL_LIQUIDITY_RATIO",
                default_critical_liquidity_ratio(),
            ),
            min_validators: env_or("MIN_VALIDATORS", default_min_validators()),
            max_retries: env_or("MAX_RETRIES", default_max_retries()),
            timeout_minutes: env_or("TIMEOUT_MINUTES", default_timeout_minutes()),
            max_pending_transactions: env_or(
                "MAX_PENDING_TRANSACTIONS",
                default_max_pending_transactions(),
            ),
            max_stuck_transactions: env_or(
                "MAX_STUCK_TRANSACTIONS",
                default_max_stuck_transactions(),
            ),
            signature_window: Duration::from_secs(env_or(
                "SIGNATURE_WINDOW_SECS",
                default_signature_window_secs(),
            )),
        };

        let monitor = MonitorConfig {
            monitor_interval: Duration::from_secs(env_or(
                "MONITOR_INTERVAL_SECS",
                default_monitor_interval_secs(),
            )),
            recovery_interval: Duration::from_secs(env_or(
                "RECOVERY_INTERVAL_SECS",
                default_recovery_interval_secs(),
            )),
            health_check_interval: Duration::from_secs(env_or(
                "HEALTH_CHECK_INTERVAL_SECS",
                default_health_check_interval_secs(),
            )),
        };

        let api = ApiConfig {
            bind_address: env::var("API_BIND_ADDRESS").unwrap_or_else(|_| default_api_bind_address()),
            port: env_or("API_PORT", default_api_port()),
        };

        let overrides = OverrideConfig {
            admin_token: env::var("ADMIN_OVERRIDE_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        };

        let alerts = AlertConfig {
            webhook_url: env::var("ALERT_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
            dedupe_ttl: Duration::from_secs(env_or(
                "ALERT_DEDUPE_TTL_SECS",
                default_alert_dedupe_ttl_secs(),
            )),
        };

        let config = Config {
            database,
            chains,
            validators,
            bridge,
            monitor,
            api,
            overrides,
            alerts,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.chains.ethereum_adapter_url.is_empty() || self.chains.solana_adapter_url.is_empty()
        {
            return Err(eyre!("chain adapter URLs cannot be empty"));
        }

        // Validator ids must be unique and every key must parse
        let mut ids = HashSet::new();
        for v in &self.validators {
            if !ids.insert(v.id.as_str()) {
                return Err(eyre!("duplicate validator id {}", v.id));
            }
            parse_public_key(&v.public_key)
                .wrap_err_with(|| format!("validator {} has an invalid public key", v.id))?;
        }

        let b = &self.bridge;
        let zero = BigDecimal::from(0);
        let one = BigDecimal::from(1);
        if b.min_amount <= zero {
            return Err(eyre!("bridge.min_amount must be positive"));
        }
        if b.max_amount < b.min_amount {
            return Err(eyre!("bridge.max_amount must be at least bridge.min_amount"));
        }
        if b.fee_percentage < zero || b.fee_percentage >= one {
            return Err(eyre!("bridge.fee_percentage must be in [0, 1)"));
        }
        if b.rebalance_threshold <= zero || b.rebalance_threshold >= one {
            return Err(eyre!("bridge.rebalance_threshold must be in (0, 1)"));
        }
        if b.critical_liquidity_ratio <= zero || b.critical_liquidity_ratio >= one {
            return Err(eyre!("bridge.critical_liquidity_ratio must be in (0, 1)"));
        }
        if b.min_validators == 0 {
            return Err(eyre!("bridge.min_validators must be at least 1"));
        }
        if b.max_retries == 0 {
            return Err(eyre!("bridge.max_retries must be at least 1"));
        }
        if b.timeout_minutes <= 0 {
            return Err(eyre!("bridge.timeout_minutes must be positive"));
        }
        if b.max_pending_transactions == 0 {
            return Err(eyre!("bridge.max_pending_transactions must be at least 1"));
        }

        if self.monitor.monitor_interval.is_zero()
            || self.monitor.recovery_interval.is_zero()
            || self.monitor.health_check_interval.is_zero()
        {
            return Err(eyre!("monitor intervals must be non-zero"));
        }

        self.api.socket_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::local_validator_set;

    fn config() -> Config {
        let validators = local_validator_set(3)
            .into_iter()
            .map(|v| ValidatorConfig {
                id: v.id,
                public_key: hex::encode(v.public_key.as_bytes()),
                url: "http://validator:7000".to_string(),
            })
            .collect();
        Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
            },
            chains: ChainsConfig {
                ethereum_adapter_url: "http://eth-adapter:8080".to_string(),
                solana_adapter_url: "http://sol-adapter:8080".to_string(),
                ethereum_reserve_account: "0xreserve".to_string(),
                solana_reserve_account: "SolReserve".to_string(),
                request_timeout_ms: 1000,
            },
            validators,
            bridge: BridgeParams::default(),
            monitor: MonitorConfig::default(),
            api: ApiConfig {
                bind_address: default_api_bind_address(),
                port: default_api_port(),
            },
            overrides: OverrideConfig::default(),
            alerts: AlertConfig::default(),
        }
    }

    #[test]
    fn test_defaults() {
        let b = BridgeParams::default();
        assert_eq!(b.min_amount, BigDecimal::from_str("0.01").unwrap());
        assert_eq!(b.max_amount, BigDecimal::from(100));
        assert_eq!(b.fee_percentage, BigDecimal::from_str("0.001").unwrap());
        assert_eq!(b.rebalance_threshold, BigDecimal::from_str("0.3").unwrap());
        assert_eq!(b.critical_liquidity_ratio, BigDecimal::from_str("0.2").unwrap());
        assert_eq!(b.min_validators, 3);
        assert_eq!(b.max_retries, 3);
        assert_eq!(b.timeout_minutes, 60);
        let m = MonitorConfig::default();
        assert_eq!(m.monitor_interval, Duration::from_secs(30));
        assert_eq!(m.recovery_interval, Duration::from_secs(60));
        assert_eq!(m.health_check_interval, Duration::from_secs(120));
    }

    #[test]
    fn test_valid_config_passes() {
        config().validate().unwrap();
    }

    #[test]
    fn test_duplicate_validator_rejected() {
        let mut c = config();
        let first = c.validators[0].clone();
        c.validators.push(first);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_bad_bridge_params_rejected() {
        let mut c = config();
        c.bridge.max_amount = BigDecimal::from_str("0.001").unwrap();
        assert!(c.validate().is_err());

        let mut c = config();
        c.bridge.fee_percentage = BigDecimal::from(1);
        assert!(c.validate().is_err());

        let mut c = config();
        c.bridge.max_retries = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_parse_validators() {
        let parsed =
            parse_validators("v1@aa@http://a:1, v2@bb@http://b:2/path@x ,").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].url, "http://b:2/path@x");
        assert!(parse_validators("v1@aa").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut c = config();
        c.overrides.admin_token = Some("hunter2".to_string());
        let rendered = format!("{:?}", c);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("postgres://"));
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL for the wallet ledger
    pub postgres_url: String,
    /// Redis connection URL for the event outbox
    pub redis_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".to_string(),
        }
    }
}

/// Where internal-transfer fees end up.
///
/// The platform historically debited the fee from the sender without crediting
/// it anywhere (an effective burn). Both behaviors are supported so the choice
/// is an operational setting, not a code change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FeeSink {
    /// Fee leaves circulation entirely
    Burn,
    /// Fee is credited to the platform treasury wallet in the same transaction
    Treasury { wallet_id: i64 },
}

impl Default for FeeSink {
    fn default() -> Self {
        FeeSink::Burn
    }
}

/// Transfer economics, injected into the transfer service so tests can vary
/// rates deterministically.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransferConfig {
    /// Fee rate applied to both internal transfers and withdrawals (e.g. "0.001" = 0.1%)
    pub fee_rate: Decimal,
    /// Minimum amount for an internal transfer
    pub min_internal_amount: Decimal,
    /// Minimum amount for an external withdrawal
    pub min_withdrawal_amount: Decimal,
    #[serde(default)]
    pub fee_sink: FeeSink,
    /// Required on-chain confirmations per chain code
    #[serde(default)]
    pub required_confirmations: HashMap<String, i32>,
    /// Fallback for chains not listed above
    pub default_confirmations: i32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::new(1, 3), // 0.1%
            min_internal_amount: Decimal::new(1, 2),
            min_withdrawal_amount: Decimal::ONE,
            fee_sink: FeeSink::Burn,
            required_confirmations: HashMap::new(),
            default_confirmations: 12,
        }
    }
}

impl TransferConfig {
    /// Confirmations required before a withdrawal on `chain` is considered final.
    pub fn confirmations_for(&self, chain: &str) -> i32 {
        self.required_confirmations
            .get(chain)
            .copied()
            .unwrap_or(self.default_confirmations)
    }
}

/// Reconciliation sweep over PENDING withdrawals whose outbox event may have
/// been lost.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_confirmations_fallback() {
        let mut cfg = TransferConfig::default();
        cfg.required_confirmations.insert("BTC".to_string(), 3);
        cfg.required_confirmations.insert("ETH".to_string(), 24);

        assert_eq!(cfg.confirmations_for("BTC"), 3);
        assert_eq!(cfg.confirmations_for("ETH"), 24);
        assert_eq!(cfg.confirmations_for("POLYGON"), 12);
    }

    #[test]
    fn test_fee_sink_yaml() {
        let burn: FeeSink = serde_yaml::from_str("mode: burn").unwrap();
        assert_eq!(burn, FeeSink::Burn);

        let treasury: FeeSink = serde_yaml::from_str("mode: treasury\nwallet_id: 42").unwrap();
        assert_eq!(treasury, FeeSink::Treasury { wallet_id: 42 });
    }

    #[test]
    fn test_transfer_config_yaml() {
        let yaml = r#"
fee_rate: "0.001"
min_internal_amount: "0.01"
min_withdrawal_amount: "1"
default_confirmations: 12
required_confirmations:
  BTC: 3
"#;
        let cfg: TransferConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.fee_rate, Decimal::from_str("0.001").unwrap());
        assert_eq!(cfg.fee_sink, FeeSink::Burn);
        assert_eq!(cfg.confirmations_for("BTC"), 3);
    }
}

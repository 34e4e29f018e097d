use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    pub enforcer: EnforcerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub rules: Vec<RuleSeedConfig>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub suspicious_addresses: Vec<String>,
    pub suspicious_addresses_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub ws_url: String,
    pub http_url: String,
    pub contract_address: String,
    #[serde(default)]
    pub excluded_events: Vec<String>,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

/// Settings for the disposable fork node used to pre-execute pending
/// transactions. One process is spawned per simulation and discarded.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_binary")]
    pub binary: String,
    pub fork_url: Option<String>,
    #[serde(default = "default_sandbox_port")]
    pub port: u16,
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
    #[serde(default = "default_startup_poll_ms")]
    pub startup_poll_ms: u64,
    #[serde(default = "default_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            binary: default_sandbox_binary(),
            fork_url: None,
            port: default_sandbox_port(),
            startup_attempts: default_startup_attempts(),
            startup_poll_ms: default_startup_poll_ms(),
            shutdown_grace_ms: default_grace_ms(),
        }
    }
}

impl SandboxConfig {
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

fn default_sandbox_binary() -> String {
    "anvil".to_string()
}

fn default_sandbox_port() -> u16 {
    9000
}

fn default_startup_attempts() -> u32 {
    15
}

fn default_startup_poll_ms() -> u64 {
    500
}

fn default_grace_ms() -> u64 {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct MempoolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    // The sandbox binds one fixed port, so simulations stay serialized
    // unless this is raised together with distinct sandbox ports.
    #[serde(default = "default_max_simulations")]
    pub max_concurrent_simulations: usize,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_simulations: default_max_simulations(),
            stale_after_secs: default_stale_after_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_max_simulations() -> usize {
    1
}

fn default_stale_after_secs() -> u64 {
    3_600
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_retention_blocks")]
    pub retention_blocks: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_blocks: default_retention_blocks(),
        }
    }
}

fn default_queue_size() -> usize {
    1_000
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_retention_blocks() -> u64 {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnforcerConfig {
    pub restriction_contract: String,
    pub private_key: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_enforcer_interval_secs")]
    pub interval_secs: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_enforcer_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
            host: default_api_host(),
        }
    }
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

/// A rule definition seeded into the database at startup.
/// Parameters are an opaque table here; the analyzer decodes them into
/// typed variants when it loads the active rule set.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleSeedConfig {
    pub name: String,
    pub description: String,
    #[serde(default = "default_rule_status")]
    pub status: String,
    #[serde(default = "default_rule_severity")]
    pub severity: String,
    #[serde(default)]
    pub parameters: toml::value::Table,
}

fn default_rule_status() -> String {
    "active".to_string()
}

fn default_rule_severity() -> String {
    "high".to_string()
}

fn default_true() -> bool {
    true
}

fn is_hex_address(s: &str) -> bool {
    s.starts_with("0x") && s.len() == 42 && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        if !is_hex_address(&self.chain.contract_address) {
            return Err(eyre::eyre!(
                "Invalid token contract address '{}'",
                self.chain.contract_address
            ));
        }
        if !is_hex_address(&self.enforcer.restriction_contract) {
            return Err(eyre::eyre!(
                "Invalid restriction contract address '{}'",
                self.enforcer.restriction_contract
            ));
        }
        if self.enforcer.private_key.trim().is_empty() {
            return Err(eyre::eyre!("enforcer.private_key is required"));
        }
        if self.enforcer.batch_size == 0 {
            return Err(eyre::eyre!("enforcer.batch_size must be at least 1"));
        }
        for addr in self.whitelist.iter().chain(&self.suspicious_addresses) {
            if !is_hex_address(addr) {
                return Err(eyre::eyre!("Invalid seed address '{}'", addr));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[database]
url = "postgres://localhost/tokenguard"

[chain]
ws_url = "ws://localhost:8546"
http_url = "http://localhost:8545"
contract_address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"

[enforcer]
restriction_contract = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
private_key = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(BASE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.max_connections, 10); // default
        assert_eq!(config.sandbox.port, 9000); // default
        assert_eq!(config.sandbox.binary, "anvil");
        assert_eq!(config.analyzer.queue_size, 1000);
        assert_eq!(config.enforcer.batch_size, 10);
        assert!(config.mempool.enabled);
    }

    #[test]
    fn test_parse_rules_section() {
        let toml_str = format!(
            "{BASE}\n{}",
            r#"
[[rules]]
name = "large_transfer"
description = "Large amount transfer detected"
severity = "high"

[rules.parameters]
threshold = "1000"
"#
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].name, "large_transfer");
        assert_eq!(config.rules[0].status, "active"); // default
        assert_eq!(
            config.rules[0].parameters.get("threshold").unwrap().as_str(),
            Some("1000")
        );
    }

    #[test]
    fn test_validate_bad_contract_address() {
        let mut config: Config = toml::from_str(BASE).unwrap();
        config.chain.contract_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_private_key() {
        let mut config: Config = toml::from_str(BASE).unwrap();
        config.enforcer.private_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_seed_address() {
        let mut config: Config = toml::from_str(BASE).unwrap();
        config.whitelist.push("0x1234".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sandbox_endpoint() {
        let config: Config = toml::from_str(BASE).unwrap();
        assert_eq!(config.sandbox.endpoint(), "http://127.0.0.1:9000");
    }
}

//! Chain id to network name table
//!
//! Unknown ids never fail: they get a synthetic `chain-<id>` label.

use std::collections::HashMap;

lazy_static::lazy_static! {
    /// Known EVM networks by chain id
    static ref NETWORKS: HashMap<u64, &'static str> = {
        let mut m = HashMap::new();
        m.insert(1, "mainnet");
        m.insert(3, "ropsten");
        m.insert(4, "rinkeby");
        m.insert(5, "goerli");
        m.insert(10, "optimism");
        m.insert(56, "bsc");
        m.insert(137, "polygon");
        m.insert(8453, "base");
        m.insert(42161, "arbitrum");
        m.insert(43114, "avalanche");
        m.insert(80001, "mumbai");
        m.insert(11155111, "sepolia");
        m
    };
}

/// Name for a chain id
pub fn network_name(chain_id: u64) -> String {
    NETWORKS
        .get(&chain_id)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("chain-{}", chain_id))
}

/// Whether the chain id is in the static table
pub fn is_known(chain_id: u64) -> bool {
    NETWORKS.contains_key(&chain_id)
}

/// Decode a chain id as wallets report it
///
/// Accepts `0x`-prefixed hex (`"0x5"`) and plain decimal (`"5"`).
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}

/// Decode a chain id from a JSON value (string or number)
pub fn chain_id_from_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::String(s) => parse_chain_id(s),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Format a chain id the way `wallet_switchEthereumChain` expects it
pub fn to_hex_chain_id(chain_id: u64) -> String {
    format!("0x{:x}", chain_id)
}

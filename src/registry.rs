//! Static registry of CCTP V2 mainnet deployments.
//!
//! Maps a native chain id to its CCTP domain and the three contract
//! endpoints a transfer touches: the USDC token, the `TokenMessengerV2`
//! burn initiator, and the `MessageTransmitterV2` message receiver.
//! Circle deploys the messenger and transmitter at the same address on
//! every supported chain; only the USDC address and domain vary.
//!
//! This is read-only configuration data, not logic. Unknown chains fail
//! resolution instead of falling back to a default.

use alloy::primitives::{Address, address};

use crate::chain::ChainId;

/// `TokenMessengerV2`, identical across all supported mainnets.
pub const TOKEN_MESSENGER_V2: Address = address!("0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d");

/// `MessageTransmitterV2`, identical across all supported mainnets.
pub const MESSAGE_TRANSMITTER_V2: Address = address!("0x81D40F21F12A8F0E3252Bccb954D722d4c464B64");

/// Minimum finality threshold selecting CCTP V2 fast transfer.
pub const FAST_TRANSFER_THRESHOLD: u32 = 1000;

/// Minimum finality threshold for a standard (full-finality) transfer.
pub const STANDARD_TRANSFER_THRESHOLD: u32 = 2000;

/// Resolved endpoints for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEndpoints {
    pub name: &'static str,
    /// CCTP domain id, distinct from the native chain id.
    pub domain: u32,
    pub usdc: Address,
    pub token_messenger: Address,
    pub message_transmitter: Address,
    /// Fast-transfer fee in basis points (1 bps = 0.01%).
    pub fast_transfer_fee_bps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported chain id: {0}")]
pub struct UnknownChainError(pub ChainId);

const fn endpoints(
    name: &'static str,
    domain: u32,
    usdc: Address,
    fast_transfer_fee_bps: u64,
) -> ChainEndpoints {
    ChainEndpoints {
        name,
        domain,
        usdc,
        token_messenger: TOKEN_MESSENGER_V2,
        message_transmitter: MESSAGE_TRANSMITTER_V2,
        fast_transfer_fee_bps,
    }
}

static ETHEREUM: ChainEndpoints = endpoints(
    "Ethereum",
    0,
    address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
    1,
);
static AVALANCHE: ChainEndpoints = endpoints(
    "Avalanche",
    1,
    address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
    1,
);
static OPTIMISM: ChainEndpoints = endpoints(
    "Optimism",
    2,
    address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
    1,
);
static ARBITRUM: ChainEndpoints = endpoints(
    "Arbitrum",
    3,
    address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
    1,
);
static BASE: ChainEndpoints = endpoints(
    "Base",
    6,
    address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
    1,
);
static POLYGON: ChainEndpoints = endpoints(
    "Polygon",
    7,
    address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
    1,
);
static UNICHAIN: ChainEndpoints = endpoints(
    "Unichain",
    10,
    address!("0x078D782b760474a361dDA0AF3839290b0EF57AD6"),
    1,
);
// Linea charges 14 bps for fast transfers; every other chain charges 1.
static LINEA: ChainEndpoints = endpoints(
    "Linea",
    11,
    address!("0x176211869cA2b568f2A7D4EE941E073a821EE1ff"),
    14,
);
static SONIC: ChainEndpoints = endpoints(
    "Sonic",
    13,
    address!("0x29219dd400f2Bf60E5a23d13Be72B486D4038894"),
    1,
);
static WORLD_CHAIN: ChainEndpoints = endpoints(
    "World Chain",
    14,
    address!("0x79A02482A880bCe3F13E09da970dC34dB4cD24D1"),
    1,
);
static SEI: ChainEndpoints = endpoints(
    "Sei",
    16,
    address!("0xe15fC38F6D8c56aF07bbCBe3BAf5708A2Bf42392"),
    1,
);

/// Resolves a native chain id to its CCTP endpoints.
pub fn resolve(chain: ChainId) -> Result<&'static ChainEndpoints, UnknownChainError> {
    match chain.0 {
        1 => Ok(&ETHEREUM),
        10 => Ok(&OPTIMISM),
        130 => Ok(&UNICHAIN),
        137 => Ok(&POLYGON),
        146 => Ok(&SONIC),
        480 => Ok(&WORLD_CHAIN),
        1329 => Ok(&SEI),
        8453 => Ok(&BASE),
        42161 => Ok(&ARBITRUM),
        43114 => Ok(&AVALANCHE),
        59144 => Ok(&LINEA),
        _ => Err(UnknownChainError(chain)),
    }
}

/// Human-readable chain name for error messages; falls back to the raw id
/// so chain-mismatch guidance stays useful even for unknown chains.
pub fn chain_name(chain: ChainId) -> String {
    match resolve(chain) {
        Ok(endpoints) => endpoints.name.to_string(),
        Err(_) => format!("chain {chain}"),
    }
}

/// All chain ids the registry can resolve.
pub fn supported_chains() -> [ChainId; 11] {
    [
        ChainId(1),
        ChainId(10),
        ChainId(130),
        ChainId(137),
        ChainId(146),
        ChainId(480),
        ChainId(1329),
        ChainId(8453),
        ChainId(42161),
        ChainId(43114),
        ChainId(59144),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_base_to_domain_6() {
        let endpoints = resolve(ChainId(8453)).unwrap();

        assert_eq!(endpoints.domain, 6);
        assert_eq!(endpoints.name, "Base");
        assert_eq!(endpoints.token_messenger, TOKEN_MESSENGER_V2);
        assert_eq!(endpoints.message_transmitter, MESSAGE_TRANSMITTER_V2);
    }

    #[test]
    fn unknown_chain_fails_resolution() {
        let err = resolve(ChainId(5)).unwrap_err();

        assert_eq!(err, UnknownChainError(ChainId(5)));
    }

    #[test]
    fn every_supported_chain_resolves() {
        for chain in supported_chains() {
            let endpoints = resolve(chain).unwrap();
            assert!(!endpoints.name.is_empty());
        }
    }

    #[test]
    fn domains_are_unique_across_chains() {
        let mut domains: Vec<u32> = supported_chains()
            .iter()
            .map(|&chain| resolve(chain).unwrap().domain)
            .collect();
        domains.sort_unstable();
        domains.dedup();

        assert_eq!(domains.len(), supported_chains().len());
    }

    #[test]
    fn chain_name_falls_back_to_raw_id() {
        assert_eq!(chain_name(ChainId(1)), "Ethereum");
        assert_eq!(chain_name(ChainId(999)), "chain 999");
    }
}

//! Static chain metadata lookup.

use std::borrow::Cow;

const GENERIC_LOGO: &str =
    "https://static.cx.metamask.io/api/v1/tokenIcons/1/0x0000000000000000000000000000000000000000.png";

/// Display metadata for a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    /// Human readable chain name.
    pub name: Cow<'static, str>,
    /// Logo URL.
    pub logo: &'static str,
}

const CHAINS: &[(u64, &str, &str)] = &[
    (1, "Ethereum Mainnet", GENERIC_LOGO),
    (
        8453,
        "Base",
        "https://static.cx.metamask.io/api/v1/tokenIcons/8453/0x0000000000000000000000000000000000000000.png",
    ),
    (
        42162,
        "Arbitrum",
        "https://static.cx.metamask.io/api/v1/tokenIcons/42161/0x0000000000000000000000000000000000000000.png",
    ),
    (
        59144,
        "Linea",
        "https://static.cx.metamask.io/api/v1/tokenIcons/59144/0x0000000000000000000000000000000000000000.png",
    ),
    (
        11_155_111,
        "Sepolia",
        "https://moralis.com/wp-content/uploads/web3wiki/1147-sepolia/637aee14aa9d9f521437ec16_hYC2y965v3QD7fEoVvutzGbJzVGLSOk6RZPwEQWcA_E-300x300.jpeg",
    ),
];

/// Look up the name and logo of a chain.
///
/// Unknown ids (and 0, the "not connected yet" value) fall back to a generic entry.
#[must_use]
pub fn chain_info(chain_id: u64) -> ChainInfo {
    CHAINS
        .iter()
        .find(|(id, _, _)| *id == chain_id && chain_id != 0)
        .map_or_else(
            || ChainInfo {
                name: Cow::Owned(format!(
                    "Unknown chain ({chain_id}). You can add it with a pull request on GitHub."
                )),
                logo: GENERIC_LOGO,
            },
            |&(_, name, logo)| ChainInfo {
                name: Cow::Borrowed(name),
                logo,
            },
        )
}

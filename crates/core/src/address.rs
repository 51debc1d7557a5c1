use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const TRON_ADDRESS_PREFIX: u8 = 0x41;
const TRON_ADDRESS_LEN: usize = 21;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address {0} is not valid base58check")]
    Encoding(String),
    #[error("address {0} is not a Tron address")]
    WrongNetwork(String),
}

/// Checks a base58check Tron address (`T...`).
pub fn validate_tron_address(address: &str) -> Result<(), AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressError::Empty);
    }

    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| AddressError::Encoding(address.to_string()))?;

    if payload.len() != TRON_ADDRESS_LEN || payload[0] != TRON_ADDRESS_PREFIX {
        return Err(AddressError::WrongNetwork(address.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Shasta,
    Nile,
}

impl Network {
    pub fn trongrid_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.trongrid.io",
            Self::Shasta => "https://api.shasta.trongrid.io",
            Self::Nile => "https://nile.trongrid.io",
        }
    }

    pub fn is_testnet(self) -> bool {
        !matches!(self, Self::Mainnet)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "shasta" => Ok(Self::Shasta),
            "nile" => Ok(Self::Nile),
            _ => Err(format!("unknown network: {}", s)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mainnet => "Tron (Mainnet)",
            Self::Shasta => "Tron (Shasta Testnet)",
            Self::Nile => "Tron (Nile Testnet)",
        };
        f.write_str(name)
    }
}

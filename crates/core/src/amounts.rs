use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const USDT_MAINNET_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

/// What the deposit address is paid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Token {
    Trx,
    Usdt,
}

impl Token {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Trx => "TRX",
            Self::Usdt => "USDT",
        }
    }

    pub fn decimals(self) -> u32 {
        match self {
            Self::Trx => 6,
            Self::Usdt => 6,
        }
    }

    /// Renders a smallest-unit amount with two decimals, e.g. `10.00 TRX`.
    pub fn display(self, units: i64) -> String {
        format!("{} {}", format_units(units, self.decimals()), self.symbol())
    }
}

impl FromStr for Token {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trx" => Ok(Self::Trx),
            "usdt" => Ok(Self::Usdt),
            _ => Err(format!("unknown token: {}", s)),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

pub fn format_units(units: i64, decimals: u32) -> String {
    let value = units as f64 / 10f64.powi(decimals as i32);
    format!("{:.2}", value)
}

/// Converts a USD price into token units at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub units_per_usd: i64,
}

impl Pricing {
    pub fn new(units_per_usd: i64) -> Self {
        Self { units_per_usd }
    }

    /// `None` for non-finite, non-positive, or overflowing amounts.
    pub fn expected_units(&self, amount_usd: f64) -> Option<i64> {
        if !amount_usd.is_finite() || amount_usd <= 0.0 || self.units_per_usd <= 0 {
            return None;
        }
        let units = (amount_usd * self.units_per_usd as f64).round();
        if units < 1.0 || units >= i64::MAX as f64 {
            return None;
        }
        Some(units as i64)
    }
}

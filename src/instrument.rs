use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    USDT,
    USD,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Asset {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC" => Ok(Asset::BTC),
            "ETH" => Ok(Asset::ETH),
            "USDT" => Ok(Asset::USDT),
            "USD" => Ok(Asset::USD),
            other => Err(format!("unsupported asset: `{}`", other)),
        }
    }
}

//A trading pair: base/quote
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    /// The asset you buy or sell
    pub base: Asset,
    /// The asset you pay or receive
    pub quote: Asset,
}

impl Pair {
    /// Returns the usual string code, e.g "BTC-USDT"
    pub fn code(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    pub fn supported() -> &'static [Pair] {
        &[BTC_USDT, ETH_USDT, BTC_USD, ETH_USD]
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pair::supported()
            .iter()
            .find(|p| p.code() == s)
            .copied()
            .ok_or_else(|| format!("unsupported symbol: `{}`", s))
    }
}

impl TryFrom<String> for Pair {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pair> for String {
    fn from(p: Pair) -> String {
        p.code()
    }
}

pub const BTC_USDT: Pair = Pair {
    base: Asset::BTC,
    quote: Asset::USDT,
};
pub const ETH_USDT: Pair = Pair {
    base: Asset::ETH,
    quote: Asset::USDT,
};
pub const BTC_USD: Pair = Pair {
    base: Asset::BTC,
    quote: Asset::USD,
};
pub const ETH_USD: Pair = Pair {
    base: Asset::ETH,
    quote: Asset::USD,
};

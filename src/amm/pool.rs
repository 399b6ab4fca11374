use num_bigint::BigUint;
use num_rational::BigRational;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Uniswap-V2-style constant product pool.
    ConstantProductV2,
}

/// A read-only snapshot of an on-chain AMM pool, normalized so that
/// `reserve0` always corresponds to `base` and `reserve1` to `quote`
/// (spec §3: "post-normalization so reserve0<->base, reserve1<->quote").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub dex: String,
    pub kind: PoolKind,
    pub pair_symbol: String,
    pub pair_address: String,
    pub token0: String,
    pub token1: String,
    #[serde(with = "biguint_serde")]
    pub reserve0: BigUint,
    #[serde(with = "biguint_serde")]
    pub reserve1: BigUint,
    pub fee: BigRational,
    pub base_symbol: String,
    pub quote_symbol: String,
}

impl Pool {
    /// Build a pool from raw (possibly base/quote-swapped) reserves,
    /// normalizing so `reserve_base`/`reserve_quote` line up with the
    /// declared base/quote symbols regardless of token0/token1 order.
    pub fn normalized(
        dex: impl Into<String>,
        pair_address: impl Into<String>,
        token0: impl Into<String>,
        token1: impl Into<String>,
        reserve0: BigUint,
        reserve1: BigUint,
        fee: BigRational,
        base_symbol: impl Into<String>,
        quote_symbol: impl Into<String>,
    ) -> Self {
        let token0 = token0.into();
        let token1 = token1.into();
        let base_symbol = base_symbol.into();
        let quote_symbol = quote_symbol.into();

        let (reserve0, reserve1, token0, token1) = if token0 == base_symbol {
            (reserve0, reserve1, token0, token1)
        } else {
            (reserve1, reserve0, token1, token0)
        };

        let pair_symbol = format!("{base_symbol}/{quote_symbol}");
        Self {
            dex: dex.into(),
            kind: PoolKind::ConstantProductV2,
            pair_symbol,
            pair_address: pair_address.into(),
            token0,
            token1,
            reserve0,
            reserve1,
            fee,
            base_symbol,
            quote_symbol,
        }
    }

    pub fn reserve_base(&self) -> &BigUint {
        &self.reserve0
    }

    pub fn reserve_quote(&self) -> &BigUint {
        &self.reserve1
    }
}

mod biguint_serde {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        value.to_str_radix(10).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(d)?;
        s.parse::<BigUint>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    #[test]
    fn normalizes_swapped_token_order() {
        let fee = BigRational::new(3.into(), 1000.into());
        let pool = Pool::normalized(
            "aerodrome",
            "0xabc",
            "USDT",
            "ETH",
            BigUint::from(1_000_000u64),
            BigUint::from(500u64),
            fee,
            "ETH",
            "USDT",
        );
        // token0 was USDT but base is ETH, so reserves should have swapped.
        assert_eq!(pool.reserve0, BigUint::from(500u64));
        assert_eq!(pool.reserve1, BigUint::from(1_000_000u64));
        assert_eq!(pool.token0, "ETH");
        assert!(!pool.reserve_base().is_zero());
    }
}

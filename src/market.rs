use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

/// Local fiat unit every pair is quoted in.
pub const QUOTE_SYMBOL: &str = "NGN";
pub const QUOTE_GLYPH: &str = "₦";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetId {
    Btc,
    Eth,
    Usdt,
}

impl AssetId {
    pub const ALL: [AssetId; 3] = [AssetId::Btc, AssetId::Eth, AssetId::Usdt];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "btc" => Some(AssetId::Btc),
            "eth" => Some(AssetId::Eth),
            "usdt" => Some(AssetId::Usdt),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetId::Btc => "btc",
            AssetId::Eth => "eth",
            AssetId::Usdt => "usdt",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AssetId::Btc => "Bitcoin",
            AssetId::Eth => "Ethereum",
            AssetId::Usdt => "Tether",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            AssetId::Btc => "BTC",
            AssetId::Eth => "ETH",
            AssetId::Usdt => "USDT",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            AssetId::Btc => "₿",
            AssetId::Eth => "Ξ",
            AssetId::Usdt => "₮",
        }
    }

    /// Upstream ticker key, `<base><quote>` lower-case.
    pub fn pair_key(self) -> String {
        format!("{}{}", self.as_str(), QUOTE_SYMBOL.to_lowercase())
    }

    fn index(self) -> usize {
        match self {
            AssetId::Btc => 0,
            AssetId::Eth => 1,
            AssetId::Usdt => 2,
        }
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub id: AssetId,
    pub name: &'static str,
    pub symbol: &'static str,
    pub glyph: &'static str,
    /// 0.0 means unknown.
    pub price: f64,
}

impl Asset {
    fn unpriced(id: AssetId) -> Self {
        Self {
            id,
            name: id.name(),
            symbol: id.symbol(),
            glyph: id.glyph(),
            price: 0.0,
        }
    }
}

/// The three fixed assets, in display order.
#[derive(Debug, Clone)]
pub struct PriceTable {
    assets: [Asset; 3],
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            assets: AssetId::ALL.map(Asset::unpriced),
        }
    }
}

impl PriceTable {
    pub fn get(&self, id: AssetId) -> &Asset {
        &self.assets[id.index()]
    }

    pub fn price(&self, id: AssetId) -> f64 {
        self.get(id).price
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    #[cfg(test)]
    pub fn set_price(&mut self, id: AssetId, price: f64) {
        self.assets[id.index()].price = price;
    }

    /// Overwrites every price whose pair carries a usable `ticker.last`.
    /// Pairs that are missing or malformed keep their previous value.
    /// Returns how many prices were overwritten.
    pub fn apply_snapshot(&mut self, snapshot: &MarketSnapshot) -> usize {
        let mut updated = 0;
        for asset in self.assets.iter_mut() {
            if let Some(p) = snapshot.last_price(&asset.id.pair_key()) {
                asset.price = p;
                updated += 1;
            }
        }
        updated
    }
}

/// Raw `data` object of a ticker payload: pair key -> `{ ticker: { last } }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot(Map<String, JsonValue>);

impl MarketSnapshot {
    /// Pulls the `data` object out of a full response body.
    /// `None` means the payload is structurally unusable.
    pub fn from_payload(body: &JsonValue) -> Option<Self> {
        match body.get("data") {
            Some(JsonValue::Object(m)) => Some(Self(m.clone())),
            _ => None,
        }
    }

    pub fn from_data(data: JsonValue) -> Option<Self> {
        match data {
            JsonValue::Object(m) => Some(Self(m)),
            _ => None,
        }
    }

    /// `ticker.last` as a price. The leaf must be a string; its numeric
    /// prefix is read (`"1680.50 NGN"` -> 1680.5).
    pub fn last_price(&self, pair: &str) -> Option<f64> {
        let raw = self.0.get(pair)?.get("ticker")?.get("last")?.as_str()?;
        parse_float_prefix(raw).filter(|p| p.is_finite() && *p >= 0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Longest leading decimal number in `raw`, after leading whitespace, the way
/// a browser `parseFloat` reads it. `None` when there are no digits up front.
pub fn parse_float_prefix(raw: &str) -> Option<f64> {
    let s = raw.trim_start();
    let b = s.as_bytes();
    let mut end = 0;
    if matches!(b.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < b.len() && b[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < b.len() && b[end] == b'.' {
        let frac_start = end + 1;
        let mut j = frac_start;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        digits += j - frac_start;
        end = j;
    }
    if digits == 0 {
        return None;
    }
    if end < b.len() && matches!(b[end], b'e' | b'E') {
        let mut j = end + 1;
        if j < b.len() && matches!(b[j], b'+' | b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            end = j;
        }
    }
    s[..end].parse::<f64>().ok()
}

/// Bundled dataset used when every route fails.
pub fn demo_snapshot() -> MarketSnapshot {
    MarketSnapshot::from_data(json!({
        "btcngn": { "ticker": { "last": "162500000.0" } },
        "ethngn": { "ticker": { "last": "4500200.0" } },
        "usdtngn": { "ticker": { "last": "1680.50" } }
    }))
    .unwrap_or_default()
}

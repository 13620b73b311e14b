//! Derived display state. Everything here is a pure function of [`AppState`]
//! plus the raw amount the user typed; nothing in this module fails.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::{
    market::{parse_float_prefix, Asset, AssetId, QUOTE_GLYPH, QUOTE_SYMBOL},
    state::AppState,
};

pub const ZERO_CONVERSION: &str = "0.00000000";
pub const FALLBACK_BANNER: &str = "Network blocked. Showing Demo Data.";
const LABEL_LOADING: &str = "Updating...";
const LABEL_IDLE: &str = "↻ Refresh Data";

#[derive(Debug, Clone, Serialize)]
pub struct AssetCard {
    pub id: AssetId,
    pub name: &'static str,
    pub symbol: &'static str,
    pub glyph: &'static str,
    pub pair: String,
    pub price: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub asset: AssetId,
    pub amount: f64,
    pub result: String,
    pub currency: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewModel {
    pub cards: Vec<AssetCard>,
    pub hero: BTreeMap<AssetId, String>,
    pub selected: AssetId,
    pub rate: String,
    pub conversion: Conversion,
    pub last_updated: Option<String>,
    pub loading: bool,
    pub refresh_label: &'static str,
    pub banner: Option<&'static str>,
}

/// Fixed-point with `dp` decimals; exact midpoints round away from zero.
fn to_fixed(x: f64, dp: u32) -> String {
    match Decimal::from_f64_retain(x) {
        Some(d) => format!(
            "{:.*}",
            dp as usize,
            d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
        ),
        None => format!("{:.*}", dp as usize, x),
    }
}

/// Two decimals with comma thousands separators. Zero, unknown and
/// non-finite amounts render as `0.00`.
pub fn format_currency(amount: f64) -> String {
    if !amount.is_finite() || amount == 0.0 {
        return "0.00".to_string();
    }
    let fixed = to_fixed(amount.abs(), 2);
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

pub fn format_fiat(amount: f64) -> String {
    format!("{QUOTE_GLYPH}{}", format_currency(amount))
}

/// Fiat amount -> units of the asset, fixed to 8 decimals.
pub fn format_conversion(amount: f64, price: f64) -> String {
    if !(amount > 0.0) || !(price > 0.0) || !price.is_finite() || !amount.is_finite() {
        return ZERO_CONVERSION.to_string();
    }
    to_fixed(amount / price, 8)
}

/// Reads a user-typed amount the way a browser `parseFloat` would (longest
/// numeric prefix), then coerces anything unusable or negative to 0.
pub fn parse_amount(raw: &str) -> f64 {
    match parse_float_prefix(raw) {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

pub fn card(asset: &Asset) -> AssetCard {
    AssetCard {
        id: asset.id,
        name: asset.name,
        symbol: asset.symbol,
        glyph: asset.glyph,
        pair: format!("{}/{}", asset.symbol, QUOTE_SYMBOL),
        price: format_fiat(asset.price),
    }
}

pub fn rate_display(state: &AppState) -> String {
    let asset = state.prices.get(state.selected);
    format!("1 {} = {}", asset.symbol, format_fiat(asset.price))
}

pub fn conversion(state: &AppState, asset: AssetId, amount: f64) -> Conversion {
    let a = state.prices.get(asset);
    Conversion {
        asset,
        amount,
        result: format_conversion(amount, a.price),
        currency: a.symbol,
    }
}

pub fn last_updated_label(ts: &DateTime<Local>) -> String {
    format!("Last updated: {}", ts.format("%H:%M"))
}

pub fn render(state: &AppState, amount: f64) -> ViewModel {
    ViewModel {
        cards: state.prices.iter().map(card).collect(),
        hero: state
            .prices
            .iter()
            .map(|a| (a.id, format_fiat(a.price)))
            .collect(),
        selected: state.selected,
        rate: rate_display(state),
        conversion: conversion(state, state.selected, amount),
        last_updated: state.last_updated.as_ref().map(last_updated_label),
        loading: state.loading,
        refresh_label: if state.loading { LABEL_LOADING } else { LABEL_IDLE },
        banner: state.using_fallback.then_some(FALLBACK_BANNER),
    }
}

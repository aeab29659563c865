//! Binance USDT-M futures REST gateway
//!
//! Thin signed client over the venue REST API. Transient transport failures
//! retry with exponential backoff; mapped exchange errors short-circuit so
//! the policy table in `codes` decides what happens next.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::domain::{Kline, SymbolFilters};
use crate::error::{PeregrineError, Result};
use crate::exchange::codes;
use crate::exchange::latency::LatencyTracker;
use crate::exchange::traits::{
    AccountBalance, BookTicker, ExchangeApi, FundingSample, OpenOrder, OrderAck, OrderParams,
    OrderSide, OrderType, PositionInfo,
};

type HmacSha256 = Hmac<Sha256>;

const QUOTE_ASSET: &str = "USDT";

#[derive(Clone)]
pub struct BinanceFuturesClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    retry_max_attempts: u32,
    retry_base: Duration,
    latency: Arc<LatencyTracker>,
}

impl BinanceFuturesClient {
    pub fn new(config: &ExchangeConfig, latency: Arc<LatencyTracker>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("peregrine/0.1")
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PeregrineError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
            latency,
        })
    }

    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| PeregrineError::Internal(format!("invalid API secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-mbx-apikey"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| PeregrineError::Internal(format!("invalid API key header: {}", e)))?,
        );
        Ok(headers)
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Issue a request, recording latency and mapping error bodies. Retries
    /// transient transport failures with exponential backoff; mapped venue
    /// codes are returned immediately for the caller's policy table.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
        signed: bool,
    ) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut query_params = params.clone();
            if signed {
                let timestamp = Utc::now().timestamp_millis().to_string();
                query_params.push(("recvWindow", self.recv_window_ms.to_string()));
                query_params.push(("timestamp", timestamp));
                let query = Self::encode_query(&query_params);
                let signature = self.sign(&query)?;
                query_params.push(("signature", signature));
            }
            let query = Self::encode_query(&query_params);
            let url = format!("{}{}?{}", self.base_url, path, query);

            let mut builder = self.http.request(method.clone(), &url);
            if signed {
                builder = builder.headers(self.auth_headers()?);
            }

            let started = Instant::now();
            let outcome = builder.send().await;
            self.latency.record(started.elapsed());

            let err = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after_secs = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(1);
                        PeregrineError::RateLimited { retry_after_secs }
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        match serde_json::from_str::<RawApiError>(&body) {
                            Ok(api_err) => PeregrineError::Exchange {
                                code: api_err.code,
                                message: api_err.msg,
                            },
                            Err(_) => PeregrineError::Internal(format!(
                                "venue returned {}: {}",
                                status, body
                            )),
                        }
                    }
                }
                Err(e) if e.is_timeout() => PeregrineError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
                Err(e) => PeregrineError::Http(e),
            };

            // Mapped venue codes never blind-retry here.
            if let Some(code) = err.exchange_code() {
                if codes::is_mapped(code) {
                    return Err(err);
                }
            }

            if !err.is_transient() || attempt >= self.retry_max_attempts {
                return Err(err);
            }

            let backoff = match &err {
                PeregrineError::RateLimited { retry_after_secs } => {
                    Duration::from_secs(*retry_after_secs)
                }
                _ => self.retry_base * 2u32.saturating_pow(attempt - 1),
            };
            warn!(
                path = path,
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "transient venue error, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn get_public(&self, path: &str, params: Vec<(&str, String)>) -> Result<String> {
        self.request(Method::GET, path, params, false).await
    }

    async fn get_signed(&self, path: &str, params: Vec<(&str, String)>) -> Result<String> {
        self.request(Method::GET, path, params, true).await
    }
}

#[derive(Debug, Deserialize)]
struct RawApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct RawTickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct RawPremiumIndex {
    #[serde(rename = "markPrice")]
    mark_price: String,
}

#[derive(Debug, Deserialize)]
struct RawBookTicker {
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
}

#[derive(Debug, Deserialize)]
struct RawFundingRate {
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingTime")]
    funding_time: i64,
}

#[derive(Debug, Deserialize)]
struct RawOpenOrder {
    #[serde(rename = "orderId")]
    order_id: i64,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    #[serde(rename = "stopPrice", default)]
    stop_price: Option<String>,
    #[serde(rename = "closePosition", default)]
    close_position: bool,
    #[serde(rename = "reduceOnly", default)]
    reduce_only: bool,
    #[serde(rename = "origQty", default)]
    orig_qty: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RawPositionRisk {
    symbol: String,
    #[serde(rename = "positionAmt")]
    position_amt: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
    leverage: String,
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: String,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    balance: String,
    #[serde(rename = "availableBalance")]
    available_balance: String,
}

#[derive(Debug, Deserialize)]
struct RawOrderAck {
    #[serde(rename = "orderId")]
    order_id: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct RawSymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
    raw.parse()
        .map_err(|_| PeregrineError::Internal(format!("unparseable {}: {}", field, raw)))
}

fn parse_order_side(raw: &str) -> Result<OrderSide> {
    match raw {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(PeregrineError::Internal(format!(
            "unknown order side: {}",
            other
        ))),
    }
}

fn parse_order_type(raw: &str) -> Option<OrderType> {
    match raw {
        "MARKET" => Some(OrderType::Market),
        "TAKE_PROFIT_MARKET" => Some(OrderType::TakeProfitMarket),
        "STOP_MARKET" => Some(OrderType::StopMarket),
        _ => None,
    }
}

fn parse_kline_row(row: &[serde_json::Value]) -> Option<Kline> {
    if row.len() < 7 {
        return None;
    }
    let open_time = DateTime::from_timestamp_millis(row[0].as_i64()?)?;
    let close_time = DateTime::from_timestamp_millis(row[6].as_i64()?)?;
    Some(Kline {
        open_time,
        open: row[1].as_str()?.parse().ok()?,
        high: row[2].as_str()?.parse().ok()?,
        low: row[3].as_str()?.parse().ok()?,
        close: row[4].as_str()?.parse().ok()?,
        volume: row[5].as_str()?.parse().ok()?,
        close_time,
    })
}

fn filters_from_info(info: &RawSymbolInfo) -> SymbolFilters {
    let mut filters = SymbolFilters::permissive(&info.symbol);
    for f in &info.filters {
        match f.get("filterType").and_then(|v| v.as_str()) {
            Some("PRICE_FILTER") => {
                if let Some(tick) = f.get("tickSize").and_then(|v| v.as_str()) {
                    if let Ok(v) = tick.parse() {
                        filters.tick_size = v;
                    }
                }
            }
            Some("LOT_SIZE") => {
                if let Some(step) = f.get("stepSize").and_then(|v| v.as_str()) {
                    if let Ok(v) = step.parse() {
                        filters.step_size = v;
                    }
                }
                if let Some(min) = f.get("minQty").and_then(|v| v.as_str()) {
                    if let Ok(v) = min.parse() {
                        filters.min_qty = v;
                    }
                }
            }
            Some("MIN_NOTIONAL") => {
                if let Some(notional) = f.get("notional").and_then(|v| v.as_str()) {
                    if let Ok(v) = notional.parse() {
                        filters.min_notional = v;
                    }
                }
            }
            _ => {}
        }
    }
    filters
}

#[async_trait::async_trait]
impl ExchangeApi for BinanceFuturesClient {
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        let body = self
            .get_public(
                "/fapi/v1/klines",
                vec![
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.min(1500).to_string()),
                ],
            )
            .await?;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(&body)?;
        let klines: Vec<Kline> = rows.iter().filter_map(|r| parse_kline_row(r)).collect();
        debug!(symbol = symbol, count = klines.len(), "fetched klines");
        Ok(klines)
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<Decimal> {
        let body = self
            .get_public(
                "/fapi/v1/ticker/price",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        let raw: RawTickerPrice = serde_json::from_str(&body)?;
        parse_decimal(&raw.price, "ticker price")
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal> {
        let body = self
            .get_public(
                "/fapi/v1/premiumIndex",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        let raw: RawPremiumIndex = serde_json::from_str(&body)?;
        parse_decimal(&raw.mark_price, "mark price")
    }

    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker> {
        let body = self
            .get_public(
                "/fapi/v1/ticker/bookTicker",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        let raw: RawBookTicker = serde_json::from_str(&body)?;
        Ok(BookTicker {
            bid: parse_decimal(&raw.bid_price, "bid price")?,
            ask: parse_decimal(&raw.ask_price, "ask price")?,
        })
    }

    async fn get_funding_rates(&self, symbol: &str, limit: u32) -> Result<Vec<FundingSample>> {
        let body = self
            .get_public(
                "/fapi/v1/fundingRate",
                vec![
                    ("symbol", symbol.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let raw: Vec<RawFundingRate> = serde_json::from_str(&body)?;
        let mut samples = Vec::with_capacity(raw.len());
        for r in raw {
            let time = DateTime::from_timestamp_millis(r.funding_time).ok_or_else(|| {
                PeregrineError::Internal(format!("bad funding time: {}", r.funding_time))
            })?;
            samples.push(FundingSample {
                rate: parse_decimal(&r.funding_rate, "funding rate")?,
                time,
            });
        }
        samples.sort_by_key(|s| s.time);
        Ok(samples)
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let body = self
            .get_signed(
                "/fapi/v1/openOrders",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        let raw: Vec<RawOpenOrder> = serde_json::from_str(&body)?;
        let mut orders = Vec::with_capacity(raw.len());
        for r in raw {
            // Order types the engine never places are irrelevant to callers.
            let Some(order_type) = parse_order_type(&r.order_type) else {
                continue;
            };
            orders.push(OpenOrder {
                order_id: r.order_id.to_string(),
                symbol: r.symbol,
                side: parse_order_side(&r.side)?,
                order_type,
                stop_price: r.stop_price.as_deref().and_then(|s| s.parse().ok()),
                close_position: r.close_position,
                reduce_only: r.reduce_only,
                quantity: r.orig_qty.as_deref().and_then(|s| s.parse().ok()),
                status: r.status,
            });
        }
        Ok(orders)
    }

    async fn get_position_info(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        let body = self
            .get_signed(
                "/fapi/v2/positionRisk",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        let raw: Vec<RawPositionRisk> = serde_json::from_str(&body)?;
        for r in raw {
            let amt = parse_decimal(&r.position_amt, "positionAmt")?;
            if amt.is_zero() {
                continue;
            }
            return Ok(Some(PositionInfo {
                symbol: r.symbol,
                position_amt: amt,
                entry_price: parse_decimal(&r.entry_price, "entryPrice")?,
                leverage: r.leverage.parse().unwrap_or(1),
                mark_price: parse_decimal(&r.mark_price, "markPrice")?,
                unrealized_pnl: parse_decimal(&r.unrealized_profit, "unRealizedProfit")?,
            }));
        }
        Ok(None)
    }

    async fn get_balance(&self) -> Result<AccountBalance> {
        let body = self.get_signed("/fapi/v2/balance", vec![]).await?;
        let raw: Vec<RawBalance> = serde_json::from_str(&body)?;
        raw.into_iter()
            .find(|b| b.asset == QUOTE_ASSET)
            .map(|b| {
                Ok(AccountBalance {
                    asset: b.asset.clone(),
                    balance: parse_decimal(&b.balance, "balance")?,
                    available: parse_decimal(&b.available_balance, "availableBalance")?,
                })
            })
            .unwrap_or_else(|| {
                Err(PeregrineError::Internal(format!(
                    "no {} balance in account response",
                    QUOTE_ASSET
                )))
            })
    }

    async fn place_order(&self, params: &OrderParams) -> Result<OrderAck> {
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", params.symbol.clone()),
            ("side", params.side.as_str().to_string()),
            ("type", params.order_type.as_str().to_string()),
        ];
        if let Some(qty) = params.quantity {
            query.push(("quantity", qty.normalize().to_string()));
        }
        if let Some(stop) = params.stop_price {
            query.push(("stopPrice", stop.normalize().to_string()));
        }
        if params.close_position {
            query.push(("closePosition", "true".to_string()));
        }
        if params.reduce_only {
            query.push(("reduceOnly", "true".to_string()));
        }
        if let Some(working) = params.working_type {
            query.push(("workingType", working.as_str().to_string()));
        }

        let body = self.request(Method::POST, "/fapi/v1/order", query, true).await?;
        let raw: RawOrderAck = serde_json::from_str(&body)?;
        Ok(OrderAck {
            order_id: raw.order_id.to_string(),
            status: raw.status,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            "/fapi/v1/order",
            vec![
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
            true,
        )
        .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.request(
            Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
            true,
        )
        .await?;
        Ok(())
    }

    async fn get_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let body = self
            .get_public(
                "/fapi/v1/exchangeInfo",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        let info: RawExchangeInfo = serde_json::from_str(&body)?;
        info.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .map(filters_from_info)
            .ok_or_else(|| {
                PeregrineError::MarketDataUnavailable(format!(
                    "symbol {} absent from exchange info",
                    symbol
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn kline_row_parsing() {
        let row = vec![
            json!(1700000000000_i64),
            json!("100.0"),
            json!("105.0"),
            json!("98.0"),
            json!("103.0"),
            json!("1234.5"),
            json!(1700000179999_i64),
        ];
        let kline = parse_kline_row(&row).expect("row should parse");
        assert_eq!(kline.open, dec!(100.0));
        assert_eq!(kline.high, dec!(105.0));
        assert_eq!(kline.close, dec!(103.0));
    }

    #[test]
    fn short_kline_row_rejected() {
        let row = vec![json!(1700000000000_i64), json!("100.0")];
        assert!(parse_kline_row(&row).is_none());
    }

    #[test]
    fn filters_parse_from_exchange_info() {
        let info = RawSymbolInfo {
            symbol: "ETHUSDT".to_string(),
            filters: vec![
                json!({"filterType": "PRICE_FILTER", "tickSize": "0.01"}),
                json!({"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"}),
                json!({"filterType": "MIN_NOTIONAL", "notional": "20"}),
            ],
        };
        let filters = filters_from_info(&info);
        assert_eq!(filters.tick_size, dec!(0.01));
        assert_eq!(filters.step_size, dec!(0.001));
        assert_eq!(filters.min_qty, dec!(0.001));
        assert_eq!(filters.min_notional, dec!(20));
    }

    #[test]
    fn api_error_body_parses() {
        let raw: RawApiError =
            serde_json::from_str(r#"{"code": -2019, "msg": "Margin is insufficient."}"#).unwrap();
        assert_eq!(raw.code, -2019);
    }
}

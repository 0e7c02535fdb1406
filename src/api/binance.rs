use std::time::Duration;

use tracing::debug;

use super::types::{binance_symbol, ApiConfig, ApiEndpoint, ApiError};
use super::HistoricalSource;
use crate::series::{
    interval_label, Candle, FundingRate, MarketRecord, OpenInterest, SeriesId, SeriesKind,
    TimestampMS,
};

/// Binance Futures REST client for historical klines, funding and open
/// interest. Pacing between requests is owned by the scheduler's throttle,
/// not this client.
pub struct BinanceFuturesClient {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceFuturesClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url: config.base_url.clone() })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ApiError> {
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(format!("Request timed out: {}", e))
                } else {
                    ApiError::Network(format!("Request failed: {}", e))
                }
            })?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ApiError::RateLimit(format!(
                "Rate limit exceeded, retry after {} seconds",
                retry_after
            )));
        }

        if !response.status().is_success() {
            return Err(ApiError::Http(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Parse(format!("Failed to read response body: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| ApiError::Parse(format!("Failed to parse JSON: {}", e)))
    }

    fn build_url(
        &self,
        endpoint: ApiEndpoint,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
        limit: u32,
    ) -> String {
        let symbol = binance_symbol(&series.symbol);
        let limit = limit.min(endpoint.max_limit());
        let mut url = format!("{}{}?symbol={}", self.base_url, endpoint.binance_path(), symbol);
        if let SeriesKind::Candles { interval } = series.kind {
            url.push_str(&format!("&interval={}", interval_label(interval)));
        }
        if endpoint == ApiEndpoint::OpenInterestHist {
            url.push_str("&period=5m");
        }
        // Binance treats endTime as inclusive; our ranges are half-open.
        url.push_str(&format!("&startTime={}&endTime={}&limit={}", start, end - 1, limit));
        url
    }

    async fn fetch_klines(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
        limit: u32,
    ) -> Result<Vec<MarketRecord>, ApiError> {
        let url = self.build_url(ApiEndpoint::Klines, series, start, end, limit);
        let raw = self.get_json(&url).await?;
        let rows = raw
            .as_array()
            .ok_or_else(|| ApiError::Parse("Expected klines response to be an array".to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let array = row
                .as_array()
                .ok_or_else(|| ApiError::Parse("Expected kline to be an array".to_string()))?;
            if array.len() < 9 {
                return Err(ApiError::Parse(format!(
                    "Expected at least 9 elements in kline array, got {}",
                    array.len()
                )));
            }
            records.push(MarketRecord::Candle(Candle {
                open_time: parse_timestamp(&array[0])?,
                open: parse_f64(&array[1])?,
                high: parse_f64(&array[2])?,
                low: parse_f64(&array[3])?,
                close: parse_f64(&array[4])?,
                volume: parse_f64(&array[5])?,
                trade_count: parse_u64(&array[8])?,
            }));
        }
        Ok(records)
    }

    async fn fetch_funding(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
        limit: u32,
    ) -> Result<Vec<MarketRecord>, ApiError> {
        let url = self.build_url(ApiEndpoint::FundingRate, series, start, end, limit);
        let raw = self.get_json(&url).await?;
        let rows = raw
            .as_array()
            .ok_or_else(|| ApiError::Parse("Expected funding response to be an array".to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let time = row
                .get("fundingTime")
                .map(parse_timestamp)
                .transpose()?
                .ok_or_else(|| ApiError::Parse("Funding record missing fundingTime".to_string()))?;
            let rate = row
                .get("fundingRate")
                .map(parse_f64)
                .transpose()?
                .ok_or_else(|| ApiError::Parse("Funding record missing fundingRate".to_string()))?;
            let mark_price = row.get("markPrice").and_then(|v| parse_f64(v).ok());
            records.push(MarketRecord::Funding(FundingRate { time, rate, mark_price }));
        }
        Ok(records)
    }

    async fn fetch_open_interest(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
        limit: u32,
    ) -> Result<Vec<MarketRecord>, ApiError> {
        let url = self.build_url(ApiEndpoint::OpenInterestHist, series, start, end, limit);
        let raw = self.get_json(&url).await?;
        let rows = raw
            .as_array()
            .ok_or_else(|| ApiError::Parse("Expected open interest response to be an array".to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let time = row
                .get("timestamp")
                .map(parse_timestamp)
                .transpose()?
                .ok_or_else(|| ApiError::Parse("Open interest record missing timestamp".to_string()))?;
            let open_interest = row
                .get("sumOpenInterest")
                .map(parse_f64)
                .transpose()?
                .ok_or_else(|| ApiError::Parse("Open interest record missing sumOpenInterest".to_string()))?;
            records.push(MarketRecord::OpenInterest(OpenInterest { time, open_interest }));
        }
        Ok(records)
    }
}

impl HistoricalSource for BinanceFuturesClient {
    async fn fetch(
        &self,
        series: &SeriesId,
        start: TimestampMS,
        end: TimestampMS,
        limit: u32,
    ) -> Result<Vec<MarketRecord>, ApiError> {
        match series.kind {
            SeriesKind::Candles { .. } => self.fetch_klines(series, start, end, limit).await,
            SeriesKind::FundingRates => self.fetch_funding(series, start, end, limit).await,
            SeriesKind::OpenInterest => self.fetch_open_interest(series, start, end, limit).await,
            SeriesKind::Trades | SeriesKind::Liquidations => {
                Err(ApiError::UnsupportedSeries(series.kind.label()))
            }
        }
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Result<TimestampMS, ApiError> {
    value
        .as_i64()
        .ok_or_else(|| ApiError::Parse(format!("Expected timestamp to be i64, got: {:?}", value)))
}

fn parse_f64(value: &serde_json::Value) -> Result<f64, ApiError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| ApiError::Parse(format!("Failed to parse '{}' as f64", s))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ApiError::Parse(format!("Failed to convert number to f64: {:?}", n))),
        _ => Err(ApiError::Parse(format!("Expected string or number, got: {:?}", value))),
    }
}

fn parse_u64(value: &serde_json::Value) -> Result<u64, ApiError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| ApiError::Parse(format!("Failed to parse '{}' as u64", s))),
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ApiError::Parse(format!("Failed to convert number to u64: {:?}", n))),
        _ => Err(ApiError::Parse(format!("Expected string or number, got: {:?}", value))),
    }
}

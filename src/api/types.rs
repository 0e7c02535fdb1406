use serde::Deserialize;
use thiserror::Error;

/// Historical data endpoints the engine pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiEndpoint {
    /// Kline/candlestick data
    Klines,
    /// Funding rate settlement history
    FundingRate,
    /// Open interest snapshots
    OpenInterestHist,
}

impl ApiEndpoint {
    /// Binance Futures API path for this endpoint.
    pub fn binance_path(&self) -> &'static str {
        match self {
            ApiEndpoint::Klines => "/fapi/v1/klines",
            ApiEndpoint::FundingRate => "/fapi/v1/fundingRate",
            ApiEndpoint::OpenInterestHist => "/futures/data/openInterestHist",
        }
    }

    /// Hard per-request record ceiling published for this endpoint.
    pub fn max_limit(&self) -> u32 {
        match self {
            ApiEndpoint::Klines => 1500,
            ApiEndpoint::FundingRate => 1000,
            ApiEndpoint::OpenInterestHist => 500,
        }
    }
}

/// API error types
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Series kind not served by this source: {0}")]
    UnsupportedSeries(String),
}

impl ApiError {
    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::Http(_) | ApiError::RateLimit(_)
        )
    }
}

/// Configuration for the historical API client.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl ApiConfig {
    /// Binance Futures API configuration.
    pub fn binance_futures() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::binance_futures()
    }
}

/// Convert a canonical symbol ("BTC-USDT-PERP") to Binance's format ("BTCUSDT").
pub fn binance_symbol(symbol: &str) -> String {
    symbol.trim_end_matches("-PERP").replace('-', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_conversion() {
        assert_eq!(binance_symbol("BTC-USDT-PERP"), "BTCUSDT");
        assert_eq!(binance_symbol("ETH-USDT"), "ETHUSDT");
        assert_eq!(binance_symbol("BTCUSDT"), "BTCUSDT");
    }

    #[test]
    fn endpoint_limits() {
        assert_eq!(ApiEndpoint::Klines.max_limit(), 1500);
        assert_eq!(ApiEndpoint::FundingRate.max_limit(), 1000);
        assert_eq!(ApiEndpoint::OpenInterestHist.max_limit(), 500);
    }
}

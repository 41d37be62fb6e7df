//! Public (unauthenticated) order book feeds.
//!
//! Read-only depth snapshots for paper trading and the observation recorder:
//! - Nobitex spot books (`/v2/orderbook/{symbol}`)
//! - CoinEx futures books (`/v2/futures/depth`)

use super::error::VenueError;
use super::traits::BookFeed;
use super::types::OrderBook;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

pub const NOBITEX_API_URL: &str = "https://api.nobitex.ir";
pub const COINEX_API_URL: &str = "https://api.coinex.com";

/// Depth levels requested from venues that take a limit.
const DEPTH_LIMIT: u32 = 5;

/// Wire format of a depth endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookFormat {
    Nobitex,
    CoinexFutures,
}

#[derive(Debug, Deserialize)]
struct NobitexOrderbook {
    status: String,
    #[serde(default)]
    bids: Vec<[Decimal; 2]>,
    #[serde(default)]
    asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Deserialize)]
struct CoinexEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<CoinexDepthData>,
}

#[derive(Debug, Deserialize)]
struct CoinexDepthData {
    depth: CoinexDepth,
}

#[derive(Debug, Deserialize)]
struct CoinexDepth {
    #[serde(default)]
    asks: Vec<[Decimal; 2]>,
    #[serde(default)]
    bids: Vec<[Decimal; 2]>,
}

fn levels(raw: Vec<[Decimal; 2]>) -> Vec<(Decimal, Decimal)> {
    raw.into_iter().map(|[price, qty]| (price, qty)).collect()
}

/// HTTP client for one public depth endpoint.
#[derive(Debug, Clone)]
pub struct PublicBookClient {
    http: Client,
    base_url: String,
    format: BookFormat,
}

impl PublicBookClient {
    /// Create a client against `base_url` speaking `format`.
    pub fn new(base_url: &str, format: BookFormat) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            format,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        market: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, VenueError> {
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::market_data(
                market,
                format!("HTTP {}: {}", status, body),
            ));
        }
        Ok(response.json().await?)
    }

    async fn fetch_nobitex(&self, market: &str) -> Result<OrderBook, VenueError> {
        let url = format!("{}/v2/orderbook/{}", self.base_url, market);
        let raw: NobitexOrderbook = self.get_json(market, &url, &[]).await?;
        if raw.status != "ok" {
            return Err(VenueError::market_data(
                market,
                format!("status {}", raw.status),
            ));
        }
        Ok(OrderBook::new(market, levels(raw.bids), levels(raw.asks)))
    }

    async fn fetch_coinex_futures(&self, market: &str) -> Result<OrderBook, VenueError> {
        let url = format!("{}/v2/futures/depth", self.base_url);
        let query = [
            ("market", market.to_string()),
            ("limit", DEPTH_LIMIT.to_string()),
            ("interval", "0".to_string()),
        ];
        let raw: CoinexEnvelope = self.get_json(market, &url, &query).await?;
        let data = match (raw.code, raw.data) {
            (0, Some(data)) => data,
            (code, _) => {
                return Err(VenueError::market_data(
                    market,
                    format!("code {}: {}", code, raw.message),
                ))
            }
        };
        Ok(OrderBook::new(
            market,
            levels(data.depth.bids),
            levels(data.depth.asks),
        ))
    }
}

#[async_trait]
impl BookFeed for PublicBookClient {
    #[instrument(skip(self), name = "public_book")]
    async fn fetch_orderbook(&self, market: &str) -> Result<OrderBook, VenueError> {
        let book = match self.format {
            BookFormat::Nobitex => self.fetch_nobitex(market).await?,
            BookFormat::CoinexFutures => self.fetch_coinex_futures(market).await?,
        };

        // Empty sides are reported by the caller's top_of_book check, but a
        // completely empty snapshot is never useful.
        if book.bids.is_empty() && book.asks.is_empty() {
            return Err(VenueError::market_data(market, "empty book"));
        }

        debug!(
            %market,
            bids = book.bids.len(),
            asks = book.asks.len(),
            best_bid = ?book.best_bid(),
            best_ask = ?book.best_ask(),
            "Fetched order book"
        );
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_nobitex_book_parsing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/orderbook/USDTIRT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "lastUpdate": 1700000000000u64,
                "bids": [["1000000", "12.5"], ["999000", "3"]],
                "asks": [["1001000", "4"]]
            })))
            .mount(&server)
            .await;

        let client = PublicBookClient::new(&server.uri(), BookFormat::Nobitex).unwrap();
        let book = client.fetch_orderbook("USDTIRT").await.unwrap();

        assert_eq!(book.market, "USDTIRT");
        assert_eq!(book.best_bid(), Some(dec!(1000000)));
        assert_eq!(book.best_ask(), Some(dec!(1001000)));
        assert_eq!(book.bids[0].quantity, dec!(12.5));
        assert_eq!(book.mid().unwrap(), dec!(1000500));
    }

    #[tokio::test]
    async fn test_coinex_futures_book_parsing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/futures/depth"))
            .and(query_param("market", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "message": "OK",
                "data": {
                    "market": "BTCUSDT",
                    "is_full": true,
                    "depth": {
                        "asks": [["70851.94", "0.0004"]],
                        "bids": [["70850.00", "0.2"]],
                        "last": "70851.00",
                        "updated_at": 1700000000000u64
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = PublicBookClient::new(&server.uri(), BookFormat::CoinexFutures).unwrap();
        let book = client.fetch_orderbook("BTCUSDT").await.unwrap();

        assert_eq!(book.best_bid(), Some(dec!(70850.00)));
        assert_eq!(book.best_ask(), Some(dec!(70851.94)));
    }

    #[tokio::test]
    async fn test_coinex_error_code_is_market_data_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/futures/depth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 3639,
                "message": "market not found",
                "data": null
            })))
            .mount(&server)
            .await;

        let client = PublicBookClient::new(&server.uri(), BookFormat::CoinexFutures).unwrap();
        let err = client.fetch_orderbook("NOPEUSDT").await.unwrap_err();
        assert!(matches!(err, VenueError::MarketDataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_http_error_and_empty_book() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/orderbook/BTCIRT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/orderbook/ETHIRT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "bids": [],
                "asks": []
            })))
            .mount(&server)
            .await;

        let client = PublicBookClient::new(&server.uri(), BookFormat::Nobitex).unwrap();
        assert!(matches!(
            client.fetch_orderbook("BTCIRT").await,
            Err(VenueError::MarketDataUnavailable { .. })
        ));
        assert!(matches!(
            client.fetch_orderbook("ETHIRT").await,
            Err(VenueError::MarketDataUnavailable { .. })
        ));
    }
}

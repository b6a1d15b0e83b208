use super::{Exchange, ExchangeError};
use crate::config::ExchangeSettings;
use crate::models::{ExchangePosition, OrderSide};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Smallest order the exchange accepts (BTC)
pub const MIN_LOT: f64 = 0.001;

type BitflyerRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

/// bitFlyer Lightning REST client for one product (e.g. `FX_BTC_JPY`)
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct BitflyerClient {
    client: Client,
    api_url: String,
    product_code: String,
    credentials: Option<Credentials>,
    rate_limiter: Arc<BitflyerRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    ltp: f64,
}

#[derive(Debug, Deserialize)]
struct OpenPosition {
    side: String,
    size: f64,
}

#[derive(Debug, Serialize)]
struct ChildOrder<'a> {
    product_code: &'a str,
    child_order_type: &'a str,
    side: &'a str,
    size: f64,
}

#[derive(Debug, Deserialize)]
struct ChildOrderAccepted {
    child_order_acceptance_id: String,
}

#[derive(Debug, Serialize)]
struct ProductOnly<'a> {
    product_code: &'a str,
}

impl BitflyerClient {
    /// Create a client; private endpoints fail with `Auth` unless both
    /// key and secret are given
    pub fn new(
        settings: &ExchangeSettings,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let rpm = NonZeroU32::new(settings.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        let credentials = match (api_key, api_secret) {
            (Some(api_key), Some(api_secret)) if !api_key.is_empty() && !api_secret.is_empty() => {
                Some(Credentials { api_key, api_secret })
            }
            _ => None,
        };

        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            product_code: settings.product_code.clone(),
            credentials,
            rate_limiter,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// HMAC-SHA256 over `timestamp + method + path + body`, hex encoded
    fn sign(
        secret: &str,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, ExchangeError> {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Auth(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Send a request and return the raw body text
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<String>,
        private: bool,
    ) -> Result<String, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.api_url, endpoint);
        let mut builder = self.client.request(method.clone(), &url);

        if private {
            let credentials = self
                .credentials
                .as_ref()
                .ok_or_else(|| ExchangeError::Auth("BITFLYER_API_KEY / BITFLYER_API_SECRET not set".into()))?;
            let timestamp = chrono::Utc::now().timestamp().to_string();
            let signature = Self::sign(
                &credentials.api_secret,
                &timestamp,
                method.as_str(),
                endpoint,
                body.as_deref().unwrap_or(""),
            )?;
            builder = builder
                .header("ACCESS-KEY", &credentials.api_key)
                .header("ACCESS-TIMESTAMP", timestamp)
                .header("ACCESS-SIGN", signature);
        }

        if let Some(body) = body {
            builder = builder.header("Content-Type", "application/json").body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        tracing::debug!(endpoint, status = status.as_u16(), "bitFlyer response");
        Ok(text)
    }

    fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ExchangeError> {
        serde_json::from_str(text).map_err(|e| ExchangeError::Decode(format!("{}: {}", e, text)))
    }
}

/// Truncate to whole lots (3 decimals), toward zero
pub fn truncate_lot(size: f64) -> f64 {
    ((size.abs() * 1000.0) + 1e-9).trunc() / 1000.0 * size.signum()
}

#[async_trait]
impl Exchange for BitflyerClient {
    async fn get_price(&self) -> Result<f64, ExchangeError> {
        let endpoint = format!("/v1/ticker?product_code={}", self.product_code);
        let text = self.request(Method::GET, &endpoint, None, false).await?;
        let ticker: Ticker = Self::decode(&text)?;
        Ok(ticker.ltp)
    }

    async fn get_position(&self) -> Result<ExchangePosition, ExchangeError> {
        let endpoint = format!("/v1/me/getpositions?product_code={}", self.product_code);
        let text = self.request(Method::GET, &endpoint, None, true).await?;
        let positions: Vec<OpenPosition> = Self::decode(&text)?;

        let net: f64 = positions
            .iter()
            .map(|p| if p.side == "BUY" { p.size } else { -p.size })
            .sum();

        Ok(ExchangePosition::from_signed(truncate_lot(net)))
    }

    async fn cancel_all(&self) -> Result<(), ExchangeError> {
        let body = serde_json::to_string(&ProductOnly {
            product_code: &self.product_code,
        })
        .map_err(|e| ExchangeError::Decode(e.to_string()))?;

        self.request(Method::POST, "/v1/me/cancelallchildorders", Some(body), true)
            .await?;
        Ok(())
    }

    async fn make_order(&self, side: OrderSide, size: f64) -> Result<Option<String>, ExchangeError> {
        let size = truncate_lot(size.abs());
        if size < MIN_LOT {
            tracing::debug!(size, "Order below minimum lot, skipped");
            return Ok(None);
        }

        let body = serde_json::to_string(&ChildOrder {
            product_code: &self.product_code,
            child_order_type: "MARKET",
            side: side.as_str(),
            size,
        })
        .map_err(|e| ExchangeError::Decode(e.to_string()))?;

        let text = self
            .request(Method::POST, "/v1/me/sendchildorder", Some(body), true)
            .await?;
        let accepted: ChildOrderAccepted = Self::decode(&text)?;

        tracing::info!(
            side = %side,
            size,
            id = %accepted.child_order_acceptance_id,
            "📤 Order accepted"
        );
        Ok(Some(accepted.child_order_acceptance_id))
    }

    fn name(&self) -> &str {
        "bitflyer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn settings(url: &str) -> ExchangeSettings {
        ExchangeSettings {
            api_url: url.to_string(),
            ..Default::default()
        }
    }

    fn client(url: &str) -> BitflyerClient {
        BitflyerClient::new(&settings(url), Some("key".into()), Some("secret".into())).unwrap()
    }

    #[test]
    fn test_truncate_lot() {
        assert_eq!(truncate_lot(0.0019), 0.001);
        assert_eq!(truncate_lot(0.003), 0.003);
        assert_eq!(truncate_lot(-0.0047), -0.004);
        assert_eq!(truncate_lot(0.0009), 0.0);
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let a = BitflyerClient::sign("secret", "1700000000", "GET", "/v1/me/getpositions?product_code=FX_BTC_JPY", "").unwrap();
        let b = BitflyerClient::sign("secret", "1700000000", "GET", "/v1/me/getpositions?product_code=FX_BTC_JPY", "").unwrap();
        let c = BitflyerClient::sign("secret", "1700000001", "GET", "/v1/me/getpositions?product_code=FX_BTC_JPY", "").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_get_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/ticker")
            .match_query(Matcher::UrlEncoded("product_code".into(), "FX_BTC_JPY".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"product_code":"FX_BTC_JPY","ltp":9876543.0}"#)
            .create_async()
            .await;

        let price = client(&server.url()).get_price().await.unwrap();
        assert_eq!(price, 9_876_543.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_position_nets_and_truncates() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/me/getpositions")
            .match_query(Matcher::UrlEncoded("product_code".into(), "FX_BTC_JPY".into()))
            .match_header("ACCESS-KEY", "key")
            .match_header("ACCESS-SIGN", Matcher::Regex("^[0-9a-f]{64}$".into()))
            .with_status(200)
            .with_body(r#"[{"side":"BUY","size":0.0057},{"side":"SELL","size":0.001},{"side":"BUY","size":0.001}]"#)
            .create_async()
            .await;

        let position = client(&server.url()).get_position().await.unwrap();
        assert_eq!(position.side, crate::models::Side::Long);
        assert_eq!(position.size, 0.005);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_make_order_posts_market_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/me/sendchildorder")
            .match_body(Matcher::PartialJsonString(
                r#"{"product_code":"FX_BTC_JPY","child_order_type":"MARKET","side":"SELL","size":0.002}"#.into(),
            ))
            .with_status(200)
            .with_body(r#"{"child_order_acceptance_id":"JRF20240101-000000-000001"}"#)
            .create_async()
            .await;

        let id = client(&server.url())
            .make_order(OrderSide::Sell, 0.0025)
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("JRF20240101-000000-000001"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_make_order_below_min_lot_is_skipped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/me/sendchildorder")
            .expect(0)
            .create_async()
            .await;

        let id = client(&server.url())
            .make_order(OrderSide::Buy, 0.0004)
            .await
            .unwrap();
        assert!(id.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_all_accepts_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/me/cancelallchildorders")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        client(&server.url()).cancel_all().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/ticker")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client(&server.url()).get_price().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_private_endpoint_without_credentials() {
        let exchange = BitflyerClient::new(&settings("http://127.0.0.1:9"), None, None).unwrap();
        assert!(!exchange.has_credentials());
        let err = exchange.cancel_all().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)));
    }

    #[tokio::test]
    #[ignore] // Hits the live exchange
    async fn test_live_ticker() {
        let exchange = BitflyerClient::new(&ExchangeSettings::default(), None, None).unwrap();
        let price = exchange.get_price().await.unwrap();
        assert!(price > 0.0);
    }
}

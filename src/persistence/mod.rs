use crate::backfill::HistoricalSource;
use crate::models::PriceObservation;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};

/// Stored form of one price observation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPrice {
    price: f64,
    timestamp: DateTime<Utc>,
}

/// Redis price store
///
/// Uses sorted sets keyed `prices:{instrument}` with the unix timestamp as
/// score. The control loop records every live price here so a restarted
/// process can backfill its history.
#[derive(Clone)]
pub struct RedisPriceStore {
    conn: ConnectionManager,
}

fn key(instrument: &str) -> String {
    format!("prices:{}", instrument)
}

impl RedisPriceStore {
    /// Connect to Redis, giving up after 5 seconds
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    pub async fn save_observation(&self, instrument: &str, observation: &PriceObservation) -> Result<()> {
        let value = serde_json::to_string(&StoredPrice {
            price: observation.price,
            timestamp: observation.timestamp,
        })?;
        let score = observation.timestamp.timestamp() as f64;

        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key(instrument), value, score).await?;
        Ok(())
    }

    /// Observations newer than `since`, oldest first
    pub async fn load_since(&self, instrument: &str, since: DateTime<Utc>) -> Result<Vec<PriceObservation>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore(key(instrument), since.timestamp() as f64, "+inf")
            .await?;

        decode_members(&members)
    }

    /// Remove observations older than `keep_hours`
    pub async fn cleanup_old(&self, instrument: &str, keep_hours: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours as i64);

        let mut conn = self.conn.clone();
        let removed: usize = conn
            .zrembyscore(key(instrument), "-inf", cutoff.timestamp() as f64)
            .await?;

        if removed > 0 {
            tracing::debug!("Cleaned up {} old prices for {}", removed, instrument);
        }

        Ok(removed)
    }

    pub async fn count(&self, instrument: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(key(instrument)).await?;
        Ok(count)
    }
}

/// Parse stored members into a strictly ordered series
///
/// Members sharing a timestamp keep the first one seen.
fn decode_members(members: &[String]) -> Result<Vec<PriceObservation>> {
    let mut observations = members
        .iter()
        .map(|json| -> Result<PriceObservation> {
            let stored: StoredPrice = serde_json::from_str(json)?;
            Ok(PriceObservation::new(stored.timestamp, stored.price))
        })
        .collect::<Result<Vec<_>>>()?;

    observations.sort_by_key(|o| o.timestamp);
    observations.dedup_by_key(|o| o.timestamp);
    Ok(observations)
}

#[async_trait]
impl HistoricalSource for RedisPriceStore {
    async fn fetch_recent(&self, instrument: &str, minutes: u32) -> Result<Vec<PriceObservation>> {
        let since = Utc::now() - chrono::Duration::minutes(minutes as i64);
        let observations = self.load_since(instrument, since).await?;

        tracing::info!(
            "Loaded {} historical prices for {} from Redis",
            observations.len(),
            instrument
        );

        Ok(observations)
    }
}

/// Destination for live prices recorded by the control loop
#[async_trait]
pub trait PriceSink: Send + Sync {
    async fn record(&self, instrument: &str, observation: &PriceObservation) -> Result<()>;

    /// Drop entries older than `keep_hours`; returns how many were removed
    async fn prune(&self, instrument: &str, keep_hours: u64) -> Result<usize>;
}

#[async_trait]
impl PriceSink for RedisPriceStore {
    async fn record(&self, instrument: &str, observation: &PriceObservation) -> Result<()> {
        self.save_observation(instrument, observation).await
    }

    async fn prune(&self, instrument: &str, keep_hours: u64) -> Result<usize> {
        self.cleanup_old(instrument, keep_hours).await
    }
}

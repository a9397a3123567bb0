use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_PROBABILITY, HTTP_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::{clamp_probability, Event, EventSource, EventStatus, MarketType, RawEvent};

/// Capability interface over the upstream market service.
#[async_trait]
pub trait UpstreamMarketClient: Send + Sync {
    async fn get_events(&self, from_timestamp: i64, offset: usize, limit: usize) -> Result<Vec<RawEvent>>;

    /// Best-effort republish of `event_id -> probability`.
    async fn post_predictions(&self, predictions: &HashMap<String, f64>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct HttpMarketClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl UpstreamMarketClient for HttpMarketClient {
    async fn get_events(&self, from_timestamp: i64, offset: usize, limit: usize) -> Result<Vec<RawEvent>> {
        let url = format!(
            "{}/api/v2/events?from_date={}&offset={}&limit={}",
            self.base_url, from_timestamp, offset, limit
        );

        let resp: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let items = extract_items(resp)?;
        Ok(items.into_iter().map(RawEvent::Json).collect())
    }

    async fn post_predictions(&self, predictions: &HashMap<String, f64>) -> Result<()> {
        let body: serde_json::Map<String, Value> = predictions
            .iter()
            .map(|(id, p)| (id.clone(), serde_json::json!({ "probability": p })))
            .collect();

        self.client
            .post(format!("{}/api/v1/predictions", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Accepts either a bare array or `{"items": [...]}`.
pub fn extract_items(resp: Value) -> Result<Vec<Value>> {
    match resp {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(AppError::UpstreamUnavailable(
                "events response object has no items array".to_string(),
            )),
        },
        _ => Err(AppError::UpstreamUnavailable(
            "events response was neither an array nor an object".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// UpstreamEventSource
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FetchStats {
    pub api_total: usize,
    pub pages: usize,
    pub rejected_malformed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOrigin {
    Live,
    /// Upstream answered but had nothing usable.
    EmptyFallback,
    /// Upstream could not be reached or answered garbage.
    UnavailableFallback(String),
}

#[derive(Debug)]
pub struct FetchedBatch {
    pub events: Vec<Event>,
    pub origin: BatchOrigin,
    pub stats: FetchStats,
}

pub struct UpstreamEventSource {
    client: Arc<dyn UpstreamMarketClient>,
    page_size: usize,
    max_pages: usize,
}

impl UpstreamEventSource {
    pub fn new(client: Arc<dyn UpstreamMarketClient>, page_size: usize, max_pages: usize) -> Self {
        Self { client, page_size: page_size.max(1), max_pages: max_pages.max(1) }
    }

    pub fn client(&self) -> &Arc<dyn UpstreamMarketClient> {
        &self.client
    }

    /// Never fails: outages, bad payloads and empty listings all resolve to the
    /// synthetic set.
    pub async fn fetch(&self, from_timestamp: i64) -> FetchedBatch {
        match self.try_fetch(from_timestamp).await {
            Ok((events, stats)) if !events.is_empty() => {
                info!(
                    fetched = events.len(),
                    api_total = stats.api_total,
                    malformed = stats.rejected_malformed,
                    "Fetched {} live events ({} raw, {} malformed)",
                    events.len(), stats.api_total, stats.rejected_malformed,
                );
                FetchedBatch { events, origin: BatchOrigin::Live, stats }
            }
            Ok((_, stats)) => {
                warn!("Upstream returned no usable events, using synthetic fallback");
                FetchedBatch { events: fallback_events(Utc::now()), origin: BatchOrigin::EmptyFallback, stats }
            }
            Err(e) => {
                warn!("Upstream fetch failed, using synthetic fallback: {e}");
                FetchedBatch {
                    events: fallback_events(Utc::now()),
                    origin: BatchOrigin::UnavailableFallback(e.to_string()),
                    stats: FetchStats::default(),
                }
            }
        }
    }

    /// Pages through the upstream listing until a short page or the page cap.
    /// Individual malformed records are skipped and counted.
    pub async fn try_fetch(&self, from_timestamp: i64) -> Result<(Vec<Event>, FetchStats)> {
        let now = Utc::now();
        let mut events = Vec::new();
        let mut stats = FetchStats::default();
        let mut offset = 0usize;

        for _ in 0..self.max_pages {
            let page = self
                .client
                .get_events(from_timestamp, offset, self.page_size)
                .await
                .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
            stats.pages += 1;

            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            stats.api_total += page_len;

            for raw in page {
                match normalize_event(raw, now) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        stats.rejected_malformed += 1;
                        debug!("Skipping malformed event record: {e}");
                    }
                }
            }

            if page_len < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        Ok((events, stats))
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

pub fn normalize_event(raw: RawEvent, now: DateTime<Utc>) -> Result<Event> {
    match raw {
        RawEvent::Typed(mut event) => {
            if event.event_id.is_empty() {
                return Err(AppError::MalformedRecord("typed event has empty event_id".to_string()));
            }
            event.set_probability(event.probability);
            Ok(event)
        }
        RawEvent::Json(v) => parse_event_record(&v, now),
    }
}

/// Parse one JSON event. String values holding JSON objects are decoded first.
pub fn parse_event_record(v: &Value, now: DateTime<Utc>) -> Result<Event> {
    if let Value::String(s) = v {
        let inner: Value = serde_json::from_str(s)
            .map_err(|e| AppError::MalformedRecord(format!("string record is not JSON: {e}")))?;
        if inner.is_string() {
            return Err(AppError::MalformedRecord("doubly encoded record".to_string()));
        }
        return parse_event_record(&inner, now);
    }

    let obj = v
        .as_object()
        .ok_or_else(|| AppError::MalformedRecord("record is not an object".to_string()))?;

    let event_id = obj
        .get("event_id")
        .or_else(|| obj.get("id"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::MalformedRecord("missing event_id".to_string()))?;

    let market_type = match obj.get("market_type").and_then(|m| m.as_str()) {
        None => MarketType::Binary,
        Some(m) if m.eq_ignore_ascii_case("BINARY") => MarketType::Binary,
        Some(m) => {
            return Err(AppError::MalformedRecord(format!(
                "event {event_id}: unsupported market_type {m}"
            )))
        }
    };

    let description = obj
        .get("description")
        .or_else(|| obj.get("title"))
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();

    let cutoff = match obj.get("cutoff") {
        None | Some(Value::Null) => now,
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AppError::MalformedRecord(format!("event {event_id}: bad cutoff {s}: {e}")))?,
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| AppError::MalformedRecord(format!("event {event_id}: bad cutoff {n}")))?,
        Some(other) => {
            return Err(AppError::MalformedRecord(format!("event {event_id}: bad cutoff {other}")))
        }
    };

    let status = match obj.get("status") {
        None | Some(Value::Null) => EventStatus::Unresolved,
        Some(Value::String(s)) => EventStatus::parse(s).ok_or_else(|| {
            AppError::MalformedRecord(format!("event {event_id}: unknown status {s}"))
        })?,
        Some(other) => {
            return Err(AppError::MalformedRecord(format!("event {event_id}: bad status {other}")))
        }
    };

    let probability = match obj.get("probability") {
        None | Some(Value::Null) => DEFAULT_PROBABILITY,
        Some(p) => p
            .as_f64()
            .or_else(|| p.as_str().and_then(|s| s.parse().ok()))
            .filter(|p: &f64| p.is_finite())
            .map(clamp_probability)
            .ok_or_else(|| AppError::MalformedRecord(format!("event {event_id}: bad probability {p}")))?,
    };

    Ok(Event {
        event_id,
        market_type,
        description,
        cutoff,
        status,
        probability,
        base_probability: None,
        source: EventSource::Live,
    })
}

// ---------------------------------------------------------------------------
// Synthetic fallback
// ---------------------------------------------------------------------------

/// The synthetic set, normalized like any typed upstream record.
fn fallback_events(now: DateTime<Utc>) -> Vec<Event> {
    synthetic_events(now)
        .into_iter()
        .filter_map(|event| normalize_event(RawEvent::Typed(event), now).ok())
        .collect()
}

/// The five stand-in events served while upstream is unavailable.
/// Identifiers are stable across calls; cutoffs are relative to `now`.
pub fn synthetic_events(now: DateTime<Utc>) -> Vec<Event> {
    let entries: [(&str, f64, i64, &str); 5] = [
        (
            "btc_100k_2024",
            0.65,
            365,
            "Bitcoin price prediction: Will Bitcoin reach $100,000 by the end of 2024? \
             Bitcoin has shown strong performance in 2024 with ETF approvals and the halving approaching",
        ),
        (
            "eth_merge_success",
            0.75,
            180,
            "Ethereum upgrade impact: Will Ethereum's Dencun upgrade reduce gas fees by more than 50%? \
             Dencun introduces proto-danksharding and aims to cut L2 transaction costs",
        ),
        (
            "ai_agent_2024",
            0.45,
            365,
            "AI development capability: Will an AI agent autonomously complete a full software \
             development task by end of 2024?",
        ),
        (
            "defi_hack_2024",
            0.35,
            365,
            "DeFi security: Will total DeFi hacks in 2024 be less than $500M?",
        ),
        (
            "nft_revival",
            0.55,
            90,
            "NFT market growth: Will NFT trading volume in Q2 2024 exceed Q1 2024 by more than 50%?",
        ),
    ];

    entries
        .into_iter()
        .map(|(id, probability, days, description)| Event {
            event_id: id.to_string(),
            market_type: MarketType::Binary,
            description: description.to_string(),
            cutoff: now + chrono::Duration::days(days),
            status: EventStatus::Unresolved,
            probability,
            base_probability: None,
            source: EventSource::Synthetic,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves pre-canned pages; `None` simulates a transport failure.
    struct PagedClient {
        pages: Mutex<Vec<Option<Vec<RawEvent>>>>,
    }

    #[async_trait]
    impl UpstreamMarketClient for PagedClient {
        async fn get_events(&self, _from: i64, _offset: usize, _limit: usize) -> Result<Vec<RawEvent>> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(Vec::new());
            }
            pages
                .remove(0)
                .ok_or_else(|| AppError::UpstreamUnavailable("connection refused".into()))
        }

        async fn post_predictions(&self, _p: &HashMap<String, f64>) -> Result<()> {
            Ok(())
        }
    }

    fn source(pages: Vec<Option<Vec<RawEvent>>>, page_size: usize) -> UpstreamEventSource {
        UpstreamEventSource::new(Arc::new(PagedClient { pages: Mutex::new(pages) }), page_size, 10)
    }

    #[test]
    fn missing_fields_take_defaults() {
        let now = Utc::now();
        let e = parse_event_record(&json!({"event_id": "a", "description": "d"}), now).unwrap();
        assert_eq!(e.market_type, MarketType::Binary);
        assert_eq!(e.status, EventStatus::Unresolved);
        assert!((e.probability - 0.5).abs() < 1e-12);
        assert_eq!(e.cutoff, now);
        assert_eq!(e.source, EventSource::Live);
    }

    #[test]
    fn accepts_id_alias_and_unix_cutoff() {
        let e = parse_event_record(
            &json!({"id": 42, "title": "t", "cutoff": 1_700_000_000, "status": "resolved"}),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(e.event_id, "42");
        assert_eq!(e.description, "t");
        assert_eq!(e.cutoff.timestamp(), 1_700_000_000);
        assert_eq!(e.status, EventStatus::Resolved);
    }

    #[test]
    fn string_encoded_record_is_decoded() {
        let raw = Value::String(r#"{"event_id":"s1","probability":0.8}"#.to_string());
        let e = parse_event_record(&raw, Utc::now()).unwrap();
        assert_eq!(e.event_id, "s1");
        assert!((e.probability - 0.8).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_binary_and_bad_probability() {
        let now = Utc::now();
        assert!(parse_event_record(&json!({"event_id": "a", "market_type": "MULTI"}), now).is_err());
        assert!(parse_event_record(&json!({"event_id": "a", "probability": "high"}), now).is_err());
        assert!(parse_event_record(&json!({"description": "no id"}), now).is_err());
        assert!(parse_event_record(&json!(["not", "an", "object"]), now).is_err());
    }

    #[test]
    fn out_of_range_probability_is_clamped() {
        let e = parse_event_record(&json!({"event_id": "a", "probability": 1.4}), Utc::now()).unwrap();
        assert_eq!(e.probability, 1.0);
    }

    #[test]
    fn both_response_shapes_are_accepted() {
        assert_eq!(extract_items(json!([{"id": 1}, {"id": 2}])).unwrap().len(), 2);
        assert_eq!(extract_items(json!({"items": [{"id": 1}]})).unwrap().len(), 1);
        assert!(extract_items(json!({"data": []})).is_err());
        assert!(extract_items(json!("nope")).is_err());
    }

    #[test]
    fn synthetic_set_is_stable() {
        let a = synthetic_events(Utc::now());
        let b = synthetic_events(Utc::now());
        assert_eq!(a.len(), 5);
        let ids_a: Vec<_> = a.iter().map(|e| e.event_id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|e| e.event_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        assert!(a.iter().all(|e| e.source == EventSource::Synthetic));
    }

    #[tokio::test]
    async fn fetch_failure_returns_synthetic_set() {
        let src = source(vec![None], 10);
        let batch = src.fetch(0).await;
        assert_eq!(batch.events.len(), 5);
        assert!(matches!(batch.origin, BatchOrigin::UnavailableFallback(_)));
    }

    #[tokio::test]
    async fn empty_listing_returns_synthetic_set() {
        let src = source(vec![Some(Vec::new())], 10);
        let batch = src.fetch(0).await;
        assert_eq!(batch.events.len(), 5);
        assert_eq!(batch.origin, BatchOrigin::EmptyFallback);
    }

    #[tokio::test]
    async fn pages_until_short_page_and_skips_malformed() {
        let page1 = vec![
            RawEvent::Json(json!({"event_id": "a"})),
            RawEvent::Json(json!({"market_type": "BINARY"})),
        ];
        let page2 = vec![RawEvent::Json(json!({"event_id": "b"}))];
        let src = source(vec![Some(page1), Some(page2)], 2);

        let batch = src.fetch(0).await;
        assert_eq!(batch.origin, BatchOrigin::Live);
        let ids: Vec<_> = batch.events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(batch.stats.pages, 2);
        assert_eq!(batch.stats.rejected_malformed, 1);
    }

    #[tokio::test]
    async fn typed_records_are_validated_and_clamped() {
        let mut good = synthetic_events(Utc::now()).remove(0);
        good.source = EventSource::Live;
        good.probability = 1.7;
        let mut nameless = good.clone();
        nameless.event_id.clear();

        let src = source(vec![Some(vec![RawEvent::Typed(good), RawEvent::Typed(nameless)])], 10);
        let (events, stats) = src.try_fetch(0).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "btc_100k_2024");
        assert_eq!(events[0].probability, 1.0);
        assert_eq!(stats.rejected_malformed, 1);
    }
}

//! Cache Policy Module
//!
//! TTL enumeration, priority classes, and the content classifier that decides
//! how long a response lives and whether it may be cached at all.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::Params;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

// == TTL Policy ==
/// Caller-selectable expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// 5 minutes
    VeryShort,
    /// 15 minutes
    Short,
    /// 30 minutes
    Medium,
    /// 3 hours
    Long,
    /// 12 hours
    VeryLong,
    /// Never expires
    Never,
    /// Explicit duration
    Custom(Duration),
}

impl TtlPolicy {
    /// Lifetime of an entry, `None` meaning it never expires.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            TtlPolicy::VeryShort => Some(Duration::from_secs(5 * MINUTE)),
            TtlPolicy::Short => Some(Duration::from_secs(15 * MINUTE)),
            TtlPolicy::Medium => Some(Duration::from_secs(30 * MINUTE)),
            TtlPolicy::Long => Some(Duration::from_secs(3 * HOUR)),
            TtlPolicy::VeryLong => Some(Duration::from_secs(12 * HOUR)),
            TtlPolicy::Never => None,
            TtlPolicy::Custom(d) => Some(*d),
        }
    }
}

impl FromStr for TtlPolicy {
    type Err = String;

    /// Accepts `very_short`, `short`, `medium`, `long`, `very_long`, `never`
    /// or `custom:<seconds>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "very_short" | "veryshort" => Ok(TtlPolicy::VeryShort),
            "short" => Ok(TtlPolicy::Short),
            "medium" => Ok(TtlPolicy::Medium),
            "long" => Ok(TtlPolicy::Long),
            "very_long" | "verylong" => Ok(TtlPolicy::VeryLong),
            "never" => Ok(TtlPolicy::Never),
            other => other
                .strip_prefix("custom:")
                .and_then(|secs| secs.parse::<u64>().ok())
                .map(|secs| TtlPolicy::Custom(Duration::from_secs(secs)))
                .ok_or_else(|| format!("Unknown TTL policy '{}'", s)),
        }
    }
}

// == Priority Class ==
/// Eviction priority of cached content. Variants are declared lowest first,
/// so the derived ordering is `Empty < Old < Recent < Upcoming < Today < Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Empty,
    Old,
    Recent,
    Upcoming,
    Today,
    Live,
}

impl PriorityClass {
    /// Default lifetime for content of this class.
    pub fn default_ttl(&self) -> Duration {
        match self {
            PriorityClass::Live => Duration::from_secs(60),
            PriorityClass::Today => Duration::from_secs(5 * MINUTE),
            PriorityClass::Upcoming => Duration::from_secs(30 * MINUTE),
            PriorityClass::Recent => Duration::from_secs(HOUR),
            PriorityClass::Old => Duration::from_secs(6 * HOUR),
            PriorityClass::Empty => Duration::from_secs(5 * MINUTE),
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriorityClass::Empty => "empty",
            PriorityClass::Old => "old",
            PriorityClass::Recent => "recent",
            PriorityClass::Upcoming => "upcoming",
            PriorityClass::Today => "today",
            PriorityClass::Live => "live",
        };
        f.write_str(name)
    }
}

// == Classification ==
/// Result of inspecting a normalized response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub priority: PriorityClass,
    pub is_empty: bool,
    pub has_live_content: bool,
    /// Empty result that may be upstream propagation delay; never cached.
    pub transient_empty: bool,
}

impl Classification {
    /// TTL to store with, honoring an explicit caller policy first.
    pub fn effective_ttl(&self, requested: Option<TtlPolicy>) -> Option<Duration> {
        match requested {
            Some(policy) => policy.duration(),
            None => Some(self.priority.default_ttl()),
        }
    }

    /// Whether the response may be written to either cache tier.
    pub fn is_cacheable(&self) -> bool {
        !self.transient_empty
    }
}

// == Classifier Traits ==
/// Decides priority and cacheability of a response.
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, endpoint: &str, params: &Params, items: &[Value]) -> Classification;
}

/// Predicate marking a zero-item response as transient.
///
/// Only consulted when the response is empty.
pub trait TransientEmptyRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, endpoint: &str, params: &Params) -> bool;
}

/// Live-event queries: an empty live list often means the feed lags.
#[derive(Debug, Default)]
pub struct LiveQueryRule;

impl TransientEmptyRule for LiveQueryRule {
    fn name(&self) -> &'static str {
        "live_query"
    }

    fn matches(&self, _endpoint: &str, params: &Params) -> bool {
        params.contains_key("live")
    }
}

/// Narrow `date` + `league` + extra filter queries.
#[derive(Debug, Default)]
pub struct NarrowDateLeagueRule;

impl TransientEmptyRule for NarrowDateLeagueRule {
    fn name(&self) -> &'static str {
        "narrow_date_league"
    }

    fn matches(&self, _endpoint: &str, params: &Params) -> bool {
        params.contains_key("date")
            && params.contains_key("league")
            && params
                .keys()
                .any(|k| k != "date" && k != "league" && k != "timezone")
    }
}

// == Cache Policy ==
/// Default classifier for the sports data envelope.
pub struct CachePolicy {
    rules: Vec<Box<dyn TransientEmptyRule>>,
    recent_window_days: i64,
}

/// Fixture status codes meaning the match is in play.
const LIVE_STATUSES: &[&str] = &["1H", "HT", "2H", "ET", "BT", "P", "SUSP", "INT", "LIVE"];

impl CachePolicy {
    /// Policy with no transient-empty rules.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            recent_window_days: 7,
        }
    }

    /// Adds a transient-empty rule.
    pub fn with_rule(mut self, rule: impl TransientEmptyRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Names of the installed rules.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Classifies against an explicit clock.
    pub fn classify_at(
        &self,
        endpoint: &str,
        params: &Params,
        items: &[Value],
        now: DateTime<Utc>,
    ) -> Classification {
        if items.is_empty() {
            let transient_empty = self.rules.iter().any(|r| r.matches(endpoint, params));
            return Classification {
                priority: PriorityClass::Empty,
                is_empty: true,
                has_live_content: false,
                transient_empty,
            };
        }

        let has_live_content = items.iter().any(is_live_item);
        let priority = if has_live_content {
            PriorityClass::Live
        } else {
            date_priority(items, now.date_naive(), self.recent_window_days)
        };

        Classification {
            priority,
            is_empty: false,
            has_live_content,
            transient_empty: false,
        }
    }
}

impl Default for CachePolicy {
    /// Policy with the live-query and narrow-query rules installed.
    fn default() -> Self {
        Self::new()
            .with_rule(LiveQueryRule)
            .with_rule(NarrowDateLeagueRule)
    }
}

impl ContentClassifier for CachePolicy {
    fn classify(&self, endpoint: &str, params: &Params, items: &[Value]) -> Classification {
        self.classify_at(endpoint, params, items, Utc::now())
    }
}

// == Item Inspection ==
fn is_live_item(item: &Value) -> bool {
    ["/fixture/status/short", "/status/short"]
        .iter()
        .filter_map(|p| item.pointer(p).and_then(Value::as_str))
        .any(|status| LIVE_STATUSES.contains(&status))
}

fn item_date(item: &Value) -> Option<NaiveDate> {
    let raw = ["/fixture/date", "/date"]
        .iter()
        .find_map(|p| item.pointer(p).and_then(Value::as_str))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok())
}

/// Highest priority among dated items; undated reference data is `Old`.
fn date_priority(items: &[Value], today: NaiveDate, recent_days: i64) -> PriorityClass {
    items
        .iter()
        .filter_map(item_date)
        .map(|date| {
            let delta = (date - today).num_days();
            if delta == 0 {
                PriorityClass::Today
            } else if delta > 0 {
                PriorityClass::Upcoming
            } else if -delta <= recent_days {
                PriorityClass::Recent
            } else {
                PriorityClass::Old
            }
        })
        .max()
        .unwrap_or(PriorityClass::Old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 5, 12, 0, 0).unwrap()
    }

    fn fixture(date: &str, status: &str) -> Value {
        json!({"fixture": {"id": 1, "date": date, "status": {"short": status}}})
    }

    #[test]
    fn test_priority_total_order() {
        assert!(PriorityClass::Live > PriorityClass::Today);
        assert!(PriorityClass::Today > PriorityClass::Upcoming);
        assert!(PriorityClass::Upcoming > PriorityClass::Recent);
        assert!(PriorityClass::Recent > PriorityClass::Old);
        assert!(PriorityClass::Old > PriorityClass::Empty);
    }

    #[test]
    fn test_priority_default_ttls() {
        assert_eq!(PriorityClass::Live.default_ttl(), Duration::from_secs(60));
        assert_eq!(PriorityClass::Old.default_ttl(), Duration::from_secs(6 * 3600));
        assert_eq!(PriorityClass::Empty.default_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_ttl_policy_parse() {
        assert_eq!("short".parse::<TtlPolicy>().unwrap(), TtlPolicy::Short);
        assert_eq!("NEVER".parse::<TtlPolicy>().unwrap(), TtlPolicy::Never);
        assert_eq!(
            "custom:90".parse::<TtlPolicy>().unwrap(),
            TtlPolicy::Custom(Duration::from_secs(90))
        );
        assert!("forever".parse::<TtlPolicy>().is_err());
        assert_eq!(TtlPolicy::Never.duration(), None);
    }

    #[test]
    fn test_live_status_wins() {
        let policy = CachePolicy::default();
        let items = vec![
            fixture("2025-01-05T15:00:00+00:00", "NS"),
            fixture("2025-01-05T11:00:00+00:00", "2H"),
        ];
        let c = policy.classify_at("fixtures", &params(&[]), &items, now());
        assert_eq!(c.priority, PriorityClass::Live);
        assert!(c.has_live_content);
    }

    #[test]
    fn test_date_classes() {
        let policy = CachePolicy::default();
        let p = params(&[]);
        let classify = |date: &str| {
            policy
                .classify_at("fixtures", &p, &[fixture(date, "FT")], now())
                .priority
        };
        assert_eq!(classify("2025-01-05T20:00:00+00:00"), PriorityClass::Today);
        assert_eq!(classify("2025-01-09T20:00:00+00:00"), PriorityClass::Upcoming);
        assert_eq!(classify("2025-01-01T20:00:00+00:00"), PriorityClass::Recent);
        assert_eq!(classify("2024-11-01T20:00:00+00:00"), PriorityClass::Old);
    }

    #[test]
    fn test_undated_items_are_old() {
        let policy = CachePolicy::default();
        let items = vec![json!({"league": {"id": 39, "name": "Premier League"}})];
        let c = policy.classify_at("leagues", &params(&[]), &items, now());
        assert_eq!(c.priority, PriorityClass::Old);
    }

    #[test]
    fn test_empty_live_query_is_transient() {
        let policy = CachePolicy::default();
        let c = policy.classify_at("fixtures", &params(&[("live", "all")]), &[], now());
        assert!(c.is_empty);
        assert!(c.transient_empty);
        assert!(!c.is_cacheable());
    }

    #[test]
    fn test_narrow_query_is_transient() {
        let policy = CachePolicy::default();
        let narrow = params(&[("date", "2025-01-05"), ("league", "39"), ("status", "NS")]);
        let broad = params(&[("date", "2025-01-05"), ("league", "39")]);

        assert!(policy.classify_at("fixtures", &narrow, &[], now()).transient_empty);
        assert!(!policy.classify_at("fixtures", &broad, &[], now()).transient_empty);
    }

    #[test]
    fn test_plain_empty_is_cacheable() {
        let policy = CachePolicy::default();
        let c = policy.classify_at("fixtures", &params(&[("date", "2025-01-05")]), &[], now());
        assert_eq!(c.priority, PriorityClass::Empty);
        assert!(c.is_cacheable());
    }

    #[test]
    fn test_policy_without_rules_caches_everything() {
        let policy = CachePolicy::new();
        let c = policy.classify_at("fixtures", &params(&[("live", "all")]), &[], now());
        assert!(!c.transient_empty);
        assert!(policy.rule_names().is_empty());
    }

    #[test]
    fn test_effective_ttl() {
        let c = Classification {
            priority: PriorityClass::Live,
            is_empty: false,
            has_live_content: true,
            transient_empty: false,
        };
        assert_eq!(c.effective_ttl(None), Some(Duration::from_secs(60)));
        assert_eq!(
            c.effective_ttl(Some(TtlPolicy::Long)),
            Some(Duration::from_secs(3 * 3600))
        );
    }
}

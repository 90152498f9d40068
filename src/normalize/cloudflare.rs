use super::{NormalizedEvent, Normalizer, RawRecord};
use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};

pub const RECORD_TYPE: &str = "cloudflare";

const NANOS_PER_MILLI: i64 = 1_000_000;

/// What happens to one provider field on its way into the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Copy when present and not null
    Keep,
    /// Copy unless empty, zero, false or null
    KeepNonZero,
    /// Nanosecond integer converted to milliseconds
    NanosToMillis,
}

impl FieldRule {
    fn apply(self, value: &Value) -> Option<Value> {
        match self {
            Self::Keep => (!value.is_null()).then(|| value.clone()),
            Self::KeepNonZero => (!is_zero(value)).then(|| value.clone()),
            Self::NanosToMillis => as_nanos(value).map(|n| Value::from(n / NANOS_PER_MILLI)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub path: &'static [&'static str],
    pub rule: FieldRule,
}

const fn keep(path: &'static [&'static str]) -> FieldMapping {
    FieldMapping {
        path,
        rule: FieldRule::Keep,
    }
}

const fn non_zero(path: &'static [&'static str]) -> FieldMapping {
    FieldMapping {
        path,
        rule: FieldRule::KeepNonZero,
    }
}

const fn millis(path: &'static [&'static str]) -> FieldMapping {
    FieldMapping {
        path,
        rule: FieldRule::NanosToMillis,
    }
}

/// Fields of the zone request log that make it into events
pub static REQUEST_LOG_FIELDS: &[FieldMapping] = &[
    millis(&["timestamp"]),
    keep(&["brandId"]),
    keep(&["flags"]),
    keep(&["hosterId"]),
    keep(&["ownerId"]),
    keep(&["rayId"]),
    keep(&["securityLevel"]),
    keep(&["unstable"]),
    keep(&["zoneId"]),
    keep(&["zoneName"]),
    keep(&["zonePlan"]),
    // cache
    keep(&["cache", "bckType"]),
    non_zero(&["cache", "cacheExternalIp"]),
    keep(&["cache", "cacheExternalPort"]),
    keep(&["cache", "externalPort"]),
    non_zero(&["cache", "cacheInternalIp"]),
    keep(&["cache", "cacheServerName"]),
    keep(&["cache", "cacheStatus"]),
    keep(&["cache", "cacheFileKey"]),
    millis(&["cache", "startTimestamp"]),
    millis(&["cache", "endTimestamp"]),
    // cacheRequest
    non_zero(&["cacheRequest", "headers"]),
    keep(&["cacheRequest", "keepaliveStatus"]),
    // cacheResponse
    keep(&["cacheResponse", "bodyBytes"]),
    keep(&["cacheResponse", "bytes"]),
    non_zero(&["cacheResponse", "contentType"]),
    keep(&["cacheResponse", "retriedStatus"]),
    keep(&["cacheResponse", "status"]),
    // client
    keep(&["client", "asNum"]),
    keep(&["client", "country"]),
    keep(&["client", "deviceType"]),
    non_zero(&["client", "ip"]),
    keep(&["client", "ipClass"]),
    keep(&["client", "srcPort"]),
    keep(&["client", "sslCipher"]),
    keep(&["client", "sslFlags"]),
    keep(&["client", "sslProtocol"]),
    // clientRequest
    keep(&["clientRequest", "accept"]),
    keep(&["clientRequest", "bodyBytes"]),
    keep(&["clientRequest", "bytes"]),
    keep(&["clientRequest", "cookies"]),
    keep(&["clientRequest", "flags"]),
    non_zero(&["clientRequest", "headers"]),
    keep(&["clientRequest", "httpHost"]),
    keep(&["clientRequest", "httpMethod"]),
    keep(&["clientRequest", "httpProtocol"]),
    keep(&["clientRequest", "uri"]),
    keep(&["clientRequest", "referer"]),
    keep(&["clientRequest", "userAgent"]),
    // edge
    keep(&["edge", "bbResult"]),
    keep(&["edge", "cacheResponseTime"]),
    keep(&["edge", "colo"]),
    keep(&["edge", "color"]),
    keep(&["edge", "enabledFlags"]),
    keep(&["edge", "flServerIp"]),
    keep(&["edge", "flServerName"]),
    keep(&["edge", "flServerPort"]),
    keep(&["edge", "pathingOp"]),
    keep(&["edge", "pathingSrc"]),
    keep(&["edge", "pathingStatus"]),
    keep(&["edge", "rateLimitRuleId"]),
    millis(&["edge", "startTimestamp"]),
    millis(&["edge", "endTimestamp"]),
    keep(&["edge", "usedFlags"]),
    // edge.waf
    millis(&["edge", "waf", "startTimestamp"]),
    millis(&["edge", "waf", "endTimestamp"]),
    millis(&["edge", "waf", "timestampStart"]),
    millis(&["edge", "waf", "timestampEnd"]),
    keep(&["edge", "waf", "profile"]),
    keep(&["edge", "waf", "ruleId"]),
    keep(&["edge", "waf", "ruleMessage"]),
    keep(&["edge", "waf", "action"]),
    non_zero(&["edge", "waf", "ruleDetail"]),
    keep(&["edge", "waf", "matchedVar"]),
    non_zero(&["edge", "waf", "activatedRules"]),
    keep(&["edge", "waf", "ruleGroup"]),
    keep(&["edge", "waf", "exitCode"]),
    keep(&["edge", "waf", "xssScore"]),
    keep(&["edge", "waf", "sqlInjectionScore"]),
    keep(&["edge", "waf", "anomalyScore"]),
    keep(&["edge", "waf", "tags"]),
    keep(&["edge", "waf", "flags"]),
    // edgeRequest
    keep(&["edgeRequest", "bodyBytes"]),
    keep(&["edgeRequest", "bytes"]),
    non_zero(&["edgeRequest", "headers"]),
    keep(&["edgeRequest", "httpHost"]),
    keep(&["edgeRequest", "httpMethod"]),
    keep(&["edgeRequest", "keepaliveStatus"]),
    keep(&["edgeRequest", "uri"]),
    // edgeResponse
    keep(&["edgeResponse", "bodyBytes"]),
    keep(&["edgeResponse", "bytes"]),
    keep(&["edgeResponse", "compressionRatio"]),
    keep(&["edgeResponse", "contentType"]),
    non_zero(&["edgeResponse", "headers"]),
    keep(&["edgeResponse", "setCookies"]),
    keep(&["edgeResponse", "status"]),
    // origin
    keep(&["origin", "asNum"]),
    non_zero(&["origin", "ip"]),
    keep(&["origin", "port"]),
    keep(&["origin", "responseTime"]),
    keep(&["origin", "sslCipher"]),
    keep(&["origin", "sslProtocol"]),
    keep(&["origin", "cfRailgun"]),
    keep(&["origin", "railgunWanError"]),
    // originResponse
    keep(&["originResponse", "bodyBytes"]),
    keep(&["originResponse", "bytes"]),
    keep(&["originResponse", "flags"]),
    non_zero(&["originResponse", "headers"]),
    keep(&["originResponse", "httpExpires"]),
    keep(&["originResponse", "httpLastModified"]),
    keep(&["originResponse", "status"]),
];

/// Rule-table driven normalizer for zone request logs.
#[derive(Debug, Clone, Copy)]
pub struct CloudflareNormalizer {
    mappings: &'static [FieldMapping],
}

impl CloudflareNormalizer {
    pub fn new() -> Self {
        Self {
            mappings: REQUEST_LOG_FIELDS,
        }
    }
}

impl Default for CloudflareNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer for CloudflareNormalizer {
    fn normalize(&self, raw: &RawRecord) -> NormalizedEvent {
        let mut fields = Map::new();
        for mapping in self.mappings {
            let Some(value) = lookup(raw, mapping.path) else {
                continue;
            };
            if let Some(converted) = mapping.rule.apply(value) {
                insert_at(&mut fields, mapping.path, converted);
            }
        }

        // records without a usable timestamp land at the epoch
        let timestamp = raw
            .get("timestamp")
            .and_then(as_nanos)
            .map(|nanos| Utc.timestamp_nanos(nanos))
            .unwrap_or_default();

        NormalizedEvent {
            timestamp,
            record_type: RECORD_TYPE.to_string(),
            log_file: None,
            fields,
        }
    }
}

fn lookup<'a>(raw: &'a RawRecord, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = raw.get(*first)?;
    for key in rest {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

fn insert_at(target: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = target;
    for key in parents {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(map) => current = map,
            _ => return,
        }
    }
    current.insert(last.to_string(), value);
}

fn as_nanos(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

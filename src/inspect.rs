//! Everything the console does with a single key or with the server as a
//! whole: typed value reads, deletes, INFO, and raw command passthrough.

use std::collections::BTreeMap;

use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{is_rejection, LensError};

/// A sorted-set entry. Kept as a pair until it reaches the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    String(String),
    List(Vec<String>),
    Set(Vec<String>),
    SortedSet(Vec<ScoredMember>),
    Hash(BTreeMap<String, String>),
    Unsupported,
}

impl KeyValue {
    /// The shape the browser UI renders. Sorted sets become
    /// `[member, score, member, score, ...]`.
    pub fn to_display_json(&self) -> Value {
        match self {
            KeyValue::String(s) => Value::String(s.clone()),
            KeyValue::List(items) | KeyValue::Set(items) => serde_json::json!(items),
            KeyValue::SortedSet(members) => Value::Array(
                members
                    .iter()
                    .flat_map(|m| {
                        [
                            Value::String(m.member.clone()),
                            Value::String(format_score(m.score)),
                        ]
                    })
                    .collect(),
            ),
            KeyValue::Hash(fields) => serde_json::json!(fields),
            KeyValue::Unsupported => Value::Null,
        }
    }
}

fn format_score(score: f64) -> String {
    if score.is_finite() && score.fract() == 0.0 {
        format!("{:.1}", score)
    } else {
        score.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyDetails {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(serialize_with = "serialize_display_value")]
    pub value: KeyValue,
    pub ttl: i64,
    pub memory_usage: i64,
}

fn serialize_display_value<S: serde::Serializer>(
    value: &KeyValue,
    s: S,
) -> Result<S::Ok, S::Error> {
    value.to_display_json().serialize(s)
}

async fn ensure_exists(conn: &mut MultiplexedConnection, key: &str) -> Result<(), LensError> {
    let exists: bool = redis::cmd("EXISTS").arg(key).query_async(conn).await?;
    if !exists {
        return Err(LensError::KeyNotFound(key.to_string()));
    }
    Ok(())
}

pub async fn get_value(
    conn: &mut MultiplexedConnection,
    key: &str,
    key_type: &str,
) -> Result<KeyValue, LensError> {
    let value = match key_type {
        "string" => KeyValue::String(redis::cmd("GET").arg(key).query_async(conn).await?),
        "list" => KeyValue::List(
            redis::cmd("LRANGE")
                .arg(key)
                .arg(0)
                .arg(-1)
                .query_async(conn)
                .await?,
        ),
        "set" => KeyValue::Set(redis::cmd("SMEMBERS").arg(key).query_async(conn).await?),
        "zset" => {
            let pairs: Vec<(String, f64)> = redis::cmd("ZRANGE")
                .arg(key)
                .arg(0)
                .arg(-1)
                .arg("WITHSCORES")
                .query_async(conn)
                .await?;
            KeyValue::SortedSet(
                pairs
                    .into_iter()
                    .map(|(member, score)| ScoredMember { member, score })
                    .collect(),
            )
        }
        "hash" => KeyValue::Hash(redis::cmd("HGETALL").arg(key).query_async(conn).await?),
        other => {
            tracing::warn!(key, key_type = other, "Unknown key type");
            KeyValue::Unsupported
        }
    };
    Ok(value)
}

/// MEMORY USAGE in bytes, or 0 on servers that lack the MEMORY command.
pub async fn memory_usage(conn: &mut MultiplexedConnection, key: &str) -> Result<i64, LensError> {
    let usage: Result<Option<i64>, _> = redis::cmd("MEMORY")
        .arg("USAGE")
        .arg(key)
        .query_async(conn)
        .await;
    match usage {
        Ok(bytes) => Ok(bytes.unwrap_or(0)),
        Err(e) if is_rejection(&e) => {
            tracing::warn!(error = %e, "Memory usage command not supported, returning 0");
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn key_details(
    conn: &mut MultiplexedConnection,
    key: &str,
) -> Result<KeyDetails, LensError> {
    ensure_exists(conn, key).await?;

    let key_type: String = redis::cmd("TYPE").arg(key).query_async(conn).await?;
    let value = get_value(conn, key, &key_type).await?;
    let ttl: i64 = redis::cmd("TTL").arg(key).query_async(conn).await?;
    let memory_usage = memory_usage(conn, key).await?;

    Ok(KeyDetails {
        key: key.to_string(),
        key_type,
        value,
        ttl,
        memory_usage,
    })
}

pub async fn delete_key(conn: &mut MultiplexedConnection, key: &str) -> Result<(), LensError> {
    ensure_exists(conn, key).await?;

    let removed: i64 = redis::cmd("DEL").arg(key).query_async(conn).await?;
    if removed == 0 {
        return Err(LensError::Redis(redis::RedisError::from((
            redis::ErrorKind::ClientError,
            "Failed to delete key",
            key.to_string(),
        ))));
    }
    tracing::info!(key, "Deleted key");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkDeleteReport {
    pub status: &'static str,
    pub deleted_count: usize,
    pub total_count: usize,
    pub errors: Vec<String>,
}

/// Delete keys one at a time, collecting per-key failures instead of
/// stopping at the first one.
pub async fn delete_keys(
    conn: &mut MultiplexedConnection,
    keys: &[String],
) -> Result<BulkDeleteReport, LensError> {
    if keys.is_empty() {
        return Err(LensError::InvalidRequest("No keys provided".to_string()));
    }

    let mut deleted_count = 0;
    let mut errors = Vec::new();

    for key in keys {
        let removed: Result<i64, _> = redis::cmd("DEL").arg(key).query_async(conn).await;
        match removed {
            Ok(n) if n > 0 => deleted_count += 1,
            Ok(_) => errors.push(format!("Key not found: {}", key)),
            Err(e) => errors.push(format!("Error deleting key '{}': {}", key, e)),
        }
    }

    tracing::info!(deleted_count, total_count = keys.len(), "Bulk delete finished");

    Ok(BulkDeleteReport {
        status: if errors.is_empty() { "ok" } else { "partial" },
        deleted_count,
        total_count: keys.len(),
        errors,
    })
}

/// Run an arbitrary command and hand back its reply as JSON.
pub async fn execute(
    conn: &mut MultiplexedConnection,
    command: &str,
    args: &[String],
) -> Result<Value, LensError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(LensError::InvalidRequest("Empty command".to_string()));
    }

    tracing::info!(command, ?args, "Executing command");

    let mut cmd = redis::cmd(command);
    for arg in args {
        cmd.arg(arg);
    }
    let reply: redis::Value = cmd.query_async(conn).await.map_err(|e| {
        tracing::error!(command, error = %e, "Error executing command");
        LensError::Redis(e)
    })?;
    Ok(redis_value_to_json(reply))
}

pub fn redis_value_to_json(value: redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(i) => Value::from(i),
        redis::Value::BulkString(bytes) => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(redis_value_to_json).collect())
        }
        redis::Value::SimpleString(s) => Value::String(s),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Map(pairs) => {
            let mut map = Map::new();
            for (k, v) in pairs {
                let key = match redis_value_to_json(k) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, redis_value_to_json(v));
            }
            Value::Object(map)
        }
        redis::Value::Double(d) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(d.to_string())),
        redis::Value::Boolean(b) => Value::Bool(b),
        redis::Value::VerbatimString { text, .. } => Value::String(text),
        other => Value::String(format!("{:?}", other)),
    }
}

/// Parse raw INFO text into field -> value, typing numbers and expanding
/// `k=v,k=v` entries such as the keyspace lines.
pub fn parse_info(raw: &str) -> Map<String, Value> {
    let mut info = Map::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        info.insert(field.to_string(), parse_info_value(value));
    }
    info
}

fn parse_info_value(value: &str) -> Value {
    if value.contains('=') && !value.contains(' ') {
        let mut nested = Map::new();
        for part in value.split(',') {
            if let Some((k, v)) = part.split_once('=') {
                nested.insert(k.to_string(), parse_scalar(v));
            }
        }
        if !nested.is_empty() {
            return Value::Object(nested);
        }
    }
    parse_scalar(value)
}

fn parse_scalar(value: &str) -> Value {
    if let Ok(i) = value.parse::<i64>() {
        return Value::from(i);
    }
    if value.contains('.') {
        if let Some(n) = value.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(value.to_string())
}

pub async fn server_info(
    conn: &mut MultiplexedConnection,
) -> Result<Map<String, Value>, LensError> {
    let raw: String = redis::cmd("INFO").query_async(conn).await?;
    Ok(parse_info(&raw))
}

/// Memory, key count, and throughput figures pulled from INFO and DBSIZE.
pub fn summarize_stats(info: &Map<String, Value>, key_count: u64) -> Value {
    let num = |field: &str| info.get(field).cloned().unwrap_or(Value::from(0));
    let human = |field: &str| {
        info.get(field)
            .cloned()
            .unwrap_or_else(|| Value::String("0B".to_string()))
    };

    serde_json::json!({
        "memory": {
            "used_memory": num("used_memory"),
            "used_memory_human": human("used_memory_human"),
            "used_memory_peak": num("used_memory_peak"),
            "used_memory_peak_human": human("used_memory_peak_human"),
            "used_memory_dataset": num("used_memory_dataset"),
            "mem_fragmentation_ratio": num("mem_fragmentation_ratio"),
        },
        "keys": {
            "total": key_count,
        },
        "performance": {
            "instantaneous_ops_per_sec": num("instantaneous_ops_per_sec"),
            "total_commands_processed": num("total_commands_processed"),
            "total_connections_received": num("total_connections_received"),
            "connected_clients": num("connected_clients"),
        },
    })
}

pub async fn server_stats(conn: &mut MultiplexedConnection) -> Result<Value, LensError> {
    let info = server_info(conn).await?;
    let key_count: u64 = redis::cmd("DBSIZE").query_async(conn).await?;
    Ok(summarize_stats(&info, key_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INFO: &str = "# Server\r\n\
redis_version:7.2.4\r\n\
redis_mode:standalone\r\n\
os:Linux 6.1.0 x86_64\r\n\
\r\n\
# Memory\r\n\
used_memory:1048576\r\n\
used_memory_human:1.00M\r\n\
mem_fragmentation_ratio:1.23\r\n\
\r\n\
# Keyspace\r\n\
db0:keys=3,expires=1,avg_ttl=0\r\n";

    #[test]
    fn test_parse_info_types_values() {
        let info = parse_info(SAMPLE_INFO);
        assert_eq!(info["redis_version"], "7.2.4");
        assert_eq!(info["redis_mode"], "standalone");
        assert_eq!(info["os"], "Linux 6.1.0 x86_64");
        assert_eq!(info["used_memory"], 1048576);
        assert_eq!(info["used_memory_human"], "1.00M");
        assert_eq!(info["mem_fragmentation_ratio"], 1.23);
        assert_eq!(info["db0"]["keys"], 3);
        assert_eq!(info["db0"]["expires"], 1);
        assert!(!info.contains_key("# Server"));
    }

    #[test]
    fn test_summarize_stats_defaults_missing_fields() {
        let info = parse_info(SAMPLE_INFO);
        let stats = summarize_stats(&info, 3);
        assert_eq!(stats["memory"]["used_memory"], 1048576);
        assert_eq!(stats["memory"]["used_memory_peak"], 0);
        assert_eq!(stats["memory"]["used_memory_peak_human"], "0B");
        assert_eq!(stats["keys"]["total"], 3);
        assert_eq!(stats["performance"]["connected_clients"], 0);
    }

    #[test]
    fn test_sorted_set_flattened_for_display() {
        let value = KeyValue::SortedSet(vec![
            ScoredMember { member: "alice".to_string(), score: 1.0 },
            ScoredMember { member: "bob".to_string(), score: 2.5 },
        ]);
        assert_eq!(
            value.to_display_json(),
            serde_json::json!(["alice", "1.0", "bob", "2.5"])
        );
    }

    #[test]
    fn test_key_details_serialization() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "redis".to_string());
        let details = KeyDetails {
            key: "h".to_string(),
            key_type: "hash".to_string(),
            value: KeyValue::Hash(fields),
            ttl: -1,
            memory_usage: 64,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["type"], "hash");
        assert_eq!(json["value"]["name"], "redis");
        assert_eq!(json["ttl"], -1);
        assert_eq!(json["memory_usage"], 64);

        let unsupported = KeyDetails { value: KeyValue::Unsupported, ..details };
        assert!(serde_json::to_value(&unsupported).unwrap()["value"].is_null());
    }

    #[test]
    fn test_redis_value_to_json() {
        let reply = redis::Value::Array(vec![
            redis::Value::Int(7),
            redis::Value::BulkString(b"hello".to_vec()),
            redis::Value::Nil,
            redis::Value::Okay,
            redis::Value::SimpleString("PONG".to_string()),
            redis::Value::BulkString(vec![0xff, b'a']),
        ]);
        assert_eq!(
            redis_value_to_json(reply),
            serde_json::json!([7, "hello", null, "OK", "PONG", "\u{fffd}a"])
        );
    }

    #[test]
    fn test_redis_map_to_json_object() {
        let reply = redis::Value::Map(vec![
            (redis::Value::SimpleString("proto".to_string()), redis::Value::Int(3)),
            (redis::Value::BulkString(b"ok".to_vec()), redis::Value::Boolean(true)),
        ]);
        assert_eq!(
            redis_value_to_json(reply),
            serde_json::json!({"proto": 3, "ok": true})
        );
    }
}

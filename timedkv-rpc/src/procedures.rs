//! The RPC worker procedures: echo, report, status,
//! clear, set/add/replace/append, increment (int + double), cas, remove,
//! get. Each takes the already-decoded input parameter map and the resolved
//! target database and returns the output parameter map, or a
//! [`TimedKvError`] the dispatcher maps to a return code and `ERROR` text.

use std::time::{SystemTime, UNIX_EPOCH};
use timedkv_common::{get_str, insert_str, ParamMap, TimedKvError, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use timedkv_store::TimedDb;

use crate::registry::DatabaseRegistry;

/// `xt` on the RPC surface is narrower than `TimedDb`'s own general
/// contract: absent or ≤ 0 means "no expiration," where `TimedDb` also
/// accepts negative values as an absolute epoch. Callers that want that
/// still have it through the `TimedDb` API directly; only the wire
/// procedures clamp it away.
fn parse_xt(params: &ParamMap) -> Result<i64, TimedKvError> {
    match get_str(params, "xt") {
        None => Ok(0),
        Some(s) => {
            let xt: i64 = s.parse().map_err(|_| TimedKvError::Invalid(format!("bad xt {s:?}")))?;
            Ok(if xt < 1 { 0 } else { xt })
        }
    }
}

fn required_bytes<'a>(params: &'a ParamMap, key: &str) -> Result<&'a [u8], TimedKvError> {
    params.get(key.as_bytes()).map(|v| v.as_slice()).ok_or_else(|| TimedKvError::Invalid("invalid parameters".to_string()))
}

fn check_key_size(key: &[u8]) -> Result<(), TimedKvError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(TimedKvError::Invalid(format!("key exceeds {MAX_KEY_SIZE} bytes")));
    }
    Ok(())
}

fn check_value_size(value: &[u8]) -> Result<(), TimedKvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(TimedKvError::Invalid(format!("value exceeds {MAX_VALUE_SIZE} bytes")));
    }
    Ok(())
}

pub fn echo(params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    Ok(params.clone())
}

pub struct ServerInfo {
    pub pid: u32,
    pub started_at: SystemTime,
}

pub fn report(registry: &DatabaseRegistry, info: &ServerInfo) -> Result<ParamMap, TimedKvError> {
    let mut out = ParamMap::new();
    insert_str(&mut out, "version", env!("CARGO_PKG_VERSION"));
    insert_str(&mut out, "kc_version", "compatible");
    insert_str(&mut out, "os", std::env::consts::OS);
    insert_str(&mut out, "pid", info.pid.to_string());
    let elapsed = info.started_at.elapsed().unwrap_or_default().as_secs_f64();
    insert_str(&mut out, "time", format!("{elapsed:.6}"));

    let mut total_count = 0u64;
    let mut total_size = 0u64;
    for (i, db) in registry.all().iter().enumerate() {
        let count = db.count();
        let size = db.size();
        insert_str(
            &mut out,
            &format!("db_{i}"),
            format!("count={} size={} path={}", count, size, db.path().unwrap_or_else(|| "*".to_string())),
        );
        total_count += count;
        total_size += size;
    }
    insert_str(&mut out, "count", total_count.to_string());
    insert_str(&mut out, "size", total_size.to_string());

    for (key, value) in system_info() {
        insert_str(&mut out, &format!("sys_{key}"), value);
    }
    Ok(out)
}

fn system_info() -> Vec<(&'static str, String)> {
    vec![
        ("cores", std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).to_string()),
        (
            "now",
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs().to_string(),
        ),
    ]
}

pub fn status(db: &TimedDb) -> Result<ParamMap, TimedKvError> {
    let mut out = ParamMap::new();
    for (key, value) in db.status() {
        insert_str(&mut out, &key, value);
    }
    Ok(out)
}

pub fn clear(db: &TimedDb) -> Result<ParamMap, TimedKvError> {
    db.clear();
    Ok(ParamMap::new())
}

pub fn set(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let value = required_bytes(params, "value")?;
    check_key_size(key)?;
    check_value_size(value)?;
    let xt = parse_xt(params)?;
    db.set(key, value, xt)?;
    Ok(ParamMap::new())
}

pub fn add(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let value = required_bytes(params, "value")?;
    check_key_size(key)?;
    check_value_size(value)?;
    let xt = parse_xt(params)?;
    db.add(key, value, xt)?;
    Ok(ParamMap::new())
}

pub fn replace(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let value = required_bytes(params, "value")?;
    check_key_size(key)?;
    check_value_size(value)?;
    let xt = parse_xt(params)?;
    db.replace(key, value, xt)?;
    Ok(ParamMap::new())
}

pub fn append(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let value = required_bytes(params, "value")?;
    check_key_size(key)?;
    check_value_size(value)?;
    let xt = parse_xt(params)?;
    db.append(key, value, xt)?;
    Ok(ParamMap::new())
}

pub fn increment(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let num_str = get_str(params, "num").ok_or_else(|| TimedKvError::Invalid("invalid parameters".to_string()))?;
    let delta: i64 = num_str.parse().map_err(|_| TimedKvError::Invalid(format!("bad num {num_str:?}")))?;
    let xt = parse_xt(params)?;
    let result = db.increment(key, delta, xt)?;
    let mut out = ParamMap::new();
    insert_str(&mut out, "num", result.to_string());
    Ok(out)
}

pub fn increment_double(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let num_str = get_str(params, "num").ok_or_else(|| TimedKvError::Invalid("invalid parameters".to_string()))?;
    let delta: f64 = num_str.parse().map_err(|_| TimedKvError::Invalid(format!("bad num {num_str:?}")))?;
    let xt = parse_xt(params)?;
    let result = db.increment_double(key, delta, xt)?;
    let mut out = ParamMap::new();
    insert_str(&mut out, "num", result.to_string());
    Ok(out)
}

pub fn cas(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let old = params.get("oval".as_bytes()).map(|v| v.as_slice());
    let new = params.get("nval".as_bytes()).map(|v| v.as_slice());
    let xt = parse_xt(params)?;
    db.cas(key, old, new, xt)?;
    Ok(ParamMap::new())
}

pub fn remove(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    db.remove(key)?;
    Ok(ParamMap::new())
}

pub fn get(db: &TimedDb, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
    let key = required_bytes(params, "key")?;
    let (value, deadline) = db.get(key)?;
    let mut out = ParamMap::new();
    out.insert(b"value".to_vec(), value);
    if deadline < timedkv_common::DEADLINE_MAX {
        insert_str(&mut out, "xt", deadline.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use timedkv_common::insert_str as put_str;
    use timedkv_store::{Clock, Engine, FixedClock, MemEngine, TimedDbConfig};

    fn open_db() -> TimedDb {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_000));
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(None));
        TimedDb::open(TimedDbConfig::new("t"), engine, clock)
    }

    #[test]
    fn set_then_get_round_trips() {
        let db = open_db();
        let mut params = ParamMap::new();
        put_str(&mut params, "key", "k");
        put_str(&mut params, "value", "v");
        set(&db, &params).unwrap();

        let mut get_params = ParamMap::new();
        put_str(&mut get_params, "key", "k");
        let out = get(&db, &get_params).unwrap();
        assert_eq!(out.get(b"value".as_slice()).unwrap(), b"v");
        assert!(out.get(b"xt".as_slice()).is_none());
    }

    #[test]
    fn xt_absent_or_non_positive_means_no_expiration() {
        let db = open_db();
        let mut params = ParamMap::new();
        put_str(&mut params, "key", "k");
        put_str(&mut params, "value", "v");
        put_str(&mut params, "xt", "-5");
        set(&db, &params).unwrap();

        let mut get_params = ParamMap::new();
        put_str(&mut get_params, "key", "k");
        let out = get(&db, &get_params).unwrap();
        assert!(out.get(b"xt".as_slice()).is_none());
    }

    #[test]
    fn add_on_duplicate_is_logic_error() {
        let db = open_db();
        let mut params = ParamMap::new();
        put_str(&mut params, "key", "k");
        put_str(&mut params, "value", "v");
        add(&db, &params).unwrap();
        assert!(matches!(add(&db, &params), Err(TimedKvError::Duplicate(_))));
    }

    #[test]
    fn increment_reports_decimal_result() {
        let db = open_db();
        let mut params = ParamMap::new();
        put_str(&mut params, "key", "c");
        put_str(&mut params, "num", "5");
        let out = increment(&db, &params).unwrap();
        assert_eq!(out.get(b"num".as_slice()).unwrap(), b"5");
    }

    #[test]
    fn cas_mismatch_is_logic_error() {
        let db = open_db();
        let mut set_params = ParamMap::new();
        put_str(&mut set_params, "key", "x");
        put_str(&mut set_params, "value", "1");
        set(&db, &set_params).unwrap();

        let mut cas_params = ParamMap::new();
        put_str(&mut cas_params, "key", "x");
        put_str(&mut cas_params, "oval", "wrong");
        put_str(&mut cas_params, "nval", "2");
        assert!(matches!(cas(&db, &cas_params), Err(TimedKvError::Logic(_))));
    }

    #[test]
    fn missing_required_param_is_invalid() {
        let db = open_db();
        let params = ParamMap::new();
        assert!(matches!(set(&db, &params), Err(TimedKvError::Invalid(_))));
    }

    #[test]
    fn oversized_key_is_invalid() {
        let db = open_db();
        let mut params = ParamMap::new();
        params.insert(b"key".to_vec(), vec![b'k'; MAX_KEY_SIZE + 1]);
        params.insert(b"value".to_vec(), b"v".to_vec());
        assert!(matches!(set(&db, &params), Err(TimedKvError::Invalid(_))));
    }
}

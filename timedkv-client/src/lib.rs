//! A thin RPC-over-HTTP client: one method per worker procedure, each
//! POSTing a form-encoded parameter map to `/rpc/<procedure>` and decoding
//! the TSV (or form, for errors) response back into a [`TimedKvError`] or
//! the procedure's own result shape.

use timedkv_common::{decode_tsv, encode_form, get_str, insert_bytes, insert_str, ParamMap, TimedKvError};

/// A client bound to one server's base URL (`http://host:port`). Every call
/// is a single HTTP request/response; the client does not pool connections
/// beyond what the underlying [`reqwest::Client`] already does.
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }

    fn url(&self, procedure: &str) -> String {
        format!("{}/rpc/{}", self.base_url.trim_end_matches('/'), procedure)
    }

    async fn call(&self, procedure: &str, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
        let body = encode_form(params);
        let response = self
            .http
            .post(self.url(procedure))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| TimedKvError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| TimedKvError::Network(e.to_string()))?;
        let map = decode_tsv(&bytes, None).map_err(TimedKvError::Invalid)?;

        if status == 200 {
            return Ok(map);
        }
        Err(parse_error(&map, status))
    }

    /// Sends `params` to `echo` and returns exactly what comes back.
    pub async fn echo(&self, params: &ParamMap) -> Result<ParamMap, TimedKvError> {
        self.call("echo", params).await
    }

    /// Server and per-database summary, as a flat string-keyed map.
    pub async fn report(&self) -> Result<ParamMap, TimedKvError> {
        self.call("report", &ParamMap::new()).await
    }

    pub async fn status(&self) -> Result<ParamMap, TimedKvError> {
        self.call("status", &ParamMap::new()).await
    }

    pub async fn clear(&self) -> Result<(), TimedKvError> {
        self.call("clear", &ParamMap::new()).await.map(|_| ())
    }

    pub async fn set(&self, key: &str, value: &[u8], xt: Option<i64>) -> Result<(), TimedKvError> {
        self.call("set", &write_params(key, value, xt)).await.map(|_| ())
    }

    pub async fn add(&self, key: &str, value: &[u8], xt: Option<i64>) -> Result<(), TimedKvError> {
        self.call("add", &write_params(key, value, xt)).await.map(|_| ())
    }

    pub async fn replace(&self, key: &str, value: &[u8], xt: Option<i64>) -> Result<(), TimedKvError> {
        self.call("replace", &write_params(key, value, xt)).await.map(|_| ())
    }

    pub async fn append(&self, key: &str, value: &[u8], xt: Option<i64>) -> Result<(), TimedKvError> {
        self.call("append", &write_params(key, value, xt)).await.map(|_| ())
    }

    pub async fn increment(&self, key: &str, delta: i64, xt: Option<i64>) -> Result<i64, TimedKvError> {
        let mut params = ParamMap::new();
        insert_str(&mut params, "key", key);
        insert_str(&mut params, "num", delta.to_string());
        if let Some(xt) = xt {
            insert_str(&mut params, "xt", xt.to_string());
        }
        let out = self.call("increment", &params).await?;
        let num = get_str(&out, "num").ok_or_else(|| TimedKvError::Internal("increment response missing num".to_string()))?;
        num.parse().map_err(|_| TimedKvError::Internal(format!("bad num in increment response: {num:?}")))
    }

    pub async fn increment_double(&self, key: &str, delta: f64, xt: Option<i64>) -> Result<f64, TimedKvError> {
        let mut params = ParamMap::new();
        insert_str(&mut params, "key", key);
        insert_str(&mut params, "num", delta.to_string());
        if let Some(xt) = xt {
            insert_str(&mut params, "xt", xt.to_string());
        }
        let out = self.call("increment_double", &params).await?;
        let num = get_str(&out, "num").ok_or_else(|| TimedKvError::Internal("increment_double response missing num".to_string()))?;
        num.parse().map_err(|_| TimedKvError::Internal(format!("bad num in increment_double response: {num:?}")))
    }

    pub async fn cas(
        &self,
        key: &str,
        old: Option<&[u8]>,
        new: Option<&[u8]>,
        xt: Option<i64>,
    ) -> Result<(), TimedKvError> {
        let mut params = ParamMap::new();
        insert_str(&mut params, "key", key);
        if let Some(old) = old {
            insert_bytes(&mut params, "oval", old.to_vec());
        }
        if let Some(new) = new {
            insert_bytes(&mut params, "nval", new.to_vec());
        }
        if let Some(xt) = xt {
            insert_str(&mut params, "xt", xt.to_string());
        }
        self.call("cas", &params).await.map(|_| ())
    }

    pub async fn remove(&self, key: &str) -> Result<(), TimedKvError> {
        let mut params = ParamMap::new();
        insert_str(&mut params, "key", key);
        self.call("remove", &params).await.map(|_| ())
    }

    /// Returns `(value, remaining_xt)`; `remaining_xt` is `None` for a
    /// record with no expiration.
    pub async fn get(&self, key: &str) -> Result<(Vec<u8>, Option<u64>), TimedKvError> {
        let mut params = ParamMap::new();
        insert_str(&mut params, "key", key);
        let out = self.call("get", &params).await?;
        let value = out.get(b"value".as_slice()).cloned().unwrap_or_default();
        let xt = get_str(&out, "xt").and_then(|s| s.parse().ok());
        Ok((value, xt))
    }
}

fn write_params(key: &str, value: &[u8], xt: Option<i64>) -> ParamMap {
    let mut params = ParamMap::new();
    insert_str(&mut params, "key", key);
    insert_bytes(&mut params, "value", value.to_vec());
    if let Some(xt) = xt {
        insert_str(&mut params, "xt", xt.to_string());
    }
    params
}

/// Reconstructs the server's [`TimedKvError`] from its `tag: message` form
/// in the `ERROR` key (see the dispatcher's `error_response`), falling back
/// to a generic `Internal` error keyed off the HTTP status if the body is
/// unparseable.
fn parse_error(map: &ParamMap, status: u16) -> TimedKvError {
    let Some(error) = get_str(map, "ERROR") else {
        return TimedKvError::Internal(format!("HTTP {status} with no ERROR body"));
    };
    let Some((tag, message)) = error.split_once(": ") else {
        return TimedKvError::Internal(error.to_string());
    };
    match tag {
        "no_record" => TimedKvError::NoRecord(message.to_string()),
        "duplicate" => TimedKvError::Duplicate(message.to_string()),
        "logic" => TimedKvError::Logic(message.to_string()),
        "invalid" => TimedKvError::Invalid(message.to_string()),
        "no_impl" => TimedKvError::NoImpl(message.to_string()),
        "network" => TimedKvError::Network(message.to_string()),
        "system" => TimedKvError::System(message.to_string()),
        _ => TimedKvError::Internal(error.to_string()),
    }
}

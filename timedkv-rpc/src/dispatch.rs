//! The RPC dispatcher: routes `/rpc/<procedure>` requests to
//! a worker procedure, decoding the input parameter map from either the
//! query string, a form-encoded body, or TSV (with optional `colenc`), and
//! encoding the output map back with the most compact encoding that
//! preserves every byte.

use timedkv_common::{choose_encoding, decode_form, decode_tsv, encode_tsv, insert_str, ColEnc, ParamMap, ReturnCode, TimedKvError};

use crate::http::{HttpRequest, HttpResponse, Method};
use crate::procedures::{self, ServerInfo};
use crate::registry::DatabaseRegistry;

/// Parses `Content-Type: text/tab-separated-values[; colenc=B|Q|U]` and
/// returns the `colenc` attribute, if any.
fn tsv_colenc(content_type: &str) -> Option<ColEnc> {
    content_type
        .split(';')
        .skip(1)
        .find_map(|attr| attr.trim().strip_prefix("colenc=").and_then(ColEnc::from_attr))
}

fn decode_params(req: &HttpRequest) -> Result<ParamMap, TimedKvError> {
    if matches!(req.method, Method::Get | Method::Head) {
        return decode_form(req.query.as_bytes()).map_err(TimedKvError::Invalid);
    }
    let content_type = req.header("content-type").unwrap_or("");
    if content_type.starts_with("application/x-www-form-urlencoded") {
        decode_form(&req.body).map_err(TimedKvError::Invalid)
    } else if content_type.starts_with("text/tab-separated-values") {
        decode_tsv(&req.body, tsv_colenc(content_type)).map_err(TimedKvError::Invalid)
    } else if req.body.is_empty() {
        decode_form(req.query.as_bytes()).map_err(TimedKvError::Invalid)
    } else {
        decode_tsv(&req.body, None).map_err(TimedKvError::Invalid)
    }
}

fn encode_response_body(map: &ParamMap) -> (String, Vec<u8>) {
    match choose_encoding(map) {
        Some(enc) => (format!("text/tab-separated-values; colenc={}", enc.as_attr()), encode_tsv(map, Some(enc))),
        None => ("text/tab-separated-values".to_string(), encode_tsv(map, None)),
    }
}

/// Dispatches one already-parsed HTTP request. Non-`/rpc/` paths pass
/// through as 501.
pub fn dispatch(req: &HttpRequest, registry: &DatabaseRegistry, info: &ServerInfo) -> HttpResponse {
    let Some(procedure) = req.path.strip_prefix("/rpc/") else {
        let mut out = ParamMap::new();
        insert_str(&mut out, "ERROR", "not implemented");
        let (content_type, body) = encode_response_body(&out);
        return HttpResponse::new(501, content_type, body);
    };

    let params = match decode_params(req) {
        Ok(p) => p,
        Err(e) => return error_response(ReturnCode::InvalidArguments, &e),
    };

    let result = run_procedure(procedure, &params, registry, info);
    match result {
        Ok(out) => {
            let (content_type, body) = encode_response_body(&out);
            HttpResponse::new(200, content_type, body)
        }
        Err(e) => error_response(ReturnCode::from(&e), &e),
    }
}

fn run_procedure(
    procedure: &str,
    params: &ParamMap,
    registry: &DatabaseRegistry,
    info: &ServerInfo,
) -> Result<ParamMap, TimedKvError> {
    match procedure {
        "echo" => procedures::echo(params),
        "report" => procedures::report(registry, info),
        "status" => procedures::status(registry.resolve(params)?),
        "clear" => procedures::clear(registry.resolve(params)?),
        "set" => procedures::set(registry.resolve(params)?, params),
        "add" => procedures::add(registry.resolve(params)?, params),
        "replace" => procedures::replace(registry.resolve(params)?, params),
        "append" => procedures::append(registry.resolve(params)?, params),
        "increment" => procedures::increment(registry.resolve(params)?, params),
        "increment_double" => procedures::increment_double(registry.resolve(params)?, params),
        "cas" => procedures::cas(registry.resolve(params)?, params),
        "remove" => procedures::remove(registry.resolve(params)?, params),
        "get" => procedures::get(registry.resolve(params)?, params),
        other => Err(TimedKvError::NoImpl(format!("unknown procedure {other:?}"))),
    }
}

fn error_response(code: ReturnCode, err: &TimedKvError) -> HttpResponse {
    let mut out = ParamMap::new();
    insert_str(&mut out, "ERROR", format!("{}: {}", err.tag(), err));
    let (content_type, body) = encode_response_body(&out);
    HttpResponse::new(code.http_status(), content_type, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::SystemTime;
    use timedkv_store::{Clock, Engine, FixedClock, MemEngine, TimedDb, TimedDbConfig};

    fn registry() -> DatabaseRegistry {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_000));
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(None));
        let db = Arc::new(TimedDb::open(TimedDbConfig::new("main"), engine, clock));
        DatabaseRegistry::new(vec![db])
    }

    fn get_request(path: &str, query: &str) -> HttpRequest {
        HttpRequest {
            raw_request_line: format!("GET {path}?{query} HTTP/1.1"),
            method: Method::Get,
            path: path.to_string(),
            query: query.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    fn post_request(path: &str, content_type: &str, body: Vec<u8>) -> HttpRequest {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        HttpRequest {
            raw_request_line: format!("POST {path} HTTP/1.1"),
            method: Method::Post,
            path: path.to_string(),
            query: String::new(),
            version: "HTTP/1.1".to_string(),
            headers,
            body,
            keep_alive: true,
        }
    }

    #[test]
    fn set_then_get_via_form_encoding() {
        let registry = registry();
        let info = ServerInfo { pid: 1, started_at: SystemTime::now() };

        let set_req = post_request(
            "/rpc/set",
            "application/x-www-form-urlencoded",
            b"key=foo&value=bar".to_vec(),
        );
        let resp = dispatch(&set_req, &registry, &info);
        assert_eq!(resp.status, 200);

        let get_req = get_request("/rpc/get", "key=foo");
        let resp = dispatch(&get_req, &registry, &info);
        assert_eq!(resp.status, 200);
        let map = decode_tsv(&resp.body, None).unwrap();
        assert_eq!(map.get(b"value".as_slice()).unwrap(), b"bar");
    }

    #[test]
    fn get_missing_key_is_450() {
        let registry = registry();
        let info = ServerInfo { pid: 1, started_at: SystemTime::now() };
        let resp = dispatch(&get_request("/rpc/get", "key=nope"), &registry, &info);
        assert_eq!(resp.status, 450);
        let map = decode_tsv(&resp.body, None).unwrap();
        assert!(map.contains_key(b"ERROR".as_slice()));
    }

    #[test]
    fn non_rpc_path_is_501() {
        let registry = registry();
        let info = ServerInfo { pid: 1, started_at: SystemTime::now() };
        let resp = dispatch(&get_request("/other", ""), &registry, &info);
        assert_eq!(resp.status, 501);
    }

    #[test]
    fn unknown_procedure_is_501() {
        let registry = registry();
        let info = ServerInfo { pid: 1, started_at: SystemTime::now() };
        let resp = dispatch(&get_request("/rpc/bogus", ""), &registry, &info);
        assert_eq!(resp.status, 501);
    }
}

//! Endpoint grammar: `host[:port]`, missing host means
//! `0.0.0.0`, missing port means the default.

use timedkv_common::TimedKvError;

pub const DEFAULT_PORT: u16 = 1978;

/// Parses a `host[:port]` endpoint, filling in the documented defaults.
pub fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16), TimedKvError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Ok(("0.0.0.0".to_string(), default_port));
    }
    match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            let host = if host.is_empty() { "0.0.0.0" } else { host };
            let port: u16 = port
                .parse()
                .map_err(|_| TimedKvError::Invalid(format!("bad port in endpoint {endpoint:?}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((endpoint.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_port() {
        assert_eq!(parse_endpoint("127.0.0.1:1978", DEFAULT_PORT).unwrap(), ("127.0.0.1".to_string(), 1978));
    }

    #[test]
    fn missing_host_defaults_to_any() {
        assert_eq!(parse_endpoint(":9000", DEFAULT_PORT).unwrap(), ("0.0.0.0".to_string(), 9000));
    }

    #[test]
    fn missing_port_uses_default() {
        assert_eq!(parse_endpoint("example.com", DEFAULT_PORT).unwrap(), ("example.com".to_string(), DEFAULT_PORT));
    }

    #[test]
    fn empty_endpoint_means_any_default_port() {
        assert_eq!(parse_endpoint("", DEFAULT_PORT).unwrap(), ("0.0.0.0".to_string(), DEFAULT_PORT));
    }
}

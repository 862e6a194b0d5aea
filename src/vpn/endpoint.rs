//! In-place rewrite of the tunnel endpoint
//!
//! Only the value of the first `Endpoint = ...` line changes. Every other
//! byte of the file, line endings included, is written back unchanged. The
//! write is a plain full rewrite, not an atomic replace.

use super::tunnel::{read_config, TunnelConfigError};
use std::fs;
use std::path::Path;
use tracing::info;

/// Replace the endpoint in the config at `path`.
pub fn set_endpoint(path: &Path, new_endpoint: &str) -> Result<(), TunnelConfigError> {
    validate_endpoint(new_endpoint)?;

    let content = read_config(path)?;
    let updated =
        rewrite_endpoint(&content, new_endpoint).ok_or_else(|| TunnelConfigError::Malformed {
            path: path.to_path_buf(),
            reason: "Endpoint= not found".to_string(),
        })?;

    fs::write(path, updated)?;
    info!("Endpoint of {} set to {}", path.display(), new_endpoint);
    Ok(())
}

/// Check `endpoint` is `host:port` and return the port.
pub fn validate_endpoint(endpoint: &str) -> Result<u16, TunnelConfigError> {
    let invalid = || TunnelConfigError::InvalidEndpoint(endpoint.to_string());

    if endpoint
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(invalid());
    }

    let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host == "[]" {
        return Err(invalid());
    }

    match port.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(invalid()),
    }
}

/// Value of the first endpoint line, trimmed
pub fn find_endpoint(content: &str) -> Option<&str> {
    content
        .lines()
        .find(|line| is_endpoint_line(line))
        .and_then(|line| line.split_once('='))
        .map(|(_, value)| value.trim())
}

/// `content` with the first endpoint line replaced, or `None` if there is none.
pub fn rewrite_endpoint(content: &str, new_endpoint: &str) -> Option<String> {
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        if is_endpoint_line(body) {
            let rest = offset + line.len();
            let mut updated = String::with_capacity(content.len() + new_endpoint.len());
            updated.push_str(&content[..offset]);
            updated.push_str("Endpoint = ");
            updated.push_str(new_endpoint);
            updated.push_str(&line[body.len()..]);
            updated.push_str(&content[rest..]);
            return Some(updated);
        }
        offset += line.len();
    }

    None
}

fn is_endpoint_line(line: &str) -> bool {
    line.trim_start()
        .split_once('=')
        .is_some_and(|(key, _)| key.trim_end().eq_ignore_ascii_case("endpoint"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rewrite_only_touches_endpoint_line() {
        let content = "Endpoint = 1.2.3.4:51820\nPrivateKey = ...\n";
        assert_eq!(
            rewrite_endpoint(content, "5.6.7.8:51820").unwrap(),
            "Endpoint = 5.6.7.8:51820\nPrivateKey = ...\n"
        );
    }

    #[test]
    fn test_rewrite_preserves_surrounding_bytes() {
        let content = "[Interface]\r\nPrivateKey = abc\r\n\r\n[Peer]\r\n   endPOINT\t=old.example.com:2408\r\nAllowedIPs = 0.0.0.0/0\r\n# trailing";
        let updated = rewrite_endpoint(content, "vpn.example.com:51820").unwrap();
        assert_eq!(
            updated,
            "[Interface]\r\nPrivateKey = abc\r\n\r\n[Peer]\r\nEndpoint = vpn.example.com:51820\r\nAllowedIPs = 0.0.0.0/0\r\n# trailing"
        );
    }

    #[test]
    fn test_rewrite_last_line_without_newline() {
        let content = "PrivateKey = abc\nEndpoint = 1.2.3.4:1";
        assert_eq!(
            rewrite_endpoint(content, "9.9.9.9:2").unwrap(),
            "PrivateKey = abc\nEndpoint = 9.9.9.9:2"
        );
    }

    #[test]
    fn test_rewrite_first_match_only() {
        let content = "Endpoint = a:1\nEndpoint = b:2\n";
        assert_eq!(rewrite_endpoint(content, "c:3").unwrap(), "Endpoint = c:3\nEndpoint = b:2\n");
    }

    #[test]
    fn test_similar_keys_are_not_endpoints() {
        let content = "EndpointHost = a:1\n# Endpoint = b:2\n";
        assert!(rewrite_endpoint(content, "c:3").is_none());
        assert!(find_endpoint(content).is_none());
    }

    #[test]
    fn test_find_endpoint() {
        assert_eq!(find_endpoint("[Peer]\n Endpoint =  1.2.3.4:51820 \n"), Some("1.2.3.4:51820"));
    }

    #[test]
    fn test_validate_endpoint() {
        assert_eq!(validate_endpoint("5.6.7.8:51820").unwrap(), 51820);
        assert_eq!(validate_endpoint("vpn.example.com:2408").unwrap(), 2408);
        assert_eq!(validate_endpoint("[2001:db8::1]:443").unwrap(), 443);

        for bad in ["", "1.2.3.4", ":51820", "1.2.3.4:", "1.2.3.4:0", "1.2.3.4:70000", "a b:1", "a:1\nDNS = x"] {
            assert!(
                matches!(validate_endpoint(bad), Err(TunnelConfigError::InvalidEndpoint(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_set_endpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.conf");
        fs::write(&path, "Endpoint = 1.2.3.4:51820\nPrivateKey = ...\n").unwrap();

        set_endpoint(&path, "5.6.7.8:51820").unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Endpoint = 5.6.7.8:51820\nPrivateKey = ...\n"
        );
    }

    #[test]
    fn test_set_endpoint_missing_line_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.conf");
        let original = "[Interface]\nPrivateKey = abc\n";
        fs::write(&path, original).unwrap();

        let result = set_endpoint(&path, "5.6.7.8:51820");
        assert!(matches!(result, Err(TunnelConfigError::Malformed { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_set_endpoint_invalid_value_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.conf");
        let original = "Endpoint = 1.2.3.4:51820\n";
        fs::write(&path, original).unwrap();

        let result = set_endpoint(&path, "5.6.7.8");
        assert!(matches!(result, Err(TunnelConfigError::InvalidEndpoint(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_set_endpoint_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = set_endpoint(&dir.path().join("config.conf"), "5.6.7.8:51820");
        assert!(matches!(result, Err(TunnelConfigError::NotFound(_))));
    }
}

//! Loading the list of hosts to watch.
//!
//! The list is a CSV file without a header row. The first field names the
//! host, the second describes it; further fields are ignored. The host may be
//! a bare name, `name:port`, or a URL such as `https://name:8443/`.
//!
//! Any malformed record fails the whole load.

use std::fs::File;
use std::io;
use std::net::IpAddr;
use std::path::Path;

use url::Url;

use crate::error::HostListError;
use crate::HostRecord;

/// Reads the host list at `path`.
pub fn load_hosts<P: AsRef<Path>>(path: P) -> Result<Vec<HostRecord>, HostListError> {
    let file = File::open(path.as_ref()).map_err(|source| HostListError::Io {
        path: path.as_ref().display().to_string(),
        source,
    })?;
    read_hosts(file)
}

/// Reads host records from any CSV source.
pub fn read_hosts<R: io::Read>(reader: R) -> Result<Vec<HostRecord>, HostListError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row?;
        let number = index + 1;

        if row.len() < 2 {
            return Err(HostListError::Malformed {
                record: number,
                reason: format!("expected at least 2 fields, found {}", row.len()),
            });
        }

        let (host, port) = parse_host(&row[0]).map_err(|reason| HostListError::Malformed {
            record: number,
            reason,
        })?;

        records.push(HostRecord {
            host,
            port,
            description: row[1].trim().to_string(),
        });
    }

    Ok(records)
}

/// Splits a host field into the host to connect to and an explicit port.
fn parse_host(field: &str) -> Result<(String, Option<u16>), String> {
    let field = field.trim();
    if field.is_empty() {
        return Err("empty host".to_string());
    }

    match field.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => return Ok((format!("[{}]", ip), None)),
        Ok(IpAddr::V4(ip)) => return Ok((ip.to_string(), None)),
        Err(_) => {}
    }

    let url = if field.contains("://") {
        Url::parse(field)
    } else {
        Url::parse(&format!("https://{}", field))
    }
    .map_err(|e| format!("invalid host '{}': {}", field, e))?;

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| format!("invalid host '{}': no host name", field))?;

    // Url drops a port equal to the scheme default, so look at the field itself
    let port = if has_explicit_port(field) {
        url.port_or_known_default()
    } else {
        None
    };

    Ok((host.to_string(), port))
}

/// Whether the authority part of a host field names a port.
fn has_explicit_port(field: &str) -> bool {
    let rest = field.split_once("://").map_or(field, |(_, rest)| rest);
    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or(rest);
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let after_host = host_port.rsplit(']').next().unwrap_or(host_port);
    after_host.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_hosts() {
        let input = "www.example.com,Example site\napi.example.com,API,ignored\n";
        let records = read_hosts(input.as_bytes()).unwrap();
        assert_eq!(
            records,
            vec![
                HostRecord::new("www.example.com", "Example site"),
                HostRecord::new("api.example.com", "API"),
            ]
        );
    }

    #[test]
    fn test_quoted_description_with_comma() {
        let input = "www.example.com,\"Shop, EU\"\n";
        let records = read_hosts(input.as_bytes()).unwrap();
        assert_eq!(records[0].description, "Shop, EU");
    }

    #[test]
    fn test_explicit_ports_and_urls() {
        let input = concat!(
            "example.com:8443,custom port\n",
            "https://secure.example.com:9443/health,url with port\n",
            "https://plain.example.com/,url without port\n",
            "127.0.0.1,ipv4\n",
            "::1,ipv6\n",
            "[::1]:8443,ipv6 with port\n",
        );
        let records = read_hosts(input.as_bytes()).unwrap();

        assert_eq!(records[0], HostRecord::new("example.com", "custom port").with_port(8443));
        assert_eq!(
            records[1],
            HostRecord::new("secure.example.com", "url with port").with_port(9443)
        );
        assert_eq!(records[2], HostRecord::new("plain.example.com", "url without port"));
        assert_eq!(records[3], HostRecord::new("127.0.0.1", "ipv4"));
        assert_eq!(records[4], HostRecord::new("[::1]", "ipv6"));
        assert_eq!(records[5], HostRecord::new("[::1]", "ipv6 with port").with_port(8443));
    }

    #[test]
    fn test_explicit_default_port_is_kept() {
        let input = concat!(
            "example.com:443,explicit 443\n",
            "https://example.com:443/,url 443\n",
            "http://example.com:80/,url 80\n",
            "[::1]:443,ipv6 443\n",
            "https://example.com/,no port\n",
        );
        let records = read_hosts(input.as_bytes()).unwrap();

        assert_eq!(records[0].port, Some(443));
        assert_eq!(records[1].port, Some(443));
        assert_eq!(records[2].port, Some(80));
        assert_eq!(records[3], HostRecord::new("[::1]", "ipv6 443").with_port(443));
        assert_eq!(records[4].port, None);
    }

    #[test]
    fn test_has_explicit_port() {
        assert!(has_explicit_port("example.com:443"));
        assert!(has_explicit_port("https://user@example.com:8443/path"));
        assert!(has_explicit_port("[::1]:443"));
        assert!(!has_explicit_port("[::1]"));
        assert!(!has_explicit_port("https://example.com/a:b"));
        assert!(!has_explicit_port("example.com"));
    }

    #[test]
    fn test_missing_description_aborts_load() {
        let input = "www.example.com,Example\nbroken.example.com\n";
        match read_hosts(input.as_bytes()).unwrap_err() {
            HostListError::Malformed { record, .. } => assert_eq!(record, 2),
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_host_aborts_load() {
        let input = " ,no host\n";
        assert!(matches!(
            read_hosts(input.as_bytes()),
            Err(HostListError::Malformed { record: 1, .. })
        ));
    }

    #[test]
    fn test_bad_port_aborts_load() {
        let input = "example.com:https,bad port\n";
        assert!(matches!(
            read_hosts(input.as_bytes()),
            Err(HostListError::Malformed { record: 1, .. })
        ));
    }

    #[test]
    fn test_empty_file_has_no_records() {
        assert!(read_hosts("".as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_load_hosts_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"www.example.com,Example site\n")
            .unwrap();

        let records = load_hosts(temp_file.path()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            load_hosts("/nonexistent/urls.csv"),
            Err(HostListError::Io { .. })
        ));
    }
}

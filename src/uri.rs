//! Parses and builds `riv://` URIs.
//!
//! Layout: `riv://user@host[:port]/path[?query][#fragment]`. The query
//! string, when present, carries three recognised parameters: `n=` (a
//! data binding's identity, hex-encoded), `t=` (channel type), and `s=`
//! (channel subtype). A URI with no query and no fragment addresses the
//! control channel; one with a query addresses a specific data channel.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

use crate::error::{Result, RivError};

const PATH_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'?').add(b'#');

/// A parsed `riv://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RivUri {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// URL-decoded path, without its leading slash.
    pub path: String,
    pub query: Option<DataChannelQuery>,
    pub fragment: Option<String>,
}

/// The three query parameters a data-channel URI carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelQuery {
    /// Hex-encoded data-binding identity (`n=`).
    pub binding_id: String,
    /// Channel type (`t=`).
    pub channel_type: u16,
    /// Channel subtype (`s=`).
    pub subtype: u16,
}

impl fmt::Display for RivUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "riv://")?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "/{}", utf8_percent_encode(&self.path, PATH_ENCODE_SET))?;
        if let Some(q) = &self.query {
            write!(
                f,
                "?n={}&t={}&s={}",
                q.binding_id, q.channel_type, q.subtype
            )?;
        }
        if let Some(frag) = &self.fragment {
            write!(f, "#{frag}")?;
        }
        Ok(())
    }
}

impl RivUri {
    /// Builds the control-channel URI for a provider reachable at
    /// `host[:port]` under `name`.
    pub fn control(host: String, port: Option<u16>, name: &str) -> RivUri {
        RivUri {
            user: None,
            host,
            port,
            path: name.to_string(),
            query: None,
            fragment: None,
        }
    }

    /// Builds the data-channel URI for one binding's channel.
    pub fn data_channel(
        host: String,
        port: Option<u16>,
        name: &str,
        binding_id: String,
        channel_type: u16,
        subtype: u16,
    ) -> RivUri {
        RivUri {
            user: None,
            host,
            port,
            path: name.to_string(),
            query: Some(DataChannelQuery {
                binding_id,
                channel_type,
                subtype,
            }),
            fragment: None,
        }
    }
}

/// Parses a full `riv://...` URI string, including scheme.
pub fn parse(input: &str) -> Result<RivUri> {
    let rest = input
        .strip_prefix("riv://")
        .ok_or_else(|| RivError::BadRequest("uri missing riv:// scheme".into()))?;
    parse_authority_and_rest(rest)
}

/// Parses the client's request line, which omits the scheme: the server
/// already knows it is speaking `riv`. Format is the same as `parse`
/// minus the `riv://` prefix, and `host` is meaningless (the server
/// knows its own identity), so only path/query/fragment are populated.
pub fn parse_request(input: &str) -> Result<RivUri> {
    if input.is_empty() {
        return Err(RivError::BadRequest("empty request".into()));
    }
    parse_authority_and_rest(input)
}

fn parse_authority_and_rest(rest: &str) -> Result<RivUri> {
    // Split off the fragment first, then the query, leaving
    // "[user@]host[:port]/path" or, for a request-line-only call
    // (no authority), just "/path" (or "path").
    let (before_frag, fragment) = match rest.split_once('#') {
        Some((a, b)) => (a, Some(decode(b))),
        None => (rest, None),
    };
    let (before_query, query_str) = match before_frag.split_once('?') {
        Some((a, b)) => (a, Some(b)),
        None => (before_frag, None),
    };

    // A request line never carries user/host/port; it starts directly
    // at the path. Detect that by the presence of a leading '/'.
    let (user, host, port, path_part) = if let Some(stripped) = before_query.strip_prefix('/') {
        (None, String::new(), None, stripped)
    } else {
        let (authority, path_part) = match before_query.split_once('/') {
            Some((a, b)) => (a, b),
            None => (before_query, ""),
        };
        let (user, host_port) = match authority.split_once('@') {
            Some((u, hp)) => (Some(decode(u)), hp),
            None => (None, authority),
        };
        let (host, port) = parse_host_port(host_port)?;
        (user, host, port, path_part)
    };

    let path = decode(path_part);

    let query = match query_str {
        None => None,
        Some(q) => Some(parse_query(q)?),
    };

    Ok(RivUri {
        user,
        host,
        port,
        path,
        query,
        fragment,
    })
}

fn parse_host_port(host_port: &str) -> Result<(String, Option<u16>)> {
    if let Some(stripped) = host_port.strip_prefix('[') {
        // bracketed IPv6 literal, optionally followed by :port
        let end = stripped
            .find(']')
            .ok_or_else(|| RivError::BadRequest("unterminated ipv6 literal".into()))?;
        let host = stripped[..end].to_string();
        let after = &stripped[end + 1..];
        let port = match after.strip_prefix(':') {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| RivError::BadRequest("invalid port".into()))?,
            ),
            None => None,
        };
        return Ok((host, port));
    }

    match host_port.rsplit_once(':') {
        Some((h, p)) if !h.is_empty() && p.chars().all(|c| c.is_ascii_digit()) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| RivError::BadRequest("invalid port".into()))?;
            Ok((h.to_string(), Some(port)))
        }
        _ => Ok((host_port.to_string(), None)),
    }
}

fn parse_query(q: &str) -> Result<DataChannelQuery> {
    let mut binding_id = None;
    let mut channel_type = None;
    let mut subtype = None;

    for part in q.split('&') {
        if let Some(v) = part.strip_prefix("n=") {
            binding_id = Some(decode(v));
        } else if let Some(v) = part.strip_prefix("t=") {
            channel_type = Some(
                v.parse::<u16>()
                    .map_err(|_| RivError::BadRequest("invalid t= parameter".into()))?,
            );
        } else if let Some(v) = part.strip_prefix("s=") {
            subtype = Some(
                v.parse::<u16>()
                    .map_err(|_| RivError::BadRequest("invalid s= parameter".into()))?,
            );
        }
    }

    match (binding_id, channel_type, subtype) {
        (Some(binding_id), Some(channel_type), Some(subtype)) => Ok(DataChannelQuery {
            binding_id,
            channel_type,
            subtype,
        }),
        _ => Err(RivError::BadRequest(
            "query missing required n=/t=/s= parameter".into(),
        )),
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_uri_round_trips() {
        let uri = RivUri::control("test-host".into(), Some(52000), "x y");
        let rendered = uri.to_string();
        assert_eq!(rendered, "riv://test-host:52000/x%20y");
    }

    #[test]
    fn data_channel_uri_round_trips() {
        let uri = RivUri::data_channel(
            "10.0.0.5".into(),
            Some(52000),
            "cam",
            "1a2b".into(),
            1,
            1,
        );
        let rendered = uri.to_string();
        let reparsed_query = rendered.split_once('?').unwrap().1;
        assert!(reparsed_query.contains("n=1a2b"));
        assert!(reparsed_query.contains("t=1"));
        assert!(reparsed_query.contains("s=1"));
    }

    #[test]
    fn parses_request_without_query() {
        let uri = parse_request("cam").unwrap();
        assert_eq!(uri.path, "cam");
        assert!(uri.query.is_none());
        assert!(uri.fragment.is_none());
    }

    #[test]
    fn parses_request_with_query() {
        let uri = parse_request("cam?n=0&t=1&s=1").unwrap();
        assert_eq!(uri.path, "cam");
        let q = uri.query.unwrap();
        assert_eq!(q.binding_id, "0");
        assert_eq!(q.channel_type, 1);
        assert_eq!(q.subtype, 1);
    }

    #[test]
    fn rejects_incomplete_query() {
        let err = parse_request("cam?n=0&t=1").unwrap_err();
        assert!(matches!(err, RivError::BadRequest(_)));
    }

    #[test]
    fn rejects_empty_request() {
        assert!(parse_request("").is_err());
    }

    #[test]
    fn full_uri_with_ipv6_and_fragment() {
        let uri = parse("riv://[::1]:52000/cam#frag").unwrap();
        assert_eq!(uri.host, "::1");
        assert_eq!(uri.port, Some(52000));
        assert_eq!(uri.path, "cam");
        assert_eq!(uri.fragment.as_deref(), Some("frag"));
    }
}

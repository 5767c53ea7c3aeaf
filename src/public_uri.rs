//! Public-URI enumeration: the set of `riv://` URIs a provider is
//! reachable at, by host name and by each up, non-loopback network
//! interface.
//!
//! `hostname` supplies the canonical host name; `if-addrs` enumerates
//! interface addresses, IPv4 and IPv6 alike.

use std::net::IpAddr;
use std::sync::Mutex;

use crate::uri::RivUri;

/// Caches the enumerated URI set for one provider, invalidated whenever
/// the provider's binding set changes (a new binding means a new set of
/// addressable data channels).
#[derive(Default)]
pub struct PublicUriCache {
    entry: Mutex<Option<(u64, Vec<RivUri>)>>,
}

impl PublicUriCache {
    pub fn new() -> PublicUriCache {
        PublicUriCache::default()
    }

    /// Returns the cached URI set if `generation` matches what was
    /// cached, otherwise computes, caches, and returns a fresh one.
    pub fn get_or_compute(&self, generation: u64, provider_name: &str, port: u16) -> Vec<RivUri> {
        let mut guard = self.entry.lock().unwrap();
        if let Some((cached_gen, uris)) = guard.as_ref() {
            if *cached_gen == generation {
                return uris.clone();
            }
        }
        let uris = enumerate(provider_name, port);
        *guard = Some((generation, uris.clone()));
        uris
    }

    /// Forces the next `get_or_compute` call to recompute regardless of
    /// generation, used when enumeration itself (not the provider) is
    /// known to be stale.
    pub fn invalidate(&self) {
        *self.entry.lock().unwrap() = None;
    }
}

/// Builds the control-channel URI set for `provider_name`: one entry for
/// the machine's canonical host name, plus one per up, non-loopback
/// interface address (both IPv4 and IPv6).
pub fn enumerate(provider_name: &str, port: u16) -> Vec<RivUri> {
    let mut uris = Vec::new();

    if let Ok(name) = hostname::get() {
        if let Some(name) = name.to_str() {
            uris.push(RivUri::control(name.to_string(), Some(port), provider_name));
        }
    }

    if let Ok(interfaces) = if_addrs::get_if_addrs() {
        for iface in interfaces {
            if iface.is_loopback() {
                continue;
            }
            let host = match iface.ip() {
                IpAddr::V4(v4) => v4.to_string(),
                IpAddr::V6(v6) => format!("[{v6}]"),
            };
            uris.push(RivUri::control(host, Some(port), provider_name));
        }
    }

    uris
}

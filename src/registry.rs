//! Per-client subscription bookkeeping: who asked for which pads, and for
//! how much longer that request stays valid.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::DualShockMeta;

/// Default `ClientTimeoutLimit`: how long an unrenewed subscription stays
/// valid before it's treated as gone. Configurable via
/// [`crate::server::ServerConfig`].
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A client's standing request, timestamped along the three dimensions a
/// `DSUC_PadDataReq` can register: all pads, one pad id, or one MAC.
#[derive(Debug, Default)]
struct Subscription {
    all_pads: Option<Instant>,
    per_pad: [Option<Instant>; 4],
    per_mac: HashMap<[u8; 6], Instant>,
}

impl Subscription {
    fn is_interested_in(&self, meta: &DualShockMeta, now: Instant, timeout: Duration) -> bool {
        if let Some(ts) = self.all_pads {
            if now.saturating_duration_since(ts) < timeout {
                return true;
            }
        }

        if let Some(ts) = meta.pad_id_as_usize().and_then(|i| self.per_pad[i]) {
            if now.saturating_duration_since(ts) < timeout {
                return true;
            }
        }

        if let Some(ts) = self.per_mac.get(&meta.mac_address) {
            if now.saturating_duration_since(*ts) < timeout {
                return true;
            }
        }

        false
    }

    fn is_alive(&self, now: Instant, timeout: Duration) -> bool {
        let fresh = |ts: &Instant| now.saturating_duration_since(*ts) < timeout;

        self.all_pads.as_ref().map(fresh).unwrap_or(false)
            || self.per_pad.iter().flatten().any(fresh)
            || self.per_mac.values().any(fresh)
    }
}

impl DualShockMeta {
    fn pad_id_as_usize(&self) -> Option<usize> {
        if self.pad_id < 4 {
            Some(self.pad_id as usize)
        } else {
            None
        }
    }
}

/// `ClientEndpoint -> ClientSubscription` table. Keys on `(IpAddr, u16)`
/// value equality via [`SocketAddr`], which already compares by value in
/// Rust — an object-identity bug from keying on anything other than the
/// address's value can't arise in this representation.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<SocketAddr, Subscription>,
    timeout: Duration,
}

impl ClientRegistry {
    pub fn new(timeout: Duration) -> ClientRegistry {
        ClientRegistry {
            clients: HashMap::new(),
            timeout,
        }
    }

    pub fn register_all_pads(&mut self, endpoint: SocketAddr, now: Instant) {
        self.clients.entry(endpoint).or_default().all_pads = Some(now);
    }

    /// Returns `false` (no-op) if `pad_id` is out of range.
    pub fn register_by_pad_id(&mut self, endpoint: SocketAddr, pad_id: u8, now: Instant) -> bool {
        if pad_id > 3 {
            return false;
        }
        self.clients.entry(endpoint).or_default().per_pad[pad_id as usize] = Some(now);
        true
    }

    pub fn register_by_mac(&mut self, endpoint: SocketAddr, mac: [u8; 6], now: Instant) {
        self.clients
            .entry(endpoint)
            .or_default()
            .per_mac
            .insert(mac, now);
    }

    /// Filter phase + GC phase combined: evicts every subscription whose
    /// timestamps are all stale, then returns the endpoints among the
    /// survivors interested in `meta`.
    pub fn clients_for(&mut self, meta: &DualShockMeta, now: Instant) -> Vec<SocketAddr> {
        let timeout = self.timeout;
        self.clients.retain(|_, sub| sub.is_alive(now, timeout));

        self.clients
            .iter()
            .filter(|(_, sub)| sub.is_interested_in(meta, now, timeout))
            .map(|(&endpoint, _)| endpoint)
            .collect()
    }

    /// Drops every client subscription unconditionally.
    pub fn clear(&mut self) {
        self.clients.clear();
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

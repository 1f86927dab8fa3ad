//! Membership view: a bounded, loosely-maintained set of peer addresses.
//!
//! The view is a belief, never an authority. Peers join it when they talk to
//! us, when gossip or the bootstrap directory mention them, or when a client
//! hands us a replica list; they leave it when an RPC to them times out or
//! when the view is down-sampled before publishing.

use crate::directory::{self, Directory, DirectoryEntry};
use crate::protocol::Opcode;
use crate::record::FIELD_DELIMITER;
use crate::rpc::RpcClient;
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Upper bound on the view after down-sampling.
pub const MAX_VIEW_SIZE: usize = 5;

/// Placeholder for "no address", used where a replica slot is empty.
pub const NULL_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Prefix of the per-slot keys written to the bootstrap directory.
const DIRECTORY_SLOT_PREFIX: &str = "server";

/// True for the placeholder address (any unspecified address counts).
pub fn is_placeholder(ip: &IpAddr) -> bool {
    ip.is_unspecified()
}

/// Split a `_`-joined address list, dropping entries that are not addresses.
pub fn parse_address_list(s: &str) -> Vec<IpAddr> {
    s.split(FIELD_DELIMITER)
        .filter_map(|entry| entry.trim().parse().ok())
        .collect()
}

pub struct MembershipView {
    local_ip: IpAddr,
    bound: usize,
    peers: Mutex<BTreeSet<IpAddr>>,
}

impl MembershipView {
    pub fn new(local_ip: IpAddr) -> Self {
        Self::with_bound(local_ip, MAX_VIEW_SIZE)
    }

    pub fn with_bound(local_ip: IpAddr, bound: usize) -> Self {
        Self {
            local_ip,
            bound,
            peers: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    fn peers(&self) -> MutexGuard<'_, BTreeSet<IpAddr>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a peer. Our own address and the placeholder are ignored.
    ///
    /// Returns true if the peer was not already in the view.
    pub fn add_peer(&self, ip: IpAddr) -> bool {
        if ip == self.local_ip || is_placeholder(&ip) {
            return false;
        }
        let added = self.peers().insert(ip);
        if added {
            debug!("View: added {}", ip);
        }
        added
    }

    /// Remove a peer. Returns true if it was present.
    pub fn remove_peer(&self, ip: &IpAddr) -> bool {
        let removed = self.peers().remove(ip);
        if removed {
            info!("View: removed unreachable peer {}", ip);
        }
        removed
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.peers().contains(ip)
    }

    /// Current peers in address order.
    pub fn snapshot(&self) -> Vec<IpAddr> {
        self.peers().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }

    /// Wire form of the view: addresses joined with `_`, or the placeholder
    /// address when the view is empty.
    pub fn to_wire_string(&self) -> String {
        let peers = self.peers();
        if peers.is_empty() {
            return NULL_ADDR.to_string();
        }
        let delimiter = FIELD_DELIMITER.to_string();
        peers
            .iter()
            .map(IpAddr::to_string)
            .collect::<Vec<_>>()
            .join(delimiter.as_str())
    }

    /// Parse a wire-form view. Invalid entries are dropped; self and the
    /// placeholder are kept here and filtered when merged.
    pub fn from_wire_string(s: &str) -> Vec<IpAddr> {
        parse_address_list(s)
    }

    /// Add every valid address from a wire-form view. Returns how many were new.
    pub fn merge_wire(&self, s: &str) -> usize {
        Self::from_wire_string(s)
            .into_iter()
            .filter(|ip| self.add_peer(*ip))
            .count()
    }

    /// Shuffle and keep at most `bound` peers.
    pub fn reduce_to_bound<R: Rng + ?Sized>(&self, rng: &mut R) {
        let mut peers = self.peers();
        if peers.len() <= self.bound {
            return;
        }
        let mut shuffled: Vec<IpAddr> = peers.iter().copied().collect();
        shuffled.shuffle(rng);
        shuffled.truncate(self.bound);
        *peers = shuffled.into_iter().collect();
    }

    /// Pick one peer uniformly at random.
    pub fn random_peer<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<IpAddr> {
        self.snapshot().choose(rng).copied()
    }

    /// Merge every address currently published in the directory.
    ///
    /// Returns how many peers were new to the view.
    pub async fn bootstrap_from_directory(&self, dir: &dyn Directory) -> directory::Result<usize> {
        let entries = dir.list().await?;
        let mut added = 0;
        for entry in &entries {
            match entry.ip.parse::<IpAddr>() {
                Ok(ip) => {
                    if self.add_peer(ip) {
                        added += 1;
                    }
                }
                Err(_) => debug!("Ignoring directory entry {} = {:?}", entry.key, entry.ip),
            }
        }
        debug!(
            "Bootstrap: {} directory entries, {} new peers",
            entries.len(),
            added
        );
        Ok(added)
    }

    /// Write the view plus our own address back to the directory, one slot
    /// per member. Callers down-sample first so the registry stays bounded.
    pub async fn publish_to_directory(&self, dir: &dyn Directory) -> directory::Result<()> {
        let entries: Vec<DirectoryEntry> = self
            .snapshot()
            .into_iter()
            .chain(std::iter::once(self.local_ip))
            .enumerate()
            .map(|(slot, ip)| {
                DirectoryEntry::new(format!("{DIRECTORY_SLOT_PREFIX}{slot}"), ip.to_string())
            })
            .collect();
        dir.put_all(entries).await
    }

    /// Bootstrap from the directory, down-sample, and publish back.
    pub async fn refresh_directory<R: Rng + Send + ?Sized>(
        &self,
        dir: &dyn Directory,
        rng: &mut R,
    ) -> directory::Result<()> {
        self.bootstrap_from_directory(dir).await?;
        self.reduce_to_bound(rng);
        self.publish_to_directory(dir).await
    }

    /// Ask one random peer for its view and merge the answer.
    ///
    /// Returns true if a view came back.
    pub async fn gossip_once<R: Rng + Send + ?Sized>(
        &self,
        rpc: &dyn RpcClient,
        rng: &mut R,
    ) -> bool {
        let Some(target) = self.random_peer(rng) else {
            debug!("Gossip: view is empty, nobody to ask");
            return false;
        };

        let request = self.local_ip.to_string();
        match rpc
            .send_request(Opcode::GetView, request.as_bytes(), &[target])
            .await
        {
            Some(reply) => {
                let added = self.merge_wire(&String::from_utf8_lossy(&reply));
                debug!("Gossip with {}: {} new peers", target, added);
                true
            }
            None => {
                debug!("Gossip with {} got no answer", target);
                false
            }
        }
    }
}

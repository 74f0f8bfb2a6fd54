// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service registry held by every catalog.
//!
//! Entries arrive from local services (hop 0 on the wire) and from peer
//! catalogs (their stored hop count). Each registration increments the hop
//! count before comparing, so an entry travelling around a cycle of
//! catalogs always comes back with a larger hop count than the copy it
//! originated from and is discarded.
//!
//! Two live instances of the same service name at different URIs are
//! resolved by effective run time: the instance that has been running
//! longer wins, the other one is told it is a backup.

use crate::actor_info::{ActorInfo, ActorInfoList};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Outcome of [`Registry::register_service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First entry for this name.
    Added,
    /// A different instance opened while the stored one was closed.
    Started,
    /// A different, longer-running instance replaced the stored one.
    TookOver,
    /// Same instance, closed before and open now.
    Restarted,
    /// Same instance, open before and closed now.
    Stopped,
    /// Same instance reached over fewer hops.
    Rerouted,
    /// Same instance and state; lease refreshed.
    Alive,
    /// Rejected: another instance of the same name is running longer.
    Backup,
    /// Rejected: an echo of information this catalog already holds.
    Stale,
    /// Rejected: closed announcement for an instance not stored here.
    Ignored,
}

impl Registration {
    /// True when the stored list changed in a way peers must learn about.
    pub fn changes_registry(self) -> bool {
        matches!(
            self,
            Registration::Added
                | Registration::Started
                | Registration::TookOver
                | Registration::Restarted
                | Registration::Stopped
                | Registration::Rerouted
        )
    }
}

/// One stored service plus its lease bookkeeping.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    info: ActorInfo,
    lease_remaining_ms: u64,
    age: Duration,
    expired: bool,
}

impl RegistryEntry {
    fn new(info: ActorInfo) -> Self {
        Self {
            lease_remaining_ms: lease_ms(&info),
            info,
            age: Duration::ZERO,
            expired: false,
        }
    }

    pub fn info(&self) -> &ActorInfo {
        &self.info
    }

    /// Run time reported at registration plus the time stored here.
    pub fn effective_run_time(&self) -> Duration {
        self.info.application_run_time.saturating_add(self.age)
    }

    /// True when the lease ran out; the entry is closed.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn lease_remaining(&self) -> Duration {
        Duration::from_millis(self.lease_remaining_ms)
    }

    fn refresh_lease(&mut self, timeout_seconds: u32) {
        self.info.timeout_seconds = timeout_seconds;
        self.lease_remaining_ms = lease_ms(&self.info);
    }

    /// Copy sent to clients and peers, with the run time brought forward.
    fn snapshot(&self) -> ActorInfo {
        let mut info = self.info.clone();
        info.application_run_time = self.effective_run_time();
        info
    }
}

fn lease_ms(info: &ActorInfo) -> u64 {
    u64::from(info.timeout_seconds) * 1000
}

/// Ordered list of services, unique by name.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
    generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of open entries.
    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.info.is_open).count()
    }

    /// Incremented on every change peers must learn about.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.info.name == name)
    }

    /// Open entry for `name`.
    pub fn lookup(&self, name: &str) -> Option<ActorInfo> {
        self.get(name)
            .filter(|e| e.info.is_open)
            .map(RegistryEntry::snapshot)
    }

    /// All entries, open and closed, in registration order.
    pub fn snapshot(&self) -> Vec<ActorInfo> {
        self.entries.iter().map(RegistryEntry::snapshot).collect()
    }

    /// Merge one announcement. `origin` only appears in log lines.
    pub fn register_service(&mut self, entry: &ActorInfo, origin: &str) -> Registration {
        let mut incoming = entry.clone();
        incoming.hop_count = incoming.hop_count.saturating_add(1);

        let index = match self.entries.iter().position(|e| e.info.name == incoming.name) {
            Some(index) => index,
            None => {
                info!(
                    "registry: added {} (open: {}, hops: {}, from {})",
                    incoming.describe(),
                    incoming.is_open,
                    incoming.hop_count,
                    origin
                );
                self.entries.push(RegistryEntry::new(incoming));
                self.generation += 1;
                return Registration::Added;
            }
        };

        let outcome = if self.entries[index].info.uri != incoming.uri {
            self.register_other_instance(index, incoming, origin)
        } else {
            self.register_same_instance(index, incoming, origin)
        };
        if outcome.changes_registry() {
            self.generation += 1;
        }
        outcome
    }

    fn register_other_instance(
        &mut self,
        index: usize,
        incoming: ActorInfo,
        origin: &str,
    ) -> Registration {
        let stored = &self.entries[index];
        if !incoming.is_open {
            debug!(
                "registry: ignored closed {} from {}, stored instance is {}",
                incoming.describe(),
                origin,
                stored.info.describe()
            );
            return Registration::Ignored;
        }
        if !stored.info.is_open {
            info!(
                "registry: {} started, replacing closed {} (from {})",
                incoming.describe(),
                stored.info.describe(),
                origin
            );
            self.entries[index] = RegistryEntry::new(incoming);
            return Registration::Started;
        }

        let stored_run_time = stored.effective_run_time();
        if incoming.application_run_time > stored_run_time {
            info!(
                "registry: {} took over from {} (run time {:?} > {:?}, from {})",
                incoming.describe(),
                stored.info.describe(),
                incoming.application_run_time,
                stored_run_time,
                origin
            );
            self.entries[index] = RegistryEntry::new(incoming);
            Registration::TookOver
        } else {
            info!(
                "registry: {} is backup for {} (run time {:?} <= {:?}, from {})",
                incoming.describe(),
                stored.info.describe(),
                incoming.application_run_time,
                stored_run_time,
                origin
            );
            Registration::Backup
        }
    }

    fn register_same_instance(
        &mut self,
        index: usize,
        incoming: ActorInfo,
        origin: &str,
    ) -> Registration {
        let stored = &mut self.entries[index];
        if incoming.hop_count > stored.info.hop_count && !stored.expired {
            trace!(
                "registry: stale {} from {} (hops {} > {})",
                incoming.describe(),
                origin,
                incoming.hop_count,
                stored.info.hop_count
            );
            return Registration::Stale;
        }

        if incoming.is_open != stored.info.is_open {
            let outcome = if incoming.is_open {
                Registration::Restarted
            } else {
                Registration::Stopped
            };
            info!(
                "registry: {} {:?} (hops: {}, from {})",
                incoming.describe(),
                outcome,
                incoming.hop_count,
                origin
            );
            *stored = RegistryEntry::new(incoming);
            return outcome;
        }

        if incoming.hop_count < stored.info.hop_count {
            debug!(
                "registry: {} rerouted (hops {} -> {}, from {})",
                incoming.describe(),
                stored.info.hop_count,
                incoming.hop_count,
                origin
            );
            *stored = RegistryEntry::new(incoming);
            return Registration::Rerouted;
        }

        trace!("registry: {} alive (from {})", incoming.describe(), origin);
        stored.refresh_lease(incoming.timeout_seconds);
        Registration::Alive
    }

    /// Merge a peer's list and return this registry's list.
    ///
    /// Calling it twice with the same list changes nothing the second time.
    pub fn synchronize(&mut self, list: &ActorInfoList, origin: &str) -> ActorInfoList {
        let changed = list
            .items
            .iter()
            .map(|entry| self.register_service(entry, origin))
            .filter(|r| r.changes_registry())
            .count();
        if changed > 0 {
            debug!(
                "registry: {} of {} entries from {} changed the registry",
                changed,
                list.items.len(),
                origin
            );
        }
        ActorInfoList {
            items: self.snapshot(),
        }
    }

    /// Advance entry ages and leases. Returns the number of entries that
    /// expired.
    ///
    /// A lease of 0 seconds never expires.
    pub fn tick(&mut self, elapsed: Duration) -> usize {
        let elapsed_ms = elapsed.as_millis().min(u128::from(u64::MAX)) as u64;
        let mut expired = 0;
        for entry in &mut self.entries {
            entry.age = entry.age.saturating_add(elapsed);
            if !entry.info.is_open || entry.info.timeout_seconds == 0 {
                continue;
            }
            entry.lease_remaining_ms = entry.lease_remaining_ms.saturating_sub(elapsed_ms);
            if entry.lease_remaining_ms == 0 {
                info!(
                    "registry: {} expired after {}s without announcement",
                    entry.info.describe(),
                    entry.info.timeout_seconds
                );
                entry.info.is_open = false;
                entry.expired = true;
                expired += 1;
            }
        }
        if expired > 0 {
            self.generation += 1;
        }
        expired
    }
}

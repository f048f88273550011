use crate::core_session::Direction;
use crate::core_tftp::TftpError;
use log::{debug, trace};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// What the registry remembers about a live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    pub file_name: String,
    pub direction: Direction,
    pub started_at: Instant,
}

impl SessionInfo {
    pub fn new(peer: SocketAddr, file_name: &str, direction: Direction) -> Self {
        Self {
            peer,
            file_name: file_name.to_string(),
            direction,
            started_at: Instant::now(),
        }
    }
}

/// Table of live sessions keyed by their ephemeral port.
///
/// This is the only state shared between the listener and the session tasks.
/// Every access goes through the mutex and no lock is held across an await.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u16, SessionInfo>>,
    port_range: RangeInclusive<u16>,
    max_probes: usize,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(
        port_range: RangeInclusive<u16>,
        max_probes: usize,
        max_sessions: Option<usize>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            port_range,
            max_probes,
            max_sessions,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u16, SessionInfo>> {
        // A panicking session cannot leave the map half-updated, keep serving.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Picks a free id by random probing and records `info` under it.
    ///
    /// Fails with `ExhaustedIdSpace` when the table is saturated, when the
    /// session cap is reached, or when `max_probes` probes all hit live ids.
    pub fn allocate(&self, info: SessionInfo) -> Result<u16, TftpError> {
        let mut sessions = self.table();

        let range_size = usize::from(*self.port_range.end() - *self.port_range.start()) + 1;
        let limit = self.max_sessions.map_or(range_size, |max| max.min(range_size));
        if sessions.len() >= limit {
            debug!("Session table full ({} live sessions)", sessions.len());
            return Err(TftpError::ExhaustedIdSpace(0));
        }

        let mut rng = rand::thread_rng();
        for probe in 1..=self.max_probes {
            let id = rng.gen_range(self.port_range.clone());
            if !sessions.contains_key(&id) {
                trace!("Allocated session id {} after {} probe(s)", id, probe);
                sessions.insert(id, info);
                return Ok(id);
            }
        }

        Err(TftpError::ExhaustedIdSpace(self.max_probes))
    }

    /// Removes `id` from the table. Releasing an absent id is a no-op.
    pub fn release(&self, id: u16) {
        if self.table().remove(&id).is_some() {
            trace!("Released session id {}", id);
        } else {
            trace!("Session id {} already released", id);
        }
    }

    pub fn contains(&self, id: u16) -> bool {
        self.table().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the live sessions, for diagnostics.
    pub fn snapshot(&self) -> Vec<(u16, SessionInfo)> {
        let mut live: Vec<_> = self
            .table()
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect();
        live.sort_by_key(|(id, _)| *id);
        live
    }
}

/// Ownership of one allocated id. Dropping the lease releases the id, so a
/// session gives its slot back on every exit path.
#[derive(Debug)]
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    id: u16,
}

impl SessionLease {
    pub fn new(registry: Arc<SessionRegistry>, id: u16) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> u16 {
        self.id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

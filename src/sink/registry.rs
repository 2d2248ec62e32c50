//! Process-wide, refcounted sink clients keyed by endpoint.
//!
//! Resolves the "shared sink across streams" design note: rather than the
//! last `StartLogging` silently displacing the sink used by earlier streams
//! (a latent bug in the upstream driver this is modeled on), each distinct
//! [`SinkEndpoint`] gets its own client, reused by every stream that targets
//! it and torn down only once the last such stream stops.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StartError;
use crate::model::SinkEndpoint;
use crate::sink::SinkClient;

struct Entry {
    client: SinkClient,
    endpoint: SinkEndpoint,
    refcount: usize,
}

/// A registry of live [`SinkClient`]s, one per distinct endpoint.
#[derive(Default)]
pub struct SinkRegistry {
    entries: Mutex<HashMap<(String, u16), Entry>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a client for `endpoint`.
    ///
    /// If a client already exists for this host/port pair, it is reused
    /// provided its configuration (scheme, timeout) matches; otherwise
    /// [`StartError::ConfigConflict`] is returned.
    pub async fn acquire(&self, endpoint: SinkEndpoint) -> Result<SinkClient, StartError> {
        let key = (endpoint.host.clone(), endpoint.port);

        {
            let mut entries = self.entries.lock().expect("sink registry poisoned");
            if let Some(entry) = entries.get_mut(&key) {
                if entry.endpoint != endpoint {
                    return Err(StartError::ConfigConflict);
                }
                entry.refcount += 1;
                return Ok(entry.client.clone());
            }
        }

        // `connect_or_reconnecting` never fails: if the sink happens to be
        // down right now, the client comes up already reconnecting in the
        // background rather than aborting stream creation.
        let client = SinkClient::connect_or_reconnecting(endpoint.clone()).await;

        let mut entries = self.entries.lock().expect("sink registry poisoned");
        // Another task may have raced us to create the same entry while we
        // were connecting; prefer the one already present.
        if let Some(entry) = entries.get_mut(&key) {
            if entry.endpoint != endpoint {
                return Err(StartError::ConfigConflict);
            }
            entry.refcount += 1;
            return Ok(entry.client.clone());
        }

        entries.insert(
            key,
            Entry {
                client: client.clone(),
                endpoint,
                refcount: 1,
            },
        );
        Ok(client)
    }

    /// Releases one reference to the client for `endpoint`, closing it once
    /// the last reference is gone.
    pub async fn release(&self, endpoint: &SinkEndpoint) {
        let key = (endpoint.host.clone(), endpoint.port);
        let client = {
            let mut entries = self.entries.lock().expect("sink registry poisoned");
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    if entry.refcount == 0 {
                        entries.remove(&key).map(|e| e.client)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(client) = client {
            client.close().await;
        }
    }
}

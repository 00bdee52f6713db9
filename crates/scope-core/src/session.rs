//! The proxy session: dialect, service registry, and the rendezvous queues
//! pairing host messages with client pollers.
//!
//! One `Session` covers one host connection and one (assumed single) client.
//! There is deliberately no ambient global: the proxy constructs a `Session`
//! and passes it around, and tests instantiate as many isolated sessions as
//! they like.

use crate::schema::SchemaMap;
use crate::tags::TagAllocator;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use stp_wire::{Stp1Message, stp0, stp1};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Channel carrying encoded frames to the host socket's writer task.
pub type HostTx = mpsc::UnboundedSender<Vec<u8>>;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which framing the host connection currently speaks.
///
/// Transitions are monotonic: `Negotiating -> Stp0` on any non-sentinel
/// bytes, and into `Stp1` only upon the `STP/1\n` sentinel. Enabling the
/// `stp-1` pseudo-service re-enters `Negotiating` to await the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Negotiating,
    Stp0,
    Stp1,
}

/// A client-bound message in either dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeMessage {
    Stp0 { service: String, payload: String },
    Stp1(Stp1Message),
}

/// Outcome of a `get next message` poll.
#[derive(Debug, PartialEq)]
pub enum PollReply {
    Message(ScopeMessage),
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled,
    AlreadyEnabled,
    UnknownService,
    HostGone,
}

/// One entry of the service catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub enabled: bool,
}

/// The control word served to parked pollers when the host goes away.
pub const HOST_QUIT: &str = "*hostquit";

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct Poller {
    id: u64,
    tx: oneshot::Sender<ScopeMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscoveryPhase {
    NotStarted,
    Running,
    Done,
}

struct State {
    dialect: Dialect,
    services: Vec<ServiceRecord>,
    // Invariant: at most one of these two queues is non-empty.
    pending_messages: VecDeque<ScopeMessage>,
    pending_pollers: VecDeque<Poller>,
    client_id_prefix: Option<Vec<u8>>,
    host_tx: Option<HostTx>,
    next_poller_id: u64,
    schema: Option<Arc<SchemaMap>>,
    discovery: DiscoveryPhase,
}

/// The session context: shared state behind one mutex plus the tag
/// allocator for proxy-originated requests.
pub struct Session {
    state: Mutex<State>,
    pub tags: TagAllocator,
    schema_ready: watch::Sender<bool>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (schema_ready, _) = watch::channel(false);
        Session {
            state: Mutex::new(State {
                dialect: Dialect::Negotiating,
                services: Vec::new(),
                pending_messages: VecDeque::new(),
                pending_pollers: VecDeque::new(),
                client_id_prefix: None,
                host_tx: None,
                next_poller_id: 0,
                schema: None,
                discovery: DiscoveryPhase::NotStarted,
            }),
            tags: TagAllocator::new(),
            schema_ready,
        }
    }

    // -----------------------------------------------------------------------
    // Host lifecycle
    // -----------------------------------------------------------------------

    /// Register a freshly accepted host connection's write channel.
    pub async fn attach_host(&self, tx: HostTx) {
        let mut st = self.state.lock().await;
        st.host_tx = Some(tx);
        st.dialect = Dialect::Negotiating;
    }

    /// The host socket closed (or died on a framing error): reset everything.
    ///
    /// Parked pollers are served a final `*hostquit` message so no request
    /// dangles; outstanding tag slots fail their requesters.
    pub async fn host_closed(&self) {
        let pollers = {
            let mut st = self.state.lock().await;
            st.host_tx = None;
            st.dialect = Dialect::Negotiating;
            st.services.clear();
            st.client_id_prefix = None;
            st.schema = None;
            st.discovery = DiscoveryPhase::NotStarted;
            st.pending_messages.clear();
            std::mem::take(&mut st.pending_pollers)
        };
        for poller in pollers {
            let _ = poller.tx.send(ScopeMessage::Stp0 {
                service: HOST_QUIT.to_owned(),
                payload: String::new(),
            });
        }
        self.tags.clear().await;
        self.schema_ready.send_replace(false);
    }

    pub async fn dialect(&self) -> Dialect {
        self.state.lock().await.dialect
    }

    pub async fn set_dialect(&self, dialect: Dialect) {
        self.state.lock().await.dialect = dialect;
    }

    // -----------------------------------------------------------------------
    // Service registry
    // -----------------------------------------------------------------------

    /// Replace the catalog from a `*services` announcement. Every service
    /// starts disabled.
    pub async fn set_catalog(&self, names: Vec<String>) {
        let mut st = self.state.lock().await;
        st.services = names
            .into_iter()
            .map(|name| ServiceRecord {
                name,
                enabled: false,
            })
            .collect();
    }

    /// Add catalog entries learned from a `HostInfo` reply (STP/1-only hosts
    /// never send `*services`). Known names keep their enabled flag.
    pub async fn merge_catalog(&self, names: &[String]) {
        let mut st = self.state.lock().await;
        for name in names {
            if !st.services.iter().any(|s| &s.name == name) {
                st.services.push(ServiceRecord {
                    name: name.clone(),
                    enabled: false,
                });
            }
        }
    }

    pub async fn service_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .services
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub async fn catalog_is_empty(&self) -> bool {
        self.state.lock().await.services.is_empty()
    }

    /// Whether `name` appears in the catalog at all (enabled or not).
    pub async fn knows_service(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .services
            .iter()
            .any(|s| s.name == name)
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .services
            .iter()
            .any(|s| s.name == name && s.enabled)
    }

    /// Enable a service: write `*enable <name>` to the host and mark it.
    ///
    /// Names with the `stp-` prefix are version selectors rather than
    /// catalog services; enabling one re-enters `Negotiating` so the read
    /// path waits for the host's `STP/1\n` sentinel.
    pub async fn enable_service(&self, name: &str) -> EnableOutcome {
        let mut st = self.state.lock().await;
        let Some(tx) = st.host_tx.clone() else {
            return EnableOutcome::HostGone;
        };
        let is_version_selector = name.starts_with("stp-");
        match st.services.iter_mut().find(|s| s.name == name) {
            Some(record) => {
                if record.enabled {
                    warn!(service = name, "service is already enabled");
                    return EnableOutcome::AlreadyEnabled;
                }
                record.enabled = true;
            }
            None if is_version_selector => {
                st.services.push(ServiceRecord {
                    name: name.to_owned(),
                    enabled: true,
                });
            }
            None => return EnableOutcome::UnknownService,
        }
        let _ = tx.send(stp0::encode_frame(&format!("*enable {name}")));
        if is_version_selector {
            st.dialect = Dialect::Negotiating;
        }
        EnableOutcome::Enabled
    }

    // -----------------------------------------------------------------------
    // Writing to the host
    // -----------------------------------------------------------------------

    /// Write an STP/0 command (`<service> <body>` or a `*control` word).
    pub async fn send_stp0(&self, msg: &str) -> bool {
        let st = self.state.lock().await;
        match &st.host_tx {
            Some(tx) => tx.send(stp0::encode_frame(msg)).is_ok(),
            None => false,
        }
    }

    /// Encode and write an STP/1 message, stamping the captured clientID
    /// prefix (or the uuid fallback) as the identity field.
    pub async fn send_stp1(&self, msg: &Stp1Message) -> bool {
        let st = self.state.lock().await;
        let Some(tx) = &st.host_tx else {
            return false;
        };
        tx.send(stp1::encode_frame(msg, st.client_id_prefix.as_deref()))
            .is_ok()
    }

    pub async fn client_id_prefix(&self) -> Option<Vec<u8>> {
        self.state.lock().await.client_id_prefix.clone()
    }

    // -----------------------------------------------------------------------
    // Rendezvous
    // -----------------------------------------------------------------------

    /// Route one inbound host message.
    ///
    /// STP/1 messages first capture the session identity, then get offered
    /// to the tag allocator; a claimed reply never reaches a client. What is
    /// left is handed to the oldest live parked poller or buffered FIFO.
    pub async fn deliver_from_host(&self, msg: ScopeMessage) {
        let msg = match msg {
            ScopeMessage::Stp1(m) => {
                {
                    let mut st = self.state.lock().await;
                    if st.client_id_prefix.is_none() {
                        st.client_id_prefix = Some(stp_wire::client_id_field(m.client_id));
                    }
                }
                match self.tags.claim(m).await {
                    Ok(()) => return,
                    Err(unclaimed) => ScopeMessage::Stp1(unclaimed),
                }
            }
            other => other,
        };

        let mut st = self.state.lock().await;
        let mut msg = msg;
        while let Some(poller) = st.pending_pollers.pop_front() {
            match poller.tx.send(msg) {
                Ok(()) => return,
                Err(back) => {
                    // poller's request vanished before delivery; try the next
                    debug!(poller = poller.id, "dropping dead poller");
                    msg = back;
                }
            }
        }
        st.pending_messages.push_back(msg);
    }

    /// The client's long poll: pop the oldest pending message or park until
    /// one arrives or `timeout` elapses.
    pub async fn next_message(&self, timeout: Duration) -> PollReply {
        let (id, mut rx) = {
            let mut st = self.state.lock().await;
            if let Some(msg) = st.pending_messages.pop_front() {
                return PollReply::Message(msg);
            }
            if !st.pending_pollers.is_empty() {
                warn!("a poller is already parked; the proxy assumes a single client");
            }
            let (tx, rx) = oneshot::channel();
            let id = st.next_poller_id;
            st.next_poller_id += 1;
            st.pending_pollers.push_back(Poller { id, tx });
            (id, rx)
        };
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(msg)) => PollReply::Message(msg),
            Ok(Err(_)) => PollReply::Timeout,
            Err(_elapsed) => {
                let mut st = self.state.lock().await;
                st.pending_pollers.retain(|p| p.id != id);
                drop(st);
                // a delivery may have raced the deadline; it wins
                match rx.try_recv() {
                    Ok(msg) => PollReply::Message(msg),
                    Err(_) => PollReply::Timeout,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Schema discovery coordination
    // -----------------------------------------------------------------------

    /// Claim the discovery run. Exactly one caller gets `true`; everyone
    /// else should wait on [`Session::schema_ready`].
    pub(crate) async fn begin_discovery(&self) -> bool {
        let mut st = self.state.lock().await;
        match st.discovery {
            DiscoveryPhase::NotStarted => {
                st.discovery = DiscoveryPhase::Running;
                true
            }
            DiscoveryPhase::Running | DiscoveryPhase::Done => false,
        }
    }

    pub(crate) async fn discovery_done(&self) -> bool {
        self.state.lock().await.discovery == DiscoveryPhase::Done
    }

    /// Publish the discovery result (possibly empty on failure) and release
    /// every parked `/services` request.
    pub(crate) async fn finish_discovery(&self, schema: Option<SchemaMap>) {
        {
            let mut st = self.state.lock().await;
            if st.discovery != DiscoveryPhase::Running {
                // the session reset underneath the discovery task; the next
                // host starts introspection from scratch
                return;
            }
            st.discovery = DiscoveryPhase::Done;
            if let Some(map) = schema {
                st.schema = Some(Arc::new(map));
            }
        }
        self.schema_ready.send_replace(true);
    }

    /// Watch channel that flips to `true` when discovery completes.
    pub fn schema_ready(&self) -> watch::Receiver<bool> {
        self.schema_ready.subscribe()
    }

    /// The discovered schema, if discovery has completed successfully.
    pub async fn schema(&self) -> Option<Arc<SchemaMap>> {
        self.state.lock().await.schema.clone()
    }
}

//! Self-describing schema discovery.
//!
//! After STP/1 negotiation the host can be asked to describe itself: which
//! commands and events each service has, the message shape behind each, and
//! (hosts with scope minor version >= 1) the enum tables. The proxy runs the
//! introspection once, when the client first requests the service list, and
//! keeps the result for pretty-printing payloads.
//!
//! Every request carries a tag from the session's allocator, so replies are
//! routed here and never reach the client poller stream.

mod parse;

use crate::session::Session;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stp_wire::{Stp1Message, Stp1MessageType};
use tokio::sync::oneshot;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Schema tree
// ---------------------------------------------------------------------------

/// Discovered schemas keyed by service name.
pub type SchemaMap = HashMap<String, ServiceSchema>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Required,
    Optional,
    Repeated,
}

/// An enum table: value names indexed by number (gaps render empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

/// A field's submessage, or a marker for a self-reference.
///
/// Message definitions may reference themselves; the tree stays acyclic by
/// interning the first occurrence of each field name and recording re-entry
/// as `Recursive(name)`. The renderer substitutes the interned node.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMessage {
    Fields(Vec<FieldDef>),
    Recursive(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: u32,
    pub quantifier: Quantifier,
    pub is_union: bool,
    pub message_name: Option<String>,
    pub message: Option<FieldMessage>,
    pub enum_def: Option<EnumDef>,
}

/// One command or event: its name and the field lists keyed by message type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandDef {
    pub name: String,
    pub command: Option<Vec<FieldDef>>,
    pub response: Option<Vec<FieldDef>>,
    pub event: Option<Vec<FieldDef>>,
}

impl CommandDef {
    /// The field list describing a payload of the given message type.
    pub fn fields_for(&self, msg_type: Stp1MessageType) -> Option<&[FieldDef]> {
        match msg_type {
            Stp1MessageType::Command => self.command.as_deref(),
            Stp1MessageType::Response => self.response.as_deref(),
            Stp1MessageType::Event => self.event.as_deref(),
            Stp1MessageType::Error => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSchema {
    pub commands_by_number: HashMap<u32, CommandDef>,
    pub events_by_number: HashMap<u32, CommandDef>,
}

impl ServiceSchema {
    /// Look up a command id across both tables (events answer for event
    /// messages, commands for everything else).
    pub fn lookup(&self, msg_type: Stp1MessageType, command_id: u32) -> Option<&CommandDef> {
        match msg_type {
            Stp1MessageType::Event => self.events_by_number.get(&command_id),
            _ => self.commands_by_number.get(&command_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Introspection commands
// ---------------------------------------------------------------------------

const SCOPE_SERVICE: &str = "scope";
const COMMAND_INFO: u32 = 7;
const HOST_INFO: u32 = 10;
const MESSAGE_INFO: u32 = 11;
const ENUM_INFO: u32 = 12;

/// How long to wait for one introspection reply before giving up.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on how long a `/services` request waits for discovery.
const DISCOVERY_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("host connection lost")]
    HostGone,
    #[error("no reply to scope command {command} within the reply deadline")]
    ReplyTimeout { command: u32 },
    #[error("scope command {command} failed with status {status}")]
    CommandFailed { command: u32, status: u32 },
    #[error("malformed introspection payload: {0}")]
    BadPayload(String),
}

/// Make sure discovery has run (or is running) and wait for it to finish.
///
/// Exactly one caller performs the introspection, on its own task so an
/// abandoned HTTP request cannot strand it half-way; every other caller
/// parks on the ready watch. Failure is not fatal to the session: the
/// service list is still served, just without a schema.
pub async fn ensure_schema(session: &Arc<Session>) {
    if session.discovery_done().await {
        return;
    }
    if session.begin_discovery().await {
        let owner = Arc::clone(session);
        tokio::spawn(async move {
            match discover(&owner).await {
                Ok(map) => {
                    debug!(services = map.len(), "schema discovery complete");
                    owner.finish_discovery(Some(map)).await;
                }
                Err(e) => {
                    warn!(error = %e, "schema discovery failed");
                    owner.finish_discovery(None).await;
                }
            }
        });
    }
    let mut ready = session.schema_ready();
    let _ = tokio::time::timeout(DISCOVERY_WAIT, async {
        while !*ready.borrow_and_update() {
            if ready.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
}

/// Run the full introspection sequence and build the schema tree.
async fn discover(session: &Session) -> Result<SchemaMap, DiscoveryError> {
    let host_info = introspect(session, HOST_INFO, "[]".to_owned()).await?;
    let info: Value = serde_json::from_slice(&host_info.payload)
        .map_err(|e| DiscoveryError::BadPayload(e.to_string()))?;

    // info[5] is the advertised service list: [[name, version], ...]
    let mut minor_version = 0u32;
    let mut advertised = Vec::new();
    if let Some(list) = info.get(5).and_then(Value::as_array) {
        for entry in list {
            let Some(name) = entry.get(0).and_then(Value::as_str) else {
                continue;
            };
            advertised.push(name.to_owned());
            if name == SCOPE_SERVICE {
                if let Some(version) = entry.get(1).and_then(Value::as_str) {
                    minor_version = version
                        .split('.')
                        .nth(1)
                        .and_then(|m| m.parse().ok())
                        .unwrap_or(0);
                }
            }
        }
    }
    // STP/1-only hosts never send *services; the catalog comes from here.
    session.merge_catalog(&advertised).await;

    let services: Vec<String> = session
        .service_names()
        .await
        .into_iter()
        .filter(|name| !name.starts_with("core-") && !name.starts_with("stp-"))
        .collect();

    let with_enums = minor_version >= 1;
    let mut enums_by_service: HashMap<String, Vec<Value>> = HashMap::new();
    if with_enums {
        for service in &services {
            let reply =
                introspect(session, ENUM_INFO, format!("[\"{service}\", [], 1]")).await?;
            let parsed: Value = serde_json::from_slice(&reply.payload).unwrap_or(Value::Null);
            let enums = parsed
                .get(0)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            enums_by_service.insert(service.clone(), enums);
        }
    }

    let mut schema = SchemaMap::new();
    let empty = Vec::new();
    for service in &services {
        let commands =
            introspect(session, COMMAND_INFO, format!("[\"{service}\"]")).await?;
        let message_payload = if with_enums {
            format!("[\"{service}\", [], 1, 1, 1, 1]")
        } else {
            format!("[\"{service}\", [], 1, 1]")
        };
        let messages = introspect(session, MESSAGE_INFO, message_payload).await?;

        let raw_commands: Value = serde_json::from_slice(&commands.payload)
            .map_err(|e| DiscoveryError::BadPayload(e.to_string()))?;
        let raw_messages: Value = serde_json::from_slice(&messages.payload)
            .map_err(|e| DiscoveryError::BadPayload(e.to_string()))?;
        let enums = enums_by_service.get(service).unwrap_or(&empty);

        schema.insert(
            service.clone(),
            parse::parse_service_schema(&raw_commands, &raw_messages, enums),
        );
    }
    Ok(schema)
}

/// Send one tagged introspection command and await its reply.
async fn introspect(
    session: &Session,
    command_id: u32,
    payload: String,
) -> Result<Stp1Message, DiscoveryError> {
    let (tag, rx) = session.tags.register().await;
    let msg = Stp1Message::command(SCOPE_SERVICE, command_id, tag, payload.into_bytes());
    if !session.send_stp1(&msg).await {
        session.tags.cancel(tag).await;
        return Err(DiscoveryError::HostGone);
    }
    let reply = await_reply(session, tag, rx, command_id).await?;
    if reply.msg_type == Stp1MessageType::Error || reply.status != 0 {
        return Err(DiscoveryError::CommandFailed {
            command: command_id,
            status: reply.status,
        });
    }
    Ok(reply)
}

async fn await_reply(
    session: &Session,
    tag: u32,
    rx: oneshot::Receiver<Stp1Message>,
    command_id: u32,
) -> Result<Stp1Message, DiscoveryError> {
    match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_)) => Err(DiscoveryError::HostGone),
        Err(_) => {
            session.tags.cancel(tag).await;
            Err(DiscoveryError::ReplyTimeout {
                command: command_id,
            })
        }
    }
}

//! scope-core: session semantics of the scope proxy.
//!
//! Everything between the wire (stp-wire) and the transports: the session
//! context with its rendezvous queues and service registry, the tag
//! allocator for proxy-originated requests, schema discovery, and the
//! schema-driven payload renderer.
//!
//! Nothing here owns a socket. The host connection hands bytes in through
//! [`Session::deliver_from_host`] and receives bytes to write through the
//! channel registered with [`Session::attach_host`], so the whole crate is
//! exercisable from plain async tests.

pub mod pretty;
pub mod schema;
pub mod session;
pub mod tags;

pub use schema::{CommandDef, EnumDef, FieldDef, FieldMessage, Quantifier, SchemaMap, ServiceSchema};
pub use session::{Dialect, EnableOutcome, HostTx, PollReply, ScopeMessage, Session, ServiceRecord};
pub use tags::TagAllocator;

//! # umlsync-core
//!
//! Room registry and event routing for the umlsync diagram relay.
//!
//! This crate provides the stateful part of the relay:
//!
//! - **Room** - Broadcast group plus the last known diagram text
//! - **SessionRegistry** - Rooms and the reverse membership index
//! - **ConnectionHub** - Outbound queue per connection
//! - **EventRouter** - Applies client events and decides who hears about them
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐
//! │  Connection │────▶│ EventRouter │────▶│ SessionRegistry │
//! └─────────────┘     └─────────────┘     └─────────────────┘
//!        ▲                   │
//!        │                   ▼
//!        │           ┌───────────────┐
//!        └───────────│ ConnectionHub │
//!                    └───────────────┘
//! ```
//!
//! Both namespaces share one `EventRouter`, so an edit made through either
//! endpoint reaches subscribers on the other.

pub mod connection;
pub mod hub;
pub mod namespace;
pub mod registry;
pub mod room;
pub mod router;

pub use connection::ConnectionId;
pub use hub::{ConnectionHub, Outbound};
pub use namespace::Namespace;
pub use registry::SessionRegistry;
pub use room::{Room, RoomId};
pub use router::{EventRouter, RelayError, RelayStats};

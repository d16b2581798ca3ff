//! # umlsync-protocol
//!
//! Wire protocol definitions for the umlsync diagram relay.
//!
//! Every WebSocket message carries one JSON envelope:
//!
//! ```text
//! {"event": "diagram_update", "data": {"room": "diag1", "text": "@startuml", "cursor": 9}}
//! ```
//!
//! ## Events
//!
//! - `join` / `leave` - Room membership
//! - `diagram_update` - Full diagram text, last write wins
//! - `cursor_update` - Ephemeral cursor position
//! - `connected` / `user_joined` / `user_left` / `error` - Server notifications
//!
//! ## Example
//!
//! ```rust
//! use umlsync_protocol::{codec, ClientEvent};
//!
//! let event = codec::decode(r#"{"event": "join", "data": {}}"#).unwrap();
//! assert_eq!(event, ClientEvent::join("default"));
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, decode_bytes, decode_server, encode, ProtocolError};
pub use events::{ClientEvent, ServerEvent, DEFAULT_ROOM, INTERNAL_ERROR_MESSAGE};

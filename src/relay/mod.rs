//! # Call-Session Bridge Relay
//!
//! Core of the dialer backend: accepts two independently-arriving WebSocket
//! legs per call - the voice provider's media leg and the browser's media
//! leg - pairs them under a shared call ID, and forwards audio and control
//! messages between them for the lifetime of the call.
//!
//! ## Key Components:
//! - **Session Registry**: which legs belong to which call, per-call locking
//! - **Codec Adapter**: float <-> PCM16 conversion at the browser boundary
//! - **Completion Tracker**: terminal call IDs, for idempotent teardown
//!
//! The connection handling itself (upgrade, read loop, cascade teardown)
//! lives in `src/websocket.rs`; everything here is plain shared state and
//! pure functions, testable without a running server.

pub mod codec;
pub mod completion;
pub mod registry;

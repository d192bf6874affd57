//! Wire contract between the canvas editor UI and its backend logic process.
//!
//! The UI never talks to backend services directly; every interaction is a
//! request/response exchange over a single framed byte stream. This crate
//! holds everything both ends must agree on:
//!
//! - **Envelopes** ([`RequestEnvelope`], [`BatchEnvelope`], [`ResponseEnvelope`],
//!   [`ReadySignal`]) and the [`Outbound`]/[`Inbound`] message unions
//! - **[`Method`]**, the sum type of methods the UI models, with an
//!   [`Method::Other`] fallback for methods it does not know yet
//! - **[`WireError`]**, the structured error carried in a response
//! - **Backend traits** describing the services reachable through the bridge
//! - **[`StubBackend`]** returning `NOT_IMPLEMENTED` for every method
//! - **[`codec`]**, the length-prefixed msgpack framing
//!
//! # Trait hierarchy
//!
//! - [`BackendTemplates`]: template storage and field discovery
//! - [`BackendPlugins`]: plugin lifecycle
//! - [`BackendShortcuts`]: keyboard shortcut management
//! - [`BackendExtensions`]: methods outside the modelled set
//! - [`Backend`]: composite (auto-implemented for all four)

pub mod codec;
pub mod error;
pub mod method;
pub mod traits;
pub mod types;

pub use error::{code as error_code, WireError};
pub use method::Method;
pub use traits::{Backend, BackendExtensions, BackendPlugins, BackendShortcuts, BackendTemplates};
pub use types::*;

mod stub;
pub use stub::StubBackend;

/// Reserved health-probe method. Takes no params, answered with a trivial success.
pub const PING_METHOD: &str = "__ping__";

//! Backend-side half of the canvas bridge protocol.
//!
//! [`serve`] exposes any [`canvas_ipc::Backend`] over a framed byte stream:
//! it announces readiness, then answers every request (including each member
//! of a batch) on its own task, so responses leave in completion order rather
//! than request order. [`dispatch`] is the per-request router and can be used
//! directly by backends that own their transport.

mod dispatch;
mod serve;

pub use dispatch::dispatch;
pub use serve::serve;

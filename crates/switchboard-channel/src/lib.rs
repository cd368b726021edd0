//! The channel collaborator boundary for the switchboard fabric.
//!
//! The underlying transport is host-provided; this crate pins down the shape
//! the fabric relies on — a named duplex [`ChannelHandle`] with send,
//! receive, close, and close-notification — plus the [`ChannelOpener`] seam
//! endpoints reconnect through, an in-memory host for tests and
//! single-process embedders, and the shared [`ShutdownToken`].

pub mod error;
pub mod handle;
pub mod memory;
pub mod opener;
pub mod shutdown;

pub use error::ChannelError;
pub use handle::{ChannelHandle, ChannelMeta, pair};
pub use memory::MemoryHost;
pub use opener::ChannelOpener;
pub use shutdown::ShutdownToken;

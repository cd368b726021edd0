//! The seam through which endpoints open (and re-open) channels.

use crate::error::ChannelError;
use crate::handle::{ChannelHandle, ChannelMeta};

/// Opens named channels toward a hub.
///
/// The host environment supplies the real transport; the fabric only needs
/// this one operation, and the endpoint's reconnection manager retries
/// through it. Implementations must be cheap to call repeatedly.
pub trait ChannelOpener: Send + Sync {
    fn open(
        &self,
        name: &str,
        meta: ChannelMeta,
    ) -> impl Future<Output = Result<ChannelHandle, ChannelError>> + Send;
}

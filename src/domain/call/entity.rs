//! Call entities

use crate::domain::shared::value_objects::StreamSid;
use tokio::sync::watch;

/// Live media stream attached to exactly one call session
///
/// The handle owns the shutdown signal of the stream's forwarding loop.
/// Closing the handle (or dropping it together with its session) makes the
/// loop observe the signal and tear the socket down.
#[derive(Debug)]
pub struct MediaStreamHandle {
    stream_sid: StreamSid,
    shutdown: watch::Sender<bool>,
}

impl MediaStreamHandle {
    /// Create a handle and the receiver the forwarding loop listens on
    pub fn new(stream_sid: StreamSid) -> (Self, watch::Receiver<bool>) {
        let (shutdown, rx) = watch::channel(false);
        (Self { stream_sid, shutdown }, rx)
    }

    pub fn stream_sid(&self) -> &StreamSid {
        &self.stream_sid
    }

    /// Signal the forwarding loop to stop
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for MediaStreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

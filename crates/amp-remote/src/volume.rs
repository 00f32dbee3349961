//! Volume control with at most one command in flight.
//!
//! The controller is a plain state machine; the core drives the round trip:
//!
//! ```text
//!   begin_set / begin_adjust ──▶ pending = true, request returned
//!        (core spawns HTTP call)
//!   finish(reply)            ──▶ adopt server value or keep old one
//!        (core waits settle_delay)
//!   release()                ──▶ pending = false
//! ```
//!
//! Server pushes (`on_pushed`) overwrite the volume at any time and never
//! touch the pending flag.
//!
//! Every command and every push bumps `epoch`.  A `get_volume` read is
//! tagged with the epoch it was issued at and only applies if nothing has
//! happened since.

use amp_proto::protocol::{ApiStatus, VolumeReply};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ApiError, VolumeError};

pub const VOLUME_MIN: i32 = 0;
pub const VOLUME_MAX: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VolumeState {
    pub current_volume: u8,
    pub pending_request: bool,
}

/// Outbound volume command produced by `begin_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRequest {
    Set { volume: u8, show_bar: bool },
    /// Delta is forwarded as-is; the backend clamps.
    Adjust { delta: i32, show_bar: bool },
}

pub fn clamp_volume(value: i64) -> u8 {
    value.clamp(VOLUME_MIN as i64, VOLUME_MAX as i64) as u8
}

#[derive(Debug)]
pub struct VolumeController {
    state: VolumeState,
    show_bar: bool,
    epoch: u64,
}

impl VolumeController {
    pub fn new(show_bar: bool) -> Self {
        Self {
            state: VolumeState::default(),
            show_bar,
            epoch: 0,
        }
    }

    pub fn state(&self) -> VolumeState {
        self.state
    }

    pub fn current(&self) -> u8 {
        self.state.current_volume
    }

    pub fn is_pending(&self) -> bool {
        self.state.pending_request
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn begin_set(&mut self, target: i32) -> Result<VolumeRequest, VolumeError> {
        self.claim()?;
        let volume = clamp_volume(target as i64);
        if volume as i32 != target {
            debug!("volume: clamped {} → {}", target, volume);
        }
        Ok(VolumeRequest::Set {
            volume,
            show_bar: self.show_bar,
        })
    }

    pub fn begin_adjust(&mut self, delta: i32) -> Result<VolumeRequest, VolumeError> {
        self.claim()?;
        Ok(VolumeRequest::Adjust {
            delta,
            show_bar: self.show_bar,
        })
    }

    fn claim(&mut self) -> Result<(), VolumeError> {
        if self.state.pending_request {
            debug!("volume: rejecting request, one already pending");
            return Err(VolumeError::Busy);
        }
        self.state.pending_request = true;
        self.epoch += 1;
        Ok(())
    }

    /// Apply the outcome of the in-flight request.  The pending flag stays
    /// set until `release`.
    pub fn finish(&mut self, outcome: Result<VolumeReply, ApiError>) -> Result<u8, VolumeError> {
        if !self.state.pending_request {
            warn!("volume: reply arrived with nothing pending, discarding");
            return Err(VolumeError::Stale);
        }
        match outcome {
            Ok(reply) if reply.status == ApiStatus::Success => {
                let volume = clamp_volume(reply.volume);
                info!("volume: confirmed {}", volume);
                self.state.current_volume = volume;
                Ok(volume)
            }
            Ok(_) => {
                warn!("volume: backend reported error, keeping {}", self.state.current_volume);
                Err(VolumeError::Api(ApiError::Reported))
            }
            Err(e) => {
                warn!("volume: request failed: {}", e);
                Err(VolumeError::Api(e))
            }
        }
    }

    pub fn release(&mut self) {
        self.state.pending_request = false;
    }

    /// Server-pushed volume change.  Returns whether the indicator should
    /// be shown.
    pub fn on_pushed(&mut self, volume: i64, show_bar: bool) -> bool {
        let volume = clamp_volume(volume);
        if volume != self.state.current_volume {
            debug!("volume: pushed {} → {}", self.state.current_volume, volume);
        }
        self.state.current_volume = volume;
        self.epoch += 1;
        show_bar
    }

    /// Result of a `get_volume` read issued at `issued_at`.  Ignored while a
    /// command is pending or once any command or push has landed since the
    /// read went out.  Returns whether the reply was adopted.
    pub fn on_refreshed(&mut self, reply: VolumeReply, issued_at: u64) -> bool {
        if self.state.pending_request {
            debug!("volume: ignoring refresh while a request is pending");
            return false;
        }
        if self.epoch != issued_at {
            debug!("volume: ignoring refresh from epoch {} (now {})", issued_at, self.epoch);
            return false;
        }
        if reply.status != ApiStatus::Success {
            return false;
        }
        self.state.current_volume = clamp_volume(reply.volume);
        true
    }
}

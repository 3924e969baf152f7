//! Controller construction parameters.
//!
//! Everything here is fixed for the lifetime of a [`Controller`](crate::Controller):
//! synchronizer depths, the timing registers' reset defaults and the read
//! settle window. Only `pulse_width` can change at run time (SET_TIMING),
//! and that change lives in the controller registers, not here.

use serde::{Serialize, Deserialize};

use crate::sync::SyncChain;
use crate::{
    CS_SYNC_STAGES, FORM_WIDTH_DEFAULT, PULSE_WIDTH_DEFAULT, READ_SETTLE_TICKS, SCK_SYNC_STAGES,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Delay stages on the serial clock (the data line follows the same depth)
    pub sck_sync_stages: u8,
    /// Delay stages on chip-select
    pub cs_sync_stages: u8,
    /// Reset value of the programming pulse width register
    pub pulse_width: u16,
    /// Reset value of the forming pulse width (no command changes it)
    pub form_width: u16,
    /// Ticks a READ_CELL row is driven before column sense is sampled
    pub read_settle_ticks: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            sck_sync_stages: SCK_SYNC_STAGES,
            cs_sync_stages: CS_SYNC_STAGES,
            pulse_width: PULSE_WIDTH_DEFAULT,
            form_width: FORM_WIDTH_DEFAULT,
            read_settle_ticks: READ_SETTLE_TICKS,
        }
    }
}

impl ControllerConfig {
    /// Shortest legal synchronizers: every edge acted on one tick after it happens.
    pub fn collapsed() -> Self {
        ControllerConfig {
            sck_sync_stages: SyncChain::MIN_DEPTH,
            cs_sync_stages: SyncChain::MIN_DEPTH,
            ..Default::default()
        }
    }

    pub fn with_sync_stages(mut self, sck: u8, cs: u8) -> Self {
        self.sck_sync_stages = sck;
        self.cs_sync_stages = cs;
        self.normalized()
    }

    /// Clamp synchronizer depths into the supported range.
    pub fn normalized(mut self) -> Self {
        self.sck_sync_stages = SyncChain::clamp_depth(self.sck_sync_stages);
        self.cs_sync_stages = SyncChain::clamp_depth(self.cs_sync_stages);
        self
    }

    /// Ticks between a clock transition on the pin and the logic reacting to it.
    pub fn sck_latency(&self) -> u32 {
        SyncChain::clamp_depth(self.sck_sync_stages) as u32 - 1
    }

    pub fn cs_latency(&self) -> u32 {
        SyncChain::clamp_depth(self.cs_sync_stages) as u32 - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ControllerConfig::default();
        assert_eq!(c.sck_sync_stages, 3);
        assert_eq!(c.cs_sync_stages, 2);
        assert_eq!(c.pulse_width, 1000);
        assert_eq!(c.form_width, 5000);
        assert_eq!(c.read_settle_ticks, 10);
        assert_eq!(c.sck_latency(), 2);
        assert_eq!(c.cs_latency(), 1);
    }

    #[test]
    fn test_stage_clamp() {
        let c = ControllerConfig::default().with_sync_stages(0, 20);
        assert_eq!(c.sck_sync_stages, SyncChain::MIN_DEPTH);
        assert_eq!(c.cs_sync_stages, SyncChain::MAX_DEPTH);
        assert_eq!(ControllerConfig::collapsed().sck_latency(), 1);
    }
}

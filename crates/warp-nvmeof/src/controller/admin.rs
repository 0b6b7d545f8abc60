//! Admin queue commands

use tracing::{debug, trace};

use super::{Controller, NvmeRequest, Slot};
use crate::buffers::Pooled;
use crate::error::{NvmeOfResult, NvmeStatus};
use crate::protocol::{AdminOpcode, FeatureId, LogPageRequest};

impl Controller {
    /// Handle an admin or fabrics capsule inline and queue its completion
    pub(super) fn dispatch_admin(&mut self, mut slot: Slot) -> NvmeOfResult<()> {
        let opcode = slot.capsule.opcode;
        match AdminOpcode::from_raw(opcode) {
            Some(AdminOpcode::Fabric) => self.handle_fabric(&mut slot)?,
            Some(AdminOpcode::Identify) => self.identify(&mut slot),
            Some(AdminOpcode::GetLogPage) => self.get_log_page(&mut slot),
            Some(AdminOpcode::SetFeatures) => self.set_features(&mut slot),
            Some(AdminOpcode::GetFeatures) => self.get_features(&mut slot),
            Some(AdminOpcode::AsyncEventRequest) => slot.response.no_reply = true,
            Some(AdminOpcode::KeepAlive) => trace!("Keep alive from controller {}", self.controller_id),
            Some(AdminOpcode::SecurityReceive) => slot.set_status(NvmeStatus::InvalidField),
            _ => {
                debug!("Unsupported admin opcode {:#04x}", opcode);
                slot.set_status(NvmeStatus::InvalidOpcode);
            }
        }
        self.stamp(&mut slot);
        self.finish(slot);
        Ok(())
    }

    fn identify(&self, request: &mut NvmeRequest) {
        let cns = (request.capsule.d10 & 0xFF) as u8;
        match self.subsystem.identify(self.controller_id, cns) {
            Ok(data) => request.response.data.push(Pooled::standalone(data)),
            Err(e) => {
                debug!("Identify cns={:#04x} failed: {}", cns, e);
                request.set_status(NvmeStatus::InvalidField);
            }
        }
    }

    fn get_log_page(&self, request: &mut NvmeRequest) {
        let log = LogPageRequest::from_command(&request.capsule);
        if log.length > self.buffers.buffer_size() {
            debug!("Log page {:#04x} request of {} bytes too large", log.page_id, log.length);
            request.set_status(NvmeStatus::InvalidField);
            return;
        }
        match self
            .subsystem
            .get_log_page(log.page_id, log.offset, log.length)
        {
            Ok(page) => request.response.data.push(Pooled::standalone(page)),
            Err(e) => {
                debug!("Log page {:#04x} failed: {}", log.page_id, e);
                request.set_status(NvmeStatus::InvalidField);
            }
        }
    }

    fn set_features(&mut self, request: &mut NvmeRequest) {
        let fid = (request.capsule.d10 & 0xFF) as u8;
        let value = request.capsule.d11;
        match FeatureId::from_raw(fid) {
            Some(FeatureId::NumberOfQueues) => {
                // NCQR:NSQR, granted as asked
                self.queue_count = value;
                request.response.capsule.set_result_u32(self.queue_count);
            }
            Some(FeatureId::AsyncEventConfig) => {
                self.async_event_config = value;
                request.response.capsule.set_result_u32(value);
            }
            _ => {
                debug!("Set Features {:#04x} not changeable", fid);
                request.set_status(NvmeStatus::FeatureNotChangeable);
            }
        }
    }

    fn get_features(&self, request: &mut NvmeRequest) {
        let fid = (request.capsule.d10 & 0xFF) as u8;
        let value = match FeatureId::from_raw(fid) {
            Some(FeatureId::KeepAliveTimer) => self.config.keep_alive_ms,
            Some(FeatureId::AsyncEventConfig) => self.async_event_config,
            Some(FeatureId::NumberOfQueues) => self.queue_count,
            None => {
                debug!("Get Features {:#04x} not supported", fid);
                request.set_status(NvmeStatus::InvalidField);
                return;
            }
        };
        request.response.capsule.set_result_u32(value);
    }
}

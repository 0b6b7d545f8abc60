//! Fabrics commands: Connect and the property registers

use tracing::{debug, info, warn};

use super::{Controller, NvmeRequest};
use crate::codec::WireRecord;
use crate::error::{NvmeOfError, NvmeOfResult, NvmeStatus};
use crate::protocol::fabric::{CONNECT_DATA_LEN, CONNECT_DATA_SUBNQN_OFFSET};
use crate::protocol::{
    ConnectCommand, ConnectData, FabricCommandType, Property, CC_ENABLE, CC_SHUTDOWN_MASK,
    CONTROLLER_CAPABILITIES, CSTS_READY, CSTS_SHUTDOWN_OCCURRING, FLOW_CONTROL_DISABLED,
    NVME_VERSION,
};
use crate::server::ConnectRefusal;

/// Connect result IATTR: the invalid parameter lives in the connect data
const INVALID_PARAMETER_IN_DATA: u64 = 1 << 16;

impl Controller {
    pub(super) fn handle_fabric(&mut self, request: &mut NvmeRequest) -> NvmeOfResult<()> {
        match request.capsule.fabric_type() {
            Some(FabricCommandType::Connect) => self.connect(request)?,
            Some(FabricCommandType::PropertyGet) => self.property_get(request),
            Some(FabricCommandType::PropertySet) => self.property_set(request),
            Some(FabricCommandType::Disconnect) => {
                debug!("Disconnect requested on qid={}", self.queue_id);
            }
            Some(FabricCommandType::AuthenticationReceive) => {}
            _ => {
                debug!("Unsupported fabrics command {:#04x}", request.capsule.fctype);
                request.set_status(NvmeStatus::InvalidField);
            }
        }
        Ok(())
    }

    fn connect(&mut self, request: &mut NvmeRequest) -> NvmeOfResult<()> {
        let command: ConnectCommand = request.capsule.reinterpret()?;
        let payload = request
            .payload
            .take()
            .ok_or_else(|| NvmeOfError::Protocol("Connect without connect data".into()))?;
        if payload.len() < CONNECT_DATA_LEN {
            return Err(NvmeOfError::Protocol(format!(
                "connect data of {} bytes, expected {}",
                payload.len(),
                CONNECT_DATA_LEN
            )));
        }
        let data = ConnectData::decode(&payload[..])?;
        drop(payload);

        let depth = command.depth();
        let capacity = self.requests.capacity();
        if depth > capacity {
            return Err(NvmeOfError::Protocol(format!(
                "queue depth {} exceeds capacity {}",
                depth, capacity
            )));
        }

        let binding = match self.registry.bind(self.session, &data, command.queue_id) {
            Ok(binding) => binding,
            Err(ConnectRefusal::UnknownSubsystem) => {
                warn!("Connect to unknown subsystem {}", data.subsystem_nqn);
                request.set_status(NvmeStatus::NamespaceNotReady);
                request
                    .response
                    .capsule
                    .set_result_u64(CONNECT_DATA_SUBNQN_OFFSET | INVALID_PARAMETER_IN_DATA);
                return Ok(());
            }
            Err(ConnectRefusal::ControllerIdsExhausted) => {
                warn!("No controller ID left for {}", data.host_nqn);
                request.set_status(NvmeStatus::InternalError);
                return Ok(());
            }
        };

        self.subsystem = binding.subsystem;
        self.controller_id = binding.controller_id;
        self.queue_id = command.queue_id;
        self.queue_depth = depth;
        self.sqhd = 0;
        self.flow_control_disabled = command.cattr & FLOW_CONTROL_DISABLED != 0;
        self.park_slots(capacity - depth);

        request.response.capsule.queue_id = command.queue_id;
        request
            .response
            .capsule
            .set_result_u32(u32::from(binding.controller_id));

        info!(
            "Controller {} connected: subsystem={}, host={}, qid={}, depth={}, sqfc={}",
            self.controller_id,
            data.subsystem_nqn,
            data.host_nqn,
            self.queue_id,
            depth,
            !self.flow_control_disabled
        );
        Ok(())
    }

    fn property_get(&self, request: &mut NvmeRequest) {
        let offset = request.capsule.d11;
        let value = match Property::from_raw(offset) {
            Some(Property::Capabilities) => {
                CONTROLLER_CAPABILITIES & !0xFFFF | (self.requests.capacity() as u64 - 1)
            }
            Some(Property::Version) => u64::from(NVME_VERSION),
            Some(Property::Configuration) => u64::from(self.configuration),
            Some(Property::Status) => u64::from(self.status),
            Some(Property::SubsystemReset) => 0,
            None => {
                debug!("PropertyGet of unknown offset {:#x}", offset);
                request.set_status(NvmeStatus::InvalidField);
                return;
            }
        };
        request.response.capsule.set_result_u64(value);
    }

    fn property_set(&mut self, request: &mut NvmeRequest) {
        let offset = request.capsule.d11;
        let value = request.capsule.d12;
        match Property::from_raw(offset) {
            Some(Property::Configuration) => {
                self.configuration = value;
                if value & CC_SHUTDOWN_MASK != 0 {
                    self.status |= CSTS_SHUTDOWN_OCCURRING;
                    self.status &= !CSTS_READY;
                    info!("Controller {} shutting down", self.controller_id);
                } else if self.status == 0 && value & CC_ENABLE != 0 {
                    self.status |= CSTS_READY;
                    debug!("Controller {} ready", self.controller_id);
                }
            }
            _ => {
                debug!("PropertySet of unsupported offset {:#x}", offset);
                request.set_status(NvmeStatus::InvalidField);
            }
        }
    }
}

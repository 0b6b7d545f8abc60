//! Storage backed NVM subsystem exposing one namespace

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{Subsystem, SubsystemKind};
use crate::codec::WireRecord;
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::protocol::identify::{IDENTIFY_DATA_LEN, LBAF_512, NIDT_UUID};
use crate::protocol::log_page::{ANA_OPTIMIZED, COMMAND_SUPPORTED};
use crate::protocol::{
    ActiveNamespaceList, AdminOpcode, AnaGroupDescriptor, AnaLog, CommandsSupportedLog,
    IdentifyCns, IdentifyController, IdentifyNamespace, IoOpcode, LogPageId, NamespaceDescriptor,
    BLOCK_SIZE, MAX_COMMANDS, NVME_VERSION,
};
use crate::target::{IoRequest, KeyValue, QueueError, Target};
use crate::validate_nqn;

/// Namespaces per subsystem
pub const NAMESPACE_COUNT: u32 = 1;

/// Largest in-capsule data the controller accepts
pub const MAX_DATA_SIZE: u32 = 65536;

/// IOCCSZ: command capsule size in 16-byte units (64-byte SQE + data)
pub const IO_COMMAND_CAPSULE_SIZE: u32 = (64 + MAX_DATA_SIZE) / 16;

/// Default model number
pub const DEFAULT_MODEL: &str = "WARP NVMe-oF Target";

/// Power state descriptor 0
const POWER_STATE_0: [u8; 32] = [
    0xC4, 0x09, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// An NVM subsystem with one namespace backed by a [`Target`]
pub struct TargetSubsystem {
    /// Subsystem NQN
    nqn: String,

    /// Namespace UUID
    uuid: Uuid,

    /// Model number
    model: String,

    /// Serial number
    serial: String,

    /// Firmware revision
    firmware: String,

    /// Backing store
    target: Arc<dyn Target>,
}

impl TargetSubsystem {
    /// Subsystem `nqn` backed by `target`, with a random namespace UUID
    pub fn new(nqn: impl Into<String>, target: Arc<dyn Target>) -> NvmeOfResult<Self> {
        let nqn = nqn.into();
        if !validate_nqn(&nqn) {
            return Err(NvmeOfError::InvalidNqn(nqn));
        }
        let uuid = Uuid::new_v4();
        let serial = uuid.simple().to_string()[..20].to_string();

        info!("Created subsystem: nqn={}", nqn);

        Ok(Self {
            nqn,
            uuid,
            model: DEFAULT_MODEL.to_string(),
            serial,
            firmware: env!("CARGO_PKG_VERSION").to_string(),
            target,
        })
    }

    /// Set the model number
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the serial number
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    /// Set the firmware revision
    pub fn with_firmware(mut self, firmware: impl Into<String>) -> Self {
        self.firmware = firmware.into();
        self
    }

    /// Set the namespace UUID
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Backing store
    pub fn target(&self) -> &Arc<dyn Target> {
        &self.target
    }

    fn identify_namespace(&self) -> IdentifyNamespace {
        let size = self.target.size();
        let blocks = size / BLOCK_SIZE as u64;
        let mut lbaf = [0u32; 16];
        lbaf[0] = LBAF_512;
        IdentifyNamespace {
            nsze: blocks,
            ncap: blocks,
            nuse: blocks,
            nmic: 0x1,
            rescap: 0xFF,
            fpi: 0x80,
            anagrpid: 1,
            nvmcap: [size, 0],
            lbaf,
            ..Default::default()
        }
    }

    fn identify_controller(&self, cntlid: u16) -> IdentifyController {
        IdentifyController {
            vid: 0x144D,
            ssvid: 0x144D,
            serial_number: self.serial.clone(),
            model_number: self.model.clone(),
            firmware_revision: self.firmware.clone(),
            rab: 6,
            ieee_oui: [0x38, 0x25, 0x00],
            // multi-port, multi-controller, ANA reporting
            cmic: 0xB,
            // 2^4 minimum pages
            mdts: 4,
            cntlid,
            version: NVME_VERSION,
            cntrltype: 1,
            oacs: 0x17,
            acl: 7,
            aerl: 3,
            frmw: 0x16,
            lpa: 0x3,
            elpe: 0x3F,
            kas: 30,
            anatt: 0xA,
            anacap: 0x1F,
            anagrpmax: 0x80,
            nanagrpid: 0x80,
            tnvmcap: [self.target.size(), 0],
            sqes: 0x66,
            cqes: 0x44,
            maxcmd: MAX_COMMANDS,
            nn: NAMESPACE_COUNT,
            oncs: 0xC,
            fna: 0x5,
            vwc: 1,
            awun: 0xFFFF,
            awupf: 0x800,
            nwpc: 1,
            sgls: 1,
            mnan: NAMESPACE_COUNT,
            subnqn: self.nqn.clone(),
            ioccsz: IO_COMMAND_CAPSULE_SIZE,
            iorcsz: 1,
            msdbd: 1,
            psd0: POWER_STATE_0,
            ..Default::default()
        }
    }

    fn commands_supported() -> CommandsSupportedLog {
        let mut log = CommandsSupportedLog::default();
        for opcode in [
            AdminOpcode::DeleteIoSq,
            AdminOpcode::Abort,
            AdminOpcode::Identify,
            AdminOpcode::SetFeatures,
            AdminOpcode::GetFeatures,
            AdminOpcode::AsyncEventRequest,
            AdminOpcode::KeepAlive,
        ] {
            log.admin[opcode as usize] = COMMAND_SUPPORTED;
        }
        for opcode in [
            IoOpcode::Flush,
            IoOpcode::Write,
            IoOpcode::Read,
            IoOpcode::WriteZeroes,
            IoOpcode::DatasetManagement,
        ] {
            log.io[opcode as usize] = COMMAND_SUPPORTED;
        }
        log
    }

    fn ana_log() -> AnaLog {
        AnaLog {
            change_count: 0,
            descriptor_count: 1,
            group: AnaGroupDescriptor {
                group_id: 1,
                nsid_count: 1,
                change_count: 0,
                state: ANA_OPTIMIZED,
                nsids: [1],
            },
        }
    }
}

impl fmt::Debug for TargetSubsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSubsystem")
            .field("nqn", &self.nqn)
            .field("uuid", &self.uuid)
            .field("model", &self.model)
            .field("serial", &self.serial)
            .field("size", &self.target.size())
            .finish()
    }
}

#[async_trait]
impl Subsystem for TargetSubsystem {
    fn nqn(&self) -> &str {
        &self.nqn
    }

    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Nvm
    }

    fn identify(&self, cntlid: u16, cns: u8) -> NvmeOfResult<Vec<u8>> {
        let mut data = vec![0u8; IDENTIFY_DATA_LEN];
        match IdentifyCns::from_raw(cns) {
            Some(IdentifyCns::Namespace) => self.identify_namespace().encode_into(&mut data)?,
            Some(IdentifyCns::Controller) => {
                self.identify_controller(cntlid).encode_into(&mut data)?
            }
            Some(IdentifyCns::ActiveNamespaces) => {
                let mut list = ActiveNamespaceList::default();
                list.nsids[0] = 1;
                list.encode_into(&mut data)?
            }
            Some(IdentifyCns::NamespaceDescriptors) => NamespaceDescriptor {
                nidt: NIDT_UUID,
                nidl: 16,
                nid: *self.uuid.as_bytes(),
            }
            .encode_into(&mut data)?,
            None => {
                return Err(NvmeOfError::NotSupported(format!(
                    "identify cns {:#x} on {}",
                    cns, self.nqn
                )))
            }
        }
        Ok(data)
    }

    fn log_page(&self, page_id: u8) -> NvmeOfResult<Vec<u8>> {
        match LogPageId::from_raw(page_id) {
            Some(LogPageId::ErrorInformation)
            | Some(LogPageId::HealthInformation)
            | Some(LogPageId::DeviceSelfTest) => Ok(Vec::new()),
            Some(LogPageId::CommandsSupported) => Ok(Self::commands_supported().to_bytes()?),
            Some(LogPageId::AsymmetricNamespaceAccess) => Ok(Self::ana_log().to_bytes()?),
            _ => Err(NvmeOfError::NotSupported(format!(
                "log page {:#x} on {}",
                page_id, self.nqn
            ))),
        }
    }

    async fn queue_io(&self, request: IoRequest) -> Result<(), QueueError> {
        self.target.queue(request).await
    }

    fn runtime_details(&self) -> Vec<KeyValue> {
        self.target.runtime_details()
    }

    async fn close(&self) {
        info!("Closing subsystem: nqn={}", self.nqn);
        self.target.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{IoCommand, MemoryTarget, NullTarget, TargetError};
    use tokio::sync::oneshot;

    fn subsystem() -> TargetSubsystem {
        TargetSubsystem::new("nqn.test:null", Arc::new(MemoryTarget::new(1 << 20)))
            .unwrap()
            .with_model("Test Model")
            .with_serial("SN0001")
            .with_firmware("1.0")
    }

    #[test]
    fn test_invalid_nqn_rejected() {
        let result = TargetSubsystem::new("bogus", Arc::new(NullTarget::new()));
        assert!(matches!(result, Err(NvmeOfError::InvalidNqn(_))));
    }

    #[test]
    fn test_identify_controller() {
        let subsys = subsystem();
        let data = subsys.identify(3, IdentifyCns::Controller as u8).unwrap();
        assert_eq!(data.len(), IDENTIFY_DATA_LEN);

        let id = IdentifyController::decode(&data).unwrap();
        assert_eq!(id.cntlid, 3);
        assert_eq!(id.vid, 0x144D);
        assert_eq!(id.model_number, "Test Model");
        assert_eq!(id.serial_number, "SN0001");
        assert_eq!(id.firmware_revision, "1.0");
        assert_eq!(id.subnqn, "nqn.test:null");
        assert_eq!(id.tnvmcap[0], 1 << 20);
        assert_eq!(id.ioccsz, 4100);
        assert_eq!(&data[4..10], b"SN0001");
        assert_eq!(data[10], b' ');
    }

    #[test]
    fn test_identify_namespace() {
        let subsys = subsystem();
        let data = subsys.identify(1, IdentifyCns::Namespace as u8).unwrap();
        let ns = IdentifyNamespace::decode(&data).unwrap();
        assert_eq!(ns.nsze, 2048);
        assert_eq!(ns.lbaf[0], LBAF_512);
        assert_eq!(ns.anagrpid, 1);
    }

    #[test]
    fn test_identify_lists() {
        let subsys = subsystem();
        let data = subsys
            .identify(1, IdentifyCns::ActiveNamespaces as u8)
            .unwrap();
        assert_eq!(&data[..8], &[1, 0, 0, 0, 0, 0, 0, 0]);

        let data = subsys
            .identify(1, IdentifyCns::NamespaceDescriptors as u8)
            .unwrap();
        assert_eq!(data[0], NIDT_UUID);
        assert_eq!(data[1], 16);
        assert_eq!(&data[4..20], subsys.uuid().as_bytes());

        assert!(subsys.identify(1, 0x10).is_err());
    }

    #[test]
    fn test_log_pages() {
        let subsys = subsystem();

        let page = subsys.get_log_page(0x02, 0, 512).unwrap();
        assert_eq!(page, vec![0u8; 512]);

        let page = subsys.get_log_page(0x05, 0, 2048).unwrap();
        assert_eq!(page[AdminOpcode::Identify as usize * 4], 1);
        assert_eq!(page[AdminOpcode::GetLogPage as usize * 4], 0);
        assert_eq!(page[1024 + IoOpcode::Read as usize * 4], 1);

        let page = subsys.get_log_page(0x0C, 0, 64).unwrap();
        assert_eq!(page[8], 1);
        assert_eq!(page[16 + 16], ANA_OPTIMIZED);

        assert!(subsys.get_log_page(0x70, 0, 64).is_err());
    }

    #[tokio::test]
    async fn test_queue_io_reaches_target() {
        let subsys = subsystem();
        let (tx, rx) = oneshot::channel();
        let request = IoRequest::new(IoCommand::Flush, 0, 0).on_complete(move |_, result| {
            let _ = tx.send(result);
        });
        subsys.queue_io(request).await.unwrap();
        assert_eq!(rx.await.unwrap(), Ok::<(), TargetError>(()));
        assert_eq!(subsys.runtime_details()[0].key, "Size");
    }
}

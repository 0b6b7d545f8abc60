//! Discovery service subsystem

use std::net::SocketAddr;
use std::sync::Weak;

use async_trait::async_trait;
use tracing::debug;

use super::{Subsystem, SubsystemKind};
use crate::codec::{encode_at, WireRecord};
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::protocol::identify::IDENTIFY_DATA_LEN;
use crate::protocol::log_page::{
    ADRFAM_IPV4, ADRFAM_IPV6, DISCOVERY_ENTRY_LEN, DISCOVERY_ENTRY_OFFSET, SUBTYPE_NVM,
    TREQ_NOT_REQUIRED, TRTYPE_TCP,
};
use crate::protocol::{
    DiscoveryLogEntry, DiscoveryLogHeader, IdentifyCns, IdentifyController, LogPageId,
    AUTO_CONTROLLER_ID, DISCOVERY_NQN, MAX_COMMANDS, NVME_VERSION,
};
use crate::target::{IoRequest, QueueError, TargetError};

/// Admin submission queue size advertised per entry
const DISCOVERY_ASQSZ: u16 = 0x2000;

/// Source of the records a discovery controller reports
pub trait DiscoveryDirectory: Send + Sync {
    /// NQNs of every registered subsystem
    fn subsystem_nqns(&self) -> Vec<String>;

    /// Address hosts should connect to
    fn advertised_addr(&self) -> Option<SocketAddr>;
}

/// Lists the subsystems served on this port
///
/// Holds a weak handle on its directory so the registry that owns it can be
/// dropped.
pub struct DiscoverySubsystem {
    directory: Weak<dyn DiscoveryDirectory>,
}

impl DiscoverySubsystem {
    /// Discovery service reading from `directory`
    pub fn new(directory: Weak<dyn DiscoveryDirectory>) -> Self {
        Self { directory }
    }

    fn entries(&self) -> Vec<DiscoveryLogEntry> {
        let Some(directory) = self.directory.upgrade() else {
            return Vec::new();
        };
        let mut nqns: Vec<String> = directory
            .subsystem_nqns()
            .into_iter()
            .filter(|nqn| nqn != DISCOVERY_NQN)
            .collect();
        nqns.sort();

        let (adrfam, traddr, trsvcid) = match directory.advertised_addr() {
            Some(SocketAddr::V4(addr)) => (ADRFAM_IPV4, addr.ip().to_string(), addr.port().to_string()),
            Some(SocketAddr::V6(addr)) => (ADRFAM_IPV6, addr.ip().to_string(), addr.port().to_string()),
            None => (ADRFAM_IPV4, String::new(), String::new()),
        };

        nqns.into_iter()
            .map(|subnqn| DiscoveryLogEntry {
                trtype: TRTYPE_TCP,
                adrfam,
                subtype: SUBTYPE_NVM,
                treq: TREQ_NOT_REQUIRED,
                port_id: 1,
                cntlid: AUTO_CONTROLLER_ID,
                asqsz: DISCOVERY_ASQSZ,
                trsvcid: trsvcid.clone(),
                subnqn,
                traddr: traddr.clone(),
                tsas: [0; 256],
            })
            .collect()
    }
}

#[async_trait]
impl Subsystem for DiscoverySubsystem {
    fn nqn(&self) -> &str {
        DISCOVERY_NQN
    }

    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Discovery
    }

    fn identify(&self, cntlid: u16, cns: u8) -> NvmeOfResult<Vec<u8>> {
        if IdentifyCns::from_raw(cns) != Some(IdentifyCns::Controller) {
            return Err(NvmeOfError::NotSupported(format!(
                "identify cns {:#x} on discovery subsystem",
                cns
            )));
        }
        let id = IdentifyController {
            cntlid,
            version: NVME_VERSION,
            oaes: 0x8000_0000,
            lpa: 0x4,
            maxcmd: MAX_COMMANDS,
            sgls: 1 | 1 << 20,
            subnqn: DISCOVERY_NQN.to_string(),
            ..Default::default()
        };
        let mut data = vec![0u8; IDENTIFY_DATA_LEN];
        id.encode_into(&mut data)?;
        Ok(data)
    }

    fn log_page(&self, page_id: u8) -> NvmeOfResult<Vec<u8>> {
        if LogPageId::from_raw(page_id) != Some(LogPageId::Discovery) {
            return Err(NvmeOfError::NotSupported(format!(
                "log page {:#x} on discovery subsystem",
                page_id
            )));
        }
        let entries = self.entries();
        debug!("Building discovery log with {} records", entries.len());

        let header = DiscoveryLogHeader {
            generation: 0,
            record_count: entries.len() as u64,
            record_format: 0,
        };
        let mut page = vec![0u8; DISCOVERY_ENTRY_OFFSET + entries.len() * DISCOVERY_ENTRY_LEN];
        header.encode_into(&mut page)?;
        for (idx, entry) in entries.iter().enumerate() {
            encode_at(&mut page, DISCOVERY_ENTRY_OFFSET + idx * DISCOVERY_ENTRY_LEN, entry)?;
        }
        Ok(page)
    }

    async fn queue_io(&self, request: IoRequest) -> Result<(), QueueError> {
        Err(QueueError {
            error: TargetError::Unsupported,
            request,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Fixed(Vec<String>, Option<SocketAddr>);

    impl DiscoveryDirectory for Fixed {
        fn subsystem_nqns(&self) -> Vec<String> {
            self.0.clone()
        }

        fn advertised_addr(&self) -> Option<SocketAddr> {
            self.1
        }
    }

    fn discovery(directory: &Arc<Fixed>) -> DiscoverySubsystem {
        let directory: Arc<dyn DiscoveryDirectory> = directory.clone();
        DiscoverySubsystem::new(Arc::downgrade(&directory))
    }

    #[test]
    fn test_discovery_log_lists_sorted_subsystems() {
        let directory = Arc::new(Fixed(
            vec![
                "nqn.test:b".into(),
                DISCOVERY_NQN.into(),
                "nqn.test:a".into(),
            ],
            Some("10.0.0.5:4420".parse().unwrap()),
        ));
        let discovery = discovery(&directory);

        let page = discovery.get_log_page(0x70, 0, 4096).unwrap();
        assert_eq!(page.len(), 4096);
        let header = DiscoveryLogHeader::decode(&page).unwrap();
        assert_eq!(header.record_count, 2);

        let first = DiscoveryLogEntry::decode(&page[1024..2048]).unwrap();
        assert_eq!(first.subnqn, "nqn.test:a");
        assert_eq!(first.traddr, "10.0.0.5");
        assert_eq!(first.trsvcid, "4420");
        assert_eq!(first.trtype, TRTYPE_TCP);
        assert_eq!(first.cntlid, 0xFFFF);
        assert_eq!(first.asqsz, 0x2000);

        let second = DiscoveryLogEntry::decode(&page[2048..3072]).unwrap();
        assert_eq!(second.subnqn, "nqn.test:b");
        assert!(page[3072..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_discovery_log_offset_reads() {
        let directory = Arc::new(Fixed(
            vec!["nqn.test:a".into(), "nqn.test:b".into()],
            Some("127.0.0.1:4420".parse().unwrap()),
        ));
        let discovery = discovery(&directory);

        // offset 2048 starts at the second entry
        let page = discovery.get_log_page(0x70, 2048, 1024).unwrap();
        let entry = DiscoveryLogEntry::decode(&page).unwrap();
        assert_eq!(entry.subnqn, "nqn.test:b");
    }

    #[test]
    fn test_discovery_identify() {
        let directory = Arc::new(Fixed(Vec::new(), None));
        let discovery = discovery(&directory);

        let data = discovery.identify(7, IdentifyCns::Controller as u8).unwrap();
        assert_eq!(data.len(), IDENTIFY_DATA_LEN);
        let id = IdentifyController::decode(&data).unwrap();
        assert_eq!(id.cntlid, 7);
        assert_eq!(id.subnqn, DISCOVERY_NQN);
        assert_eq!(id.maxcmd, MAX_COMMANDS);

        assert!(discovery.identify(7, IdentifyCns::Namespace as u8).is_err());
        assert!(discovery.get_log_page(0x02, 0, 512).is_err());
    }

    #[test]
    fn test_dropped_directory_yields_empty_log() {
        let directory = Arc::new(Fixed(vec!["nqn.test:a".into()], None));
        let discovery = discovery(&directory);
        drop(directory);
        let page = discovery.get_log_page(0x70, 0, 1024).unwrap();
        assert_eq!(DiscoveryLogHeader::decode(&page).unwrap().record_count, 0);
    }
}

//! Placeholder subsystem bound to a controller before Connect

use async_trait::async_trait;

use super::{Subsystem, SubsystemKind};
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::protocol::INIT_NQN;
use crate::target::{IoRequest, QueueError, TargetError};

/// Rejects everything until the host connects to a real subsystem
#[derive(Debug, Default, Clone, Copy)]
pub struct InitSubsystem;

#[async_trait]
impl Subsystem for InitSubsystem {
    fn nqn(&self) -> &str {
        INIT_NQN
    }

    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Init
    }

    fn identify(&self, _cntlid: u16, cns: u8) -> NvmeOfResult<Vec<u8>> {
        Err(NvmeOfError::Subsystem(format!(
            "identify cns {:#x} before connect",
            cns
        )))
    }

    fn log_page(&self, page_id: u8) -> NvmeOfResult<Vec<u8>> {
        Err(NvmeOfError::Subsystem(format!(
            "log page {:#x} before connect",
            page_id
        )))
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
    use crate::target::IoCommand;

    #[tokio::test]
    async fn test_init_rejects_everything() {
        let init = InitSubsystem;
        assert_eq!(init.nqn(), INIT_NQN);
        assert!(init.identify(0, 1).is_err());
        assert!(init.get_log_page(2, 0, 512).is_err());

        let rejected = init
            .queue_io(IoRequest::new(IoCommand::Read, 0, 512))
            .await
            .unwrap_err();
        assert_eq!(rejected.error, TargetError::Unsupported);
        assert!(init.runtime_details().is_empty());
    }
}

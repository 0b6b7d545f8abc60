//! Admin queue commands

use crate::codec::WireRecord;
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::protocol::identify::IDENTIFY_DATA_LEN;
use crate::protocol::{
    AdminOpcode, CapsuleCommand, FeatureId, IdentifyCns, IdentifyController, IdentifyNamespace,
    LogPageRequest, Property, PropertySize, CC_ENABLE, CSTS_READY,
};

use super::queue::Queue;

/// The admin queue of a logged in client
pub struct AdminQueue {
    queue: Queue,
}

impl AdminQueue {
    pub(crate) fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Controller ID the target assigned at Connect
    pub fn controller_id(&self) -> u16 {
        self.queue.controller_id()
    }

    /// Underlying queue, for raw submissions
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub async fn keep_alive(&self) -> NvmeOfResult<()> {
        let capsule = CapsuleCommand::new(AdminOpcode::KeepAlive as u8);
        self.queue.submit(capsule, None, Vec::new()).await?;
        Ok(())
    }

    /// Read a controller property register
    pub async fn get_property(&self, property: Property, size: PropertySize) -> NvmeOfResult<u64> {
        let capsule = CapsuleCommand::property_get(property as u32, size);
        let completion = self.queue.submit(capsule, None, Vec::new()).await?;
        Ok(match size {
            PropertySize::Four => u64::from(completion.response.result_u32()),
            PropertySize::Eight => completion.response.result_u64(),
        })
    }

    /// Write a controller property register
    pub async fn set_property(
        &self,
        property: Property,
        value: u64,
        size: PropertySize,
    ) -> NvmeOfResult<()> {
        let capsule = CapsuleCommand::property_set(property as u32, value, size);
        self.queue.submit(capsule, None, Vec::new()).await?;
        Ok(())
    }

    /// Set CC.EN and check that CSTS reports ready
    pub async fn enable(&self) -> NvmeOfResult<()> {
        self.set_property(Property::Configuration, u64::from(CC_ENABLE), PropertySize::Four)
            .await?;
        let status = self
            .get_property(Property::Status, PropertySize::Four)
            .await?;
        if status & u64::from(CSTS_READY) == 0 {
            return Err(NvmeOfError::Connection(format!(
                "controller not ready after enable: csts={:#x}",
                status
            )));
        }
        Ok(())
    }

    pub async fn identify_controller(&self) -> NvmeOfResult<IdentifyController> {
        let data = self.identify(IdentifyCns::Controller).await?;
        Ok(IdentifyController::decode(&data)?)
    }

    pub async fn identify_namespace(&self) -> NvmeOfResult<IdentifyNamespace> {
        let data = self.identify(IdentifyCns::Namespace).await?;
        Ok(IdentifyNamespace::decode(&data)?)
    }

    /// Raw 4 KiB Identify data for `cns`
    pub async fn identify(&self, cns: IdentifyCns) -> NvmeOfResult<Vec<u8>> {
        let mut capsule = CapsuleCommand::new(AdminOpcode::Identify as u8);
        capsule.d10 = cns as u32;
        let completion = self
            .queue
            .submit(capsule, None, vec![0u8; IDENTIFY_DATA_LEN])
            .await?;
        Ok(completion.data)
    }

    /// Read `length` bytes of a log page starting at byte `offset`
    pub async fn get_log_page(
        &self,
        page_id: u8,
        offset: u64,
        length: usize,
    ) -> NvmeOfResult<Vec<u8>> {
        if length == 0 || length % 4 != 0 {
            return Err(NvmeOfError::InvalidParameter(format!(
                "log page length {} is not a positive multiple of 4",
                length
            )));
        }
        let request = LogPageRequest {
            page_id,
            offset,
            length,
        };
        let completion = self
            .queue
            .submit(request.to_command(), None, vec![0u8; length])
            .await?;
        Ok(completion.data)
    }

    /// Set a feature, returning the value the controller reports back
    pub async fn set_features(&self, feature: FeatureId, value: u32) -> NvmeOfResult<u32> {
        let mut capsule = CapsuleCommand::new(AdminOpcode::SetFeatures as u8);
        capsule.d10 = feature as u32;
        capsule.d11 = value;
        let completion = self.queue.submit(capsule, None, Vec::new()).await?;
        Ok(completion.response.result_u32())
    }

    pub async fn get_features(&self, feature: FeatureId) -> NvmeOfResult<u32> {
        let mut capsule = CapsuleCommand::new(AdminOpcode::GetFeatures as u8);
        capsule.d10 = feature as u32;
        let completion = self.queue.submit(capsule, None, Vec::new()).await?;
        Ok(completion.response.result_u32())
    }

    pub(crate) async fn close(&self) {
        self.queue.close().await;
    }
}

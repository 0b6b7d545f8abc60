//! File-backed volumes created through the management API
//!
//! Each volume is a sparse `<uuid>.raw` image plus a `<uuid>.json` record in
//! the data directory. Records found there at startup are exported again.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use warp_nvmeof::protocol::BLOCK_SIZE;
use warp_nvmeof::target::TargetOptions;
use warp_nvmeof::{generate_nqn, Registry, TargetFactory, TargetSubsystem};

use super::types::{CreateVolumeRequest, Volume};
use super::{ApiError, ApiResult};

/// Volumes owned by the API, keyed by UUID
pub struct VolumeStore {
    data_dir: PathBuf,
    registry: Arc<Registry>,
    factory: TargetFactory,
    volumes: Mutex<BTreeMap<Uuid, Volume>>,
}

impl VolumeStore {
    /// Open `data_dir`, creating it if needed, and export every volume
    /// recorded there
    pub fn open(data_dir: impl Into<PathBuf>, registry: Arc<Registry>) -> ApiResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let store = Self {
            data_dir,
            registry,
            factory: TargetFactory::with_defaults(),
            volumes: Mutex::new(BTreeMap::new()),
        };

        for entry in fs::read_dir(&store.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match store.restore(&path) {
                Ok(volume) => info!("Restored volume {} ({})", volume.uuid, volume.name),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(store)
    }

    /// Directory holding images and records
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn image_path(&self, uuid: Uuid) -> PathBuf {
        self.data_dir.join(format!("{}.raw", uuid))
    }

    fn record_path(&self, uuid: Uuid) -> PathBuf {
        self.data_dir.join(format!("{}.json", uuid))
    }

    fn restore(&self, record: &Path) -> ApiResult<Volume> {
        let volume: Volume = serde_json::from_slice(&fs::read(record)?)?;
        self.export(&volume)?;
        self.volumes.lock().insert(volume.uuid, volume.clone());
        Ok(volume)
    }

    fn export(&self, volume: &Volume) -> ApiResult<()> {
        let image = self.image_path(volume.uuid);
        let options = TargetOptions::new().with("image", image.display());
        let target = self.factory.create("file", &options)?;
        let subsystem = TargetSubsystem::new(volume.nqn.clone(), target)?.with_uuid(volume.uuid);
        self.registry.add_subsystem(Arc::new(subsystem))?;
        Ok(())
    }

    /// Create the image, export it and record it
    pub fn create(&self, request: CreateVolumeRequest) -> ApiResult<Volume> {
        if request.name.is_empty() {
            return Err(ApiError::InvalidRequest("volume name is empty".into()));
        }
        if request.size == 0 || request.size % BLOCK_SIZE as u64 != 0 {
            return Err(ApiError::InvalidRequest(format!(
                "size {} is not a positive multiple of {}",
                request.size, BLOCK_SIZE
            )));
        }

        let uuid = Uuid::new_v4();
        let volume = Volume {
            uuid,
            name: request.name,
            description: request.description,
            size: request.size,
            nqn: generate_nqn(&format!("uuid:{}", uuid)),
        };

        let image = self.image_path(uuid);
        File::create(&image)?.set_len(volume.size)?;
        let result = self.export(&volume).and_then(|()| {
            fs::write(self.record_path(uuid), serde_json::to_vec_pretty(&volume)?)?;
            Ok(())
        });
        if let Err(e) = result {
            let _ = fs::remove_file(&image);
            return Err(e);
        }

        info!("Created volume {} ({}, {} bytes)", uuid, volume.name, volume.size);
        self.volumes.lock().insert(uuid, volume.clone());
        Ok(volume)
    }

    /// Look up a volume
    pub fn get(&self, uuid: Uuid) -> ApiResult<Volume> {
        self.volumes
            .lock()
            .get(&uuid)
            .cloned()
            .ok_or(ApiError::VolumeNotFound(uuid))
    }

    /// All volumes, ordered by UUID
    pub fn list(&self) -> Vec<Volume> {
        self.volumes.lock().values().cloned().collect()
    }

    /// Close the volume's sessions, stop exporting it and delete its files
    pub async fn delete(&self, uuid: Uuid) -> ApiResult<()> {
        let volume = self
            .volumes
            .lock()
            .remove(&uuid)
            .ok_or(ApiError::VolumeNotFound(uuid))?;

        if let Err(e) = self.registry.remove_subsystem(&volume.nqn).await {
            warn!("Volume {} was not exported: {}", uuid, e);
        }
        fs::remove_file(self.record_path(uuid))?;
        fs::remove_file(self.image_path(uuid))?;
        info!("Deleted volume {} ({})", uuid, volume.name);
        Ok(())
    }
}

//! volume command - manage file-backed volumes through a running daemon's API

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::api::types::{
    CreateVolumeRequest, CreateVolumeResponse, DeleteVolumeRequest, DeleteVolumeResponse,
    ErrorResponse, GetVolumeRequest, GetVolumeResponse, ListVolumeRequest, ListVolumeResponse,
    Volume,
};

/// Thin client for the management API
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// POST `request` to `/api/v1/<name>` and decode the reply
    async fn call<Req, Resp>(&self, name: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/api/v1/{}", self.base_url, name);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !response.status().is_success() {
            let code = response.status();
            match response.json::<ErrorResponse>().await {
                Ok(error) => bail!("{} failed: {}", name, error.status.message),
                Err(_) => bail!("{} failed with HTTP {}", name, code),
            }
        }
        response
            .json()
            .await
            .with_context(|| format!("Malformed {} response", name))
    }

    pub async fn create(&self, request: CreateVolumeRequest) -> Result<Volume> {
        let response: CreateVolumeResponse = self.call("CreateVolumeRequest", &request).await?;
        Ok(response.volume)
    }

    pub async fn get(&self, uuid: Uuid) -> Result<Volume> {
        let response: GetVolumeResponse =
            self.call("GetVolumeRequest", &GetVolumeRequest { uuid }).await?;
        Ok(response.volume)
    }

    pub async fn delete(&self, uuid: Uuid) -> Result<()> {
        let _: DeleteVolumeResponse =
            self.call("DeleteVolumeRequest", &DeleteVolumeRequest { uuid }).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Volume>> {
        let response: ListVolumeResponse =
            self.call("ListVolumeRequest", &ListVolumeRequest {}).await?;
        Ok(response.volumes)
    }
}

fn print_volume(volume: &Volume) {
    println!("uuid:        {}", volume.uuid);
    println!("name:        {}", volume.name);
    if !volume.description.is_empty() {
        println!("description: {}", volume.description);
    }
    println!("size:        {} bytes", volume.size);
    println!("nqn:         {}", volume.nqn);
}

/// Create a volume and print it
pub async fn create(api: &str, name: String, description: String, size: u64) -> Result<()> {
    let volume = ApiClient::new(api)
        .create(CreateVolumeRequest {
            name,
            description,
            size,
        })
        .await?;
    print_volume(&volume);
    Ok(())
}

/// Print one volume
pub async fn get(api: &str, uuid: Uuid) -> Result<()> {
    let volume = ApiClient::new(api).get(uuid).await?;
    print_volume(&volume);
    Ok(())
}

/// Delete a volume
pub async fn delete(api: &str, uuid: Uuid) -> Result<()> {
    ApiClient::new(api).delete(uuid).await?;
    println!("Deleted {}", uuid);
    Ok(())
}

/// List every volume
pub async fn list(api: &str) -> Result<()> {
    let volumes = ApiClient::new(api).list().await?;
    if volumes.is_empty() {
        println!("No volumes");
        return Ok(());
    }
    for volume in &volumes {
        println!("{}  {:>14}  {}  {}", volume.uuid, volume.size, volume.nqn, volume.name);
    }
    Ok(())
}

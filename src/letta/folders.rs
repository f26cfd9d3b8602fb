//! Folder API endpoints (document corpus management).

use super::client::LettaClient;
use super::types::{CreateFolderRequest, FileUploadResponse, Folder, FolderFile};
use crate::error::BridgeResult;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};

/// Query parameters for the folder list endpoint.
#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct ListFoldersParams {
    /// Filter by exact name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Folder API operations.
#[derive(Debug)]
pub struct FolderApi<'a> {
    client: &'a LettaClient,
}

impl<'a> FolderApi<'a> {
    /// Create a new folder API instance.
    pub fn new(client: &'a LettaClient) -> Self {
        Self { client }
    }

    /// List folders, optionally filtered by name.
    pub async fn list(&self, name: Option<&str>) -> BridgeResult<Vec<Folder>> {
        self.client
            .get_with_query(
                "v1/folders",
                &ListFoldersParams {
                    name: name.map(|n| n.to_string()),
                },
            )
            .await
    }

    /// Create a new folder.
    pub async fn create(&self, request: &CreateFolderRequest) -> BridgeResult<Folder> {
        self.client.post("v1/folders", request).await
    }

    /// Upload a file into a folder. Returns the file (or indexing job) id.
    pub async fn upload_file(
        &self,
        folder_id: &str,
        file_name: String,
        file_data: Bytes,
        content_type: Option<&str>,
    ) -> BridgeResult<FileUploadResponse> {
        let mut part = Part::bytes(file_data.to_vec()).file_name(file_name);
        if let Some(ct) = content_type {
            part = part.mime_str(ct)?;
        }
        let form = Form::new().part("file", part);

        self.client
            .post_multipart(&format!("v1/folders/{}/upload", folder_id), form)
            .await
    }

    /// List files in a folder.
    pub async fn list_files(&self, folder_id: &str) -> BridgeResult<Vec<FolderFile>> {
        self.client
            .get(&format!("v1/folders/{}/files", folder_id))
            .await
    }

    /// List folders attached to an agent.
    pub async fn list_attached(&self, agent_id: &str) -> BridgeResult<Vec<Folder>> {
        self.client
            .get(&format!("v1/agents/{}/folders", agent_id))
            .await
    }

    /// Attach a folder to an agent. Idempotent on the server side.
    pub async fn attach(&self, agent_id: &str, folder_id: &str) -> BridgeResult<serde_json::Value> {
        self.client
            .patch(
                &format!("v1/agents/{}/folders/attach/{}", agent_id, folder_id),
                &(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::letta::client::LettaClientConfig;

    #[test]
    fn test_folder_api_creation() {
        let config = LettaClientConfig::new("http://localhost:8283").unwrap();
        let client = LettaClient::new(config).unwrap();
        let _api = FolderApi::new(&client);
    }

    #[test]
    fn test_list_params_with_name() {
        let params = ListFoldersParams {
            name: Some("matrix-room".to_string()),
        };
        let query = serde_urlencoded::to_string(&params).unwrap();
        assert_eq!(query, "name=matrix-room");
    }
}

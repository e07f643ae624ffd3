// API client module: a small blocking GraphQL client for the issue
// tracker. It exposes the four attachment mutations the pipeline and the
// update/delete commands need, behind the `AttachmentApi` trait so the
// orchestrator can be driven by a fake in tests.

use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::ApiError;
use crate::types::{AttachmentRecord, AttachmentUpdate, NewAttachment, UploadTarget};

const FILE_UPLOAD: &str = r#"mutation FileUpload($contentType: String!, $filename: String!, $size: Int!) {
  fileUpload(contentType: $contentType, filename: $filename, size: $size) {
    success
    uploadFile { uploadUrl assetUrl headers { key value } }
  }
}"#;

const ATTACHMENT_FIELDS: &str = "id title url createdAt creator { id name }";

/// Remote operations consumed by the attachment commands.
pub trait AttachmentApi {
    /// Obtain a single-use upload URL plus the permanent asset URL.
    fn request_upload_target(
        &self,
        content_type: &str,
        filename: &str,
        size: u64,
    ) -> Result<UploadTarget, ApiError>;

    /// Link a URL to an issue. This is what makes an upload visible.
    fn register_attachment(
        &self,
        issue_id: &str,
        attachment: &NewAttachment,
    ) -> Result<AttachmentRecord, ApiError>;

    fn update_attachment(
        &self,
        attachment_id: &str,
        update: &AttachmentUpdate,
    ) -> Result<AttachmentRecord, ApiError>;

    fn delete_attachment(&self, attachment_id: &str) -> Result<(), ApiError>;
}

/// Holds a reqwest blocking client, the GraphQL endpoint and an optional
/// API key sent verbatim in the `Authorization` header.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileUploadData {
    file_upload: FileUploadPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileUploadPayload {
    success: bool,
    upload_file: Option<UploadFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadFile {
    upload_url: String,
    asset_url: String,
    #[serde(default)]
    headers: Vec<UploadHeader>,
}

#[derive(Deserialize)]
struct UploadHeader {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct AttachmentPayload {
    success: bool,
    attachment: Option<AttachmentRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentCreateData {
    attachment_create: AttachmentPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentUpdateData {
    attachment_update: AttachmentPayload,
}

#[derive(Deserialize)]
struct DeletePayload {
    success: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentDeleteData {
    attachment_delete: DeletePayload,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder().build()?;
        Ok(ApiClient {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(config.api_url.clone(), config.api_key.clone())
    }

    /// POST one GraphQL operation and decode its `data`. Transport errors,
    /// non-2xx statuses and a non-empty `errors` array all become `ApiError`.
    fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, ApiError> {
        let mut req = self
            .client
            .post(&self.base_url)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, token.as_str());
        }

        let res = req.send()?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GraphQlResponse<T> = res
            .json()
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(ApiError::GraphQl(messages.join("; ")));
        }
        parsed
            .data
            .ok_or_else(|| ApiError::Decode("response has no data".into()))
    }
}

fn attachment_from(payload: AttachmentPayload, op: &'static str) -> Result<AttachmentRecord, ApiError> {
    match payload {
        AttachmentPayload {
            success: true,
            attachment: Some(record),
        } => Ok(record),
        _ => Err(ApiError::Unsuccessful(op)),
    }
}

impl AttachmentApi for ApiClient {
    #[instrument(skip(self))]
    fn request_upload_target(
        &self,
        content_type: &str,
        filename: &str,
        size: u64,
    ) -> Result<UploadTarget, ApiError> {
        let data: FileUploadData = self.graphql(
            FILE_UPLOAD,
            json!({ "contentType": content_type, "filename": filename, "size": size }),
        )?;
        let payload = data.file_upload;
        let upload = match payload.upload_file {
            Some(upload) if payload.success => upload,
            _ => return Err(ApiError::Unsuccessful("fileUpload")),
        };
        debug!(headers = upload.headers.len(), "received upload target");
        Ok(UploadTarget {
            upload_url: upload.upload_url,
            asset_url: upload.asset_url,
            headers: upload
                .headers
                .into_iter()
                .map(|h| (h.key, h.value))
                .collect(),
        })
    }

    #[instrument(skip(self, attachment), fields(title = %attachment.title))]
    fn register_attachment(
        &self,
        issue_id: &str,
        attachment: &NewAttachment,
    ) -> Result<AttachmentRecord, ApiError> {
        let query = format!(
            "mutation AttachmentCreate($input: AttachmentCreateInput!) {{ \
             attachmentCreate(input: $input) {{ success attachment {{ {ATTACHMENT_FIELDS} }} }} }}"
        );
        let mut input = json!({
            "issueId": issue_id,
            "title": attachment.title,
            "url": attachment.url,
        });
        insert_optional(&mut input, "subtitle", &attachment.subtitle);
        insert_optional(&mut input, "iconUrl", &attachment.icon_url);
        if let Some(metadata) = &attachment.metadata {
            input["metadata"] = json!(metadata);
        }

        let data: AttachmentCreateData = self.graphql(&query, json!({ "input": input }))?;
        attachment_from(data.attachment_create, "attachmentCreate")
    }

    #[instrument(skip(self, update))]
    fn update_attachment(
        &self,
        attachment_id: &str,
        update: &AttachmentUpdate,
    ) -> Result<AttachmentRecord, ApiError> {
        let query = format!(
            "mutation AttachmentUpdate($id: String!, $input: AttachmentUpdateInput!) {{ \
             attachmentUpdate(id: $id, input: $input) {{ success attachment {{ {ATTACHMENT_FIELDS} }} }} }}"
        );
        let mut input = json!({});
        insert_optional(&mut input, "title", &update.title);
        insert_optional(&mut input, "subtitle", &update.subtitle);
        insert_optional(&mut input, "iconUrl", &update.icon_url);
        if let Some(metadata) = &update.metadata {
            input["metadata"] = json!(metadata);
        }

        let data: AttachmentUpdateData =
            self.graphql(&query, json!({ "id": attachment_id, "input": input }))?;
        attachment_from(data.attachment_update, "attachmentUpdate")
    }

    #[instrument(skip(self))]
    fn delete_attachment(&self, attachment_id: &str) -> Result<(), ApiError> {
        let query = "mutation AttachmentDelete($id: String!) { attachmentDelete(id: $id) { success } }";
        let data: AttachmentDeleteData = self.graphql(query, json!({ "id": attachment_id }))?;
        if data.attachment_delete.success {
            Ok(())
        } else {
            Err(ApiError::Unsuccessful("attachmentDelete"))
        }
    }
}

fn insert_optional(input: &mut Value, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        input[key] = json!(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> ApiClient {
        ApiClient::new(format!("{}/graphql", server.url()), Some("lin_api_test".into())).unwrap()
    }

    #[test]
    fn test_request_upload_target() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "lin_api_test")
            .match_body(Matcher::PartialJson(json!({
                "variables": { "contentType": "image/png", "filename": "shot.png", "size": 1234 }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":{"fileUpload":{"success":true,"uploadFile":{
                    "uploadUrl":"https://storage.example.com/put?sig=abc",
                    "assetUrl":"https://uploads.example.com/shot.png",
                    "headers":[{"key":"x-goog-meta-id","value":"42"}]}}}}"#,
            )
            .create();

        let target = client(&server)
            .request_upload_target("image/png", "shot.png", 1234)
            .unwrap();

        assert_eq!(target.upload_url, "https://storage.example.com/put?sig=abc");
        assert_eq!(target.asset_url, "https://uploads.example.com/shot.png");
        assert_eq!(target.headers, vec![("x-goog-meta-id".into(), "42".into())]);
        mock.assert();
    }

    #[test]
    fn test_graphql_errors_surface() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data":null,"errors":[{"message":"Entity not found"}]}"#)
            .create();

        let err = client(&server)
            .register_attachment(
                "ENG-1",
                &NewAttachment {
                    title: "Doc".into(),
                    url: "https://example.com".into(),
                    subtitle: None,
                    icon_url: None,
                    metadata: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::GraphQl(ref m) if m == "Entity not found"));
    }

    #[test]
    fn test_http_error_status() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/graphql")
            .with_status(401)
            .with_body("unauthorized")
            .create();

        let err = client(&server).delete_attachment("att_1").unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 401, .. }));
    }

    #[test]
    fn test_register_attachment_sends_optional_fields() {
        let mut server = mockito::Server::new();
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), "ci".into());
        let mock = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({
                "variables": { "input": {
                    "issueId": "ENG-7",
                    "title": "Build log",
                    "subtitle": "nightly",
                    "metadata": { "source": "ci" }
                }}
            })))
            .with_status(200)
            .with_body(
                r#"{"data":{"attachmentCreate":{"success":true,"attachment":{
                    "id":"att_9","title":"Build log","url":"https://uploads.example.com/log",
                    "createdAt":"2024-01-01T00:00:00Z","creator":null}}}}"#,
            )
            .create();

        let record = client(&server)
            .register_attachment(
                "ENG-7",
                &NewAttachment {
                    title: "Build log".into(),
                    url: "https://uploads.example.com/log".into(),
                    subtitle: Some("nightly".into()),
                    icon_url: None,
                    metadata: Some(metadata),
                },
            )
            .unwrap();
        assert_eq!(record.id, "att_9");
        assert!(record.creator.is_none());
        mock.assert();
    }

    #[test]
    fn test_unsuccessful_mutation() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data":{"attachmentDelete":{"success":false}}}"#)
            .create();

        let err = client(&server).delete_attachment("att_1").unwrap_err();
        assert!(matches!(err, ApiError::Unsuccessful("attachmentDelete")));
    }

    #[test]
    fn test_update_attachment() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({
                "variables": { "id": "att_3", "input": { "title": "Renamed" } }
            })))
            .with_status(200)
            .with_body(
                r#"{"data":{"attachmentUpdate":{"success":true,"attachment":{
                    "id":"att_3","title":"Renamed","url":"https://example.com",
                    "createdAt":"2024-01-01T00:00:00Z"}}}}"#,
            )
            .create();

        let update = AttachmentUpdate {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        let record = client(&server).update_attachment("att_3", &update).unwrap();
        assert_eq!(record.title, "Renamed");
        mock.assert();
    }
}

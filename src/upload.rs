//! The per-file upload pipeline.
//!
//! Each file gets its own uploading message keyed by its own client
//! message id, so concurrent uploads are fully independent: one failing
//! never touches another's state. The local preview handle is released
//! exactly once, on completion or on session teardown.

use crate::client::ChatClient;
use crate::error::ClientError;
use crate::session::PreviewHandle;
use log::{debug, warn};
use rand::RngCore;
use serde_json::Value;
use std::sync::Arc;
use stitchcore::net::HttpRequest;
use stitchcore::types::{ImagePayload, MessageKind, MessageStatus, Payload};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload endpoint returned status {0}")]
    Status(u16),
    #[error("upload response missing imageUrl")]
    MissingImageUrl,
    #[error("upload transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl ChatClient {
    /// Uploads one image and sends the resulting message.
    ///
    /// The uploading entry (with a local preview) is visible in the
    /// store before this call first suspends. The returned client
    /// message id identifies the attempt; its outcome is visible through
    /// the message status (`uploaded` or `failed`).
    pub async fn send_image(
        &self,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        caption: Option<String>,
    ) -> Result<String, ClientError> {
        self.start_image_send(file_name.into(), Arc::new(bytes), caption)
            .await
    }

    pub(crate) async fn start_image_send(
        &self,
        file_name: String,
        bytes: Arc<Vec<u8>>,
        caption: Option<String>,
    ) -> Result<String, ClientError> {
        let generation = self.current_generation();
        let client_message_id = self.generate_client_message_id();
        let preview = Arc::new(PreviewHandle::new(
            &client_message_id,
            format!("local://{client_message_id}/{file_name}"),
        ));

        let payload = Payload::Image(ImagePayload {
            image_url: None,
            preview_url: Some(preview.url().to_string()),
            caption: caption.clone(),
            file_name: Some(file_name.clone()),
            local_bytes: Some(Arc::clone(&bytes)),
        });

        let entry = match self
            .insert_optimistic_entry(
                client_message_id.clone(),
                MessageKind::Image,
                payload,
                MessageStatus::Uploading,
            )
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                preview.release();
                return Err(err);
            }
        };
        self.previews
            .insert(client_message_id.clone(), Arc::clone(&preview));

        // Released exactly once: here when this attempt finishes, or by
        // session teardown if that got there first.
        let preview_key = client_message_id.clone();
        let _release_guard = scopeguard::guard((), |_| {
            if let Some((_, handle)) = self.previews.remove(&preview_key) {
                handle.release();
            }
        });

        let result = self.upload_file(&file_name, &bytes).await;

        if self.current_generation() != generation {
            debug!("upload for {client_message_id} finished after conversation switch, dropping");
            return Ok(client_message_id);
        }

        match result {
            Ok(image_url) => {
                let final_payload = Payload::Image(ImagePayload {
                    image_url: Some(image_url.clone()),
                    caption,
                    file_name: Some(file_name),
                    ..Default::default()
                });
                if let Err(e) = self
                    .emit_message(&entry, MessageKind::Image, &final_payload)
                    .await
                {
                    warn!("wire emit after upload failed for {client_message_id}: {e:#}");
                    self.fail_message(&client_message_id).await;
                } else {
                    let patch = Payload::Image(ImagePayload {
                        image_url: Some(image_url),
                        ..Default::default()
                    });
                    let mut guard = self.session.lock().await;
                    if let Some(session) = guard.as_mut() {
                        session.store.mark_uploaded(&client_message_id, &patch);
                    }
                }
            }
            Err(e) => {
                warn!("upload failed for {client_message_id}: {e}");
                self.fail_message(&client_message_id).await;
            }
        }
        Ok(client_message_id)
    }

    async fn upload_file(&self, file_name: &str, bytes: &[u8]) -> Result<String, UploadError> {
        let mut boundary_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut boundary_bytes);
        let boundary = format!("----stitchchat-{}", hex::encode(boundary_bytes));

        let request = HttpRequest::post(self.config.upload_url.clone())
            .with_header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .with_body(multipart_body(&boundary, "file", file_name, bytes));

        let response = self
            .http
            .execute(request)
            .await
            .map_err(UploadError::Transport)?;
        if !response.is_success() {
            return Err(UploadError::Status(response.status_code));
        }
        let parsed = response.json().map_err(UploadError::Transport)?;
        parsed
            .get("data")
            .and_then(|d| d.get("imageUrl"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(UploadError::MissingImageUrl)
    }
}

/// Single-file multipart/form-data body.
fn multipart_body(boundary: &str, field: &str, file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_frames_the_file() {
        let body = multipart_body("XYZ", "file", "photo.png", b"abc");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\n"));
        assert!(text.contains("filename=\"photo.png\""));
        assert!(text.contains("\r\n\r\nabc\r\n--XYZ--\r\n"));
    }
}

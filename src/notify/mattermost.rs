/// Mattermost chat posts.
///
/// A figure, when there is one, is uploaded first through `/api/v4/files`
/// and the returned file IDs are attached to the post. Both calls
/// authenticate with a bot token.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::ingest::fdsn::{RETRY_BACKOFF, with_retries};
use crate::logging::{self, Subsystem};
use crate::model::AlarmError;
use crate::notify::ChatPoster;

const REQUEST_TIMEOUT_SECS: u64 = 20;
const POST_ATTEMPTS: u32 = 2;

pub struct MattermostPoster {
    url: String,
    token: String,
    default_channel: Option<String>,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    file_infos: Vec<FileInfo>,
}

impl MattermostPoster {
    pub fn new(url: &str, token: &str, default_channel: Option<String>) -> Result<Self, AlarmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(MattermostPoster {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            default_channel,
            client,
        })
    }

    fn upload(&self, channel_id: &str, path: &Path) -> Result<Vec<String>, AlarmError> {
        let form = reqwest::blocking::multipart::Form::new()
            .text("channel_id", channel_id.to_string())
            .file("files", path)?;
        let response = self
            .client
            .post(format!("{}/api/v4/files", self.url))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()?;
        if !response.status().is_success() {
            return Err(AlarmError::Upstream(format!("file upload returned {}", response.status())));
        }
        let body: UploadResponse = response.json()?;
        Ok(body.file_infos.into_iter().map(|f| f.id).collect())
    }

    fn create_post(&self, channel_id: &str, message: &str, file_ids: &[String]) -> Result<(), AlarmError> {
        let response = self
            .client
            .post(format!("{}/api/v4/posts", self.url))
            .bearer_auth(&self.token)
            .json(&json!({
                "channel_id": channel_id,
                "message": message,
                "file_ids": file_ids,
            }))
            .send()?;
        if !response.status().is_success() {
            return Err(AlarmError::Upstream(format!("post returned {}", response.status())));
        }
        Ok(())
    }
}

/// Chat markdown for an alert: bold subject heading, body with the
/// `Start:`/`End:` labels padded so the times line up.
pub fn format_chat_message(subject: &str, body: &str) -> String {
    let subject = subject.trim().trim_start_matches("--- ").trim_end_matches(" ---");
    let body = body.replace("Start: ", "Start:  ").replace("End: ", "End:    ");
    format!("### **{}**\n\n{}", subject, body)
}

impl ChatPoster for MattermostPoster {
    fn post(&self, channel_id: Option<&str>, subject: &str, body: &str, attachment: Option<&Path>)
    -> Result<(), AlarmError> {
        let Some(channel_id) = channel_id.or(self.default_channel.as_deref()) else {
            logging::debug(Subsystem::Notify, None, "no chat channel configured, post skipped");
            return Ok(());
        };
        let message = format_chat_message(subject, body);
        with_retries("mattermost", POST_ATTEMPTS, RETRY_BACKOFF, |_| {
            let file_ids = match attachment {
                Some(path) => self.upload(channel_id, path)?,
                None => Vec::new(),
            };
            self.create_post(channel_id, &message, &file_ids)
        })?;
        logging::info(Subsystem::Notify, Some(channel_id), &format!("chat post '{}' sent", subject));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_chat_message() {
        let text = format_chat_message(
            "--- Pavlof Tremor ---",
            "Start: 2024-05-01 11:00 UTC\nEnd: 2024-05-01 12:00 UTC",
        );
        assert_eq!(
            text,
            "### **Pavlof Tremor**\n\nStart:  2024-05-01 11:00 UTC\nEnd:    2024-05-01 12:00 UTC"
        );
    }

    #[test]
    fn test_plain_subject_is_kept() {
        assert_eq!(format_chat_message("Earthquake swarm at Pavlof", ""), "### **Earthquake swarm at Pavlof**\n\n");
    }

    #[test]
    fn test_upload_response_ids() {
        let body: UploadResponse =
            serde_json::from_str(r#"{"file_infos": [{"id": "abc", "name": "fig.png"}], "client_ids": []}"#).unwrap();
        assert_eq!(body.file_infos.len(), 1);
        assert_eq!(body.file_infos[0].id, "abc");
    }
}

//! History fetch and merge.
//!
//! Pulls the conversation's message history over REST, normalizes each
//! raw entry, and merges it into the store. The merge is idempotent, so
//! a history entry racing a live broadcast of the same message resolves
//! to a single stored copy no matter which lands first.

use crate::client::ChatClient;
use log::{debug, info};
use serde_json::Value;
use stitchcore::net::HttpRequest;
use stitchcore::normalize::{NormalizeContext, normalize};
use stitchcore::types::Participants;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history endpoint returned status {0}")]
    Status(u16),
    #[error("history response carried no message array")]
    MalformedResponse,
    #[error("history transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl ChatClient {
    /// Fetches and merges the active conversation's history.
    ///
    /// The response resolves on its own schedule; if the user switched
    /// conversations in the meantime, the stale continuation drops
    /// itself instead of polluting the new session.
    pub async fn refresh_history(&self) -> Result<(), HistoryError> {
        let Some((conversation_id, generation)) = ({
            let guard = self.session.lock().await;
            guard
                .as_ref()
                .map(|s| (s.conversation_id.clone(), s.generation))
        }) else {
            debug!("refresh_history with no active conversation");
            return Ok(());
        };

        let url = format!(
            "{}/conversations/{}/messages",
            self.config.api_base_url,
            urlencoding::encode(&conversation_id)
        );
        let response = self
            .http
            .execute(HttpRequest::get(url))
            .await
            .map_err(HistoryError::Transport)?;
        if !response.is_success() {
            return Err(HistoryError::Status(response.status_code));
        }
        let parsed = response.json().map_err(HistoryError::Transport)?;
        let (entries, participants) = split_history_response(parsed)?;

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };
        if session.generation != generation {
            debug!("history for {conversation_id} resolved after a conversation switch, dropping");
            return Ok(());
        }

        if let Some(participants) = participants {
            session.participants = participants;
        }

        let count = entries.len();
        for raw in entries {
            let ctx = NormalizeContext {
                participants: &session.participants,
                fallback_role: self.config.fallback_role,
                cache: Some(&session.cache),
            };
            let msg = normalize(&raw, &ctx);
            session.store.insert_or_merge(msg);
        }
        info!("merged {count} history messages into {conversation_id}");
        Ok(())
    }
}

/// The endpoint answers with either a bare message array or an envelope
/// wrapping the array, optionally alongside the participant ids used for
/// sender resolution.
fn split_history_response(
    parsed: Value,
) -> Result<(Vec<Value>, Option<Participants>), HistoryError> {
    match parsed {
        Value::Array(entries) => Ok((entries, None)),
        Value::Object(mut envelope) => {
            let entries = envelope
                .remove("messages")
                .or_else(|| envelope.remove("data"))
                .and_then(|v| match v {
                    Value::Array(entries) => Some(entries),
                    _ => None,
                })
                .ok_or(HistoryError::MalformedResponse)?;
            let participants = envelope
                .remove("participants")
                .and_then(|v| serde_json::from_value(v).ok());
            Ok((entries, participants))
        }
        _ => Err(HistoryError::MalformedResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_array_response() {
        let (entries, participants) =
            split_history_response(json!([{ "id": "1" }, { "id": "2" }])).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(participants.is_none());
    }

    #[test]
    fn envelope_with_participants() {
        let (entries, participants) = split_history_response(json!({
            "messages": [{ "id": "1" }],
            "participants": { "makerId": "m1", "creatorId": "c1" },
        }))
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(participants, Some(Participants::new("m1", "c1")));
    }

    #[test]
    fn envelope_without_messages_is_malformed() {
        assert!(matches!(
            split_history_response(json!({ "participants": {} })),
            Err(HistoryError::MalformedResponse)
        ));
        assert!(matches!(
            split_history_response(json!("nope")),
            Err(HistoryError::MalformedResponse)
        ));
    }
}

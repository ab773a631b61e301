//! The ordered, deduplicated conversation state.
//!
//! Three racing sources feed this store: the paginated history fetch,
//! locally-created optimistic messages, and live transport events. The
//! merge is keyed dedup plus field-level overlay, which makes it
//! idempotent and commutative — callers never need to care which source
//! got there first.

use crate::types::{Message, MessageStatus, Payload};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

/// Ordered conversation state with O(1) lookups by either identity.
#[derive(Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    by_server_id: HashMap<String, usize>,
    by_client_id: HashMap<String, usize>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one message from any source into the store.
    ///
    /// A message whose server id is already present is discarded outright
    /// — that absorbs the race where history fetch and live broadcast
    /// deliver the same server message twice. A message matching an
    /// existing `client_message_id` merges into that entry in place,
    /// overlaying only the fields it actually supplies. Anything else is
    /// appended, and the sequence is kept ascending by time (stable).
    pub fn insert_or_merge(&mut self, msg: Message) {
        if let Some(id) = msg.id.as_deref() {
            if self.by_server_id.contains_key(id) {
                debug!("store: duplicate server message {id}, ignoring");
                return;
            }
        }

        if let Some(cmid) = msg.client_message_id.as_deref() {
            if let Some(&pos) = self.by_client_id.get(cmid) {
                let time_changed = self.messages[pos].time != msg.time;
                self.messages[pos].absorb(&msg);
                if let Some(id) = self.messages[pos].id.clone() {
                    self.by_server_id.insert(id, pos);
                }
                if time_changed {
                    self.restore_order();
                }
                return;
            }
        }

        self.messages.push(msg);
        self.restore_order();
    }

    /// Applies a server acknowledgement to the optimistic entry minted
    /// for `client_message_id`: assigns the server id, moves the status
    /// to `sent`, and adopts the server timestamp when one was supplied.
    pub fn ack_update(
        &mut self,
        client_message_id: &str,
        server_id: &str,
        server_time: Option<DateTime<Utc>>,
    ) {
        let Some(&pos) = self.by_client_id.get(client_message_id) else {
            debug!("store: ack for unknown clientMessageId {client_message_id}, ignoring");
            return;
        };

        // The server message may already be in the store without a client
        // id (e.g. a history entry that raced ahead of this ack). Fold the
        // optimistic entry into it so the server id stays unique.
        if let Some(&existing) = self.by_server_id.get(server_id) {
            if existing != pos {
                let optimistic = self.messages.remove(pos);
                let target = if existing > pos { existing - 1 } else { existing };
                let confirmed = &mut self.messages[target];
                if confirmed.client_message_id.is_none() {
                    confirmed.client_message_id = optimistic.client_message_id.clone();
                }
                confirmed.data.fill_missing_from(&optimistic.data);
                self.restore_order();
                return;
            }
        }

        let msg = &mut self.messages[pos];
        msg.id = Some(server_id.to_string());
        msg.status = MessageStatus::Sent;
        let time_changed = match server_time {
            Some(t) => {
                let changed = msg.time != t;
                msg.time = t;
                changed
            }
            None => false,
        };
        self.by_server_id.insert(server_id.to_string(), pos);
        if time_changed {
            self.restore_order();
        }
    }

    /// Terminal failure transition. Recovery is an explicit user retry,
    /// which re-enters the pipeline as a fresh attempt.
    pub fn mark_failed(&mut self, client_message_id: &str) {
        if let Some(&pos) = self.by_client_id.get(client_message_id) {
            self.messages[pos].status = MessageStatus::Failed;
        } else {
            debug!("store: mark_failed for unknown clientMessageId {client_message_id}");
        }
    }

    /// Terminal upload transition: overlays the patch (canonical image
    /// URL and friends) and releases the locally-held file contents.
    pub fn mark_uploaded(&mut self, client_message_id: &str, patch: &Payload) {
        if let Some(&pos) = self.by_client_id.get(client_message_id) {
            let msg = &mut self.messages[pos];
            msg.status = MessageStatus::Uploaded;
            msg.data.overlay_from(patch);
            if let Payload::Image(p) = &mut msg.data {
                p.local_bytes = None;
            }
        } else {
            debug!("store: mark_uploaded for unknown clientMessageId {client_message_id}");
        }
    }

    /// Applies a delivery/read receipt to an acknowledged message.
    /// Receipts only ever upgrade: a late `delivered` after `read` is
    /// ignored.
    pub fn mark_receipt(&mut self, server_id: &str, status: MessageStatus) {
        let Some(incoming_rank) = status.receipt_rank() else {
            debug!("store: receipt with non-receipt status {status:?}, ignoring");
            return;
        };
        if let Some(&pos) = self.by_server_id.get(server_id) {
            let msg = &mut self.messages[pos];
            match msg.status.receipt_rank() {
                Some(current) if current < incoming_rank => msg.status = status,
                Some(_) => {}
                None => debug!(
                    "store: receipt for message {server_id} in state {:?}, ignoring",
                    msg.status
                ),
            }
        }
    }

    /// Removes and returns the entry for `client_message_id`. Used when a
    /// failed attempt is replaced by a user-triggered retry.
    pub fn remove_by_client_id(&mut self, client_message_id: &str) -> Option<Message> {
        let pos = self.by_client_id.remove(client_message_id)?;
        let removed = self.messages.remove(pos);
        self.restore_order();
        Some(removed)
    }

    pub fn get_by_client_id(&self, client_message_id: &str) -> Option<&Message> {
        self.by_client_id
            .get(client_message_id)
            .map(|&pos| &self.messages[pos])
    }

    pub fn get_by_server_id(&self, server_id: &str) -> Option<&Message> {
        self.by_server_id
            .get(server_id)
            .map(|&pos| &self.messages[pos])
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.by_server_id.clear();
        self.by_client_id.clear();
    }

    fn restore_order(&mut self) {
        self.messages.sort_by_key(|m| m.time);
        self.by_server_id.clear();
        self.by_client_id.clear();
        for (pos, msg) in self.messages.iter().enumerate() {
            if let Some(id) = &msg.id {
                self.by_server_id.insert(id.clone(), pos);
            }
            if let Some(cmid) = &msg.client_message_id {
                self.by_client_id.insert(cmid.clone(), pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageKind, SenderRole, UserPayload};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn user_msg(
        id: Option<&str>,
        cmid: Option<&str>,
        secs: i64,
        status: MessageStatus,
        text: &str,
    ) -> Message {
        Message {
            id: id.map(str::to_string),
            client_message_id: cmid.map(str::to_string),
            kind: MessageKind::User,
            sender: SenderRole::Creator,
            sender_id: Some("c1".into()),
            time: at(secs),
            status,
            data: Payload::User(UserPayload {
                text: text.into(),
                avatar_url: None,
            }),
        }
    }

    #[test]
    fn duplicate_server_id_is_a_no_op() {
        let mut store = ConversationState::new();
        let msg = user_msg(Some("7"), None, 100, MessageStatus::Sent, "hi");
        store.insert_or_merge(msg.clone());
        store.insert_or_merge(msg);
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn history_and_ack_converge_in_either_order() {
        let run = |ack_first: bool| {
            let mut store = ConversationState::new();
            store.insert_or_merge(user_msg(
                None,
                Some("cm-1"),
                100,
                MessageStatus::Pending,
                "hi",
            ));

            let history = user_msg(Some("42"), Some("cm-1"), 101, MessageStatus::Sent, "hi");
            if ack_first {
                store.ack_update("cm-1", "42", Some(at(101)));
                store.insert_or_merge(history);
            } else {
                store.insert_or_merge(history);
                store.ack_update("cm-1", "42", Some(at(101)));
            }

            assert_eq!(store.len(), 1);
            let msg = &store.messages()[0];
            (
                msg.id.clone(),
                msg.status,
                msg.time,
                msg.client_message_id.clone(),
            )
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn merge_preserves_optimistic_fields() {
        let mut store = ConversationState::new();
        let mut optimistic = user_msg(None, Some("cm-2"), 100, MessageStatus::Pending, "hello");
        if let Payload::User(p) = &mut optimistic.data {
            p.avatar_url = Some("https://cdn/me.png".into());
        }
        store.insert_or_merge(optimistic);

        // Server echo without the avatar.
        store.insert_or_merge(user_msg(
            Some("9"),
            Some("cm-2"),
            100,
            MessageStatus::Sent,
            "",
        ));

        assert_eq!(store.len(), 1);
        let msg = &store.messages()[0];
        assert_eq!(msg.status, MessageStatus::Sent);
        match &msg.data {
            Payload::User(p) => {
                assert_eq!(p.text, "hello");
                assert_eq!(p.avatar_url.as_deref(), Some("https://cdn/me.png"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn order_is_ascending_regardless_of_arrival() {
        let mut store = ConversationState::new();
        for (id, secs) in [("c", 300), ("a", 100), ("d", 400), ("b", 200)] {
            store.insert_or_merge(user_msg(Some(id), None, secs, MessageStatus::Sent, id));
        }
        let times: Vec<i64> = store.messages().iter().map(|m| m.time.timestamp()).collect();
        assert_eq!(times, vec![100, 200, 300, 400]);
    }

    #[test]
    fn equal_times_keep_insertion_order() {
        let mut store = ConversationState::new();
        store.insert_or_merge(user_msg(Some("x"), None, 100, MessageStatus::Sent, "first"));
        store.insert_or_merge(user_msg(Some("y"), None, 100, MessageStatus::Sent, "second"));
        let ids: Vec<&str> = store
            .messages()
            .iter()
            .map(|m| m.id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn ack_folds_optimistic_into_raced_history_entry() {
        let mut store = ConversationState::new();
        // History delivered the confirmed message without a client id.
        store.insert_or_merge(user_msg(Some("55"), None, 200, MessageStatus::Sent, "yo"));
        // The optimistic copy is still pending under its client id.
        let mut optimistic = user_msg(None, Some("cm-3"), 199, MessageStatus::Pending, "yo");
        if let Payload::User(p) = &mut optimistic.data {
            p.avatar_url = Some("https://cdn/a.png".into());
        }
        store.insert_or_merge(optimistic);
        assert_eq!(store.len(), 2);

        store.ack_update("cm-3", "55", Some(at(200)));
        assert_eq!(store.len(), 1);
        let msg = &store.messages()[0];
        assert_eq!(msg.id.as_deref(), Some("55"));
        assert_eq!(msg.client_message_id.as_deref(), Some("cm-3"));
        match &msg.data {
            Payload::User(p) => assert_eq!(p.avatar_url.as_deref(), Some("https://cdn/a.png")),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn receipts_only_upgrade() {
        let mut store = ConversationState::new();
        store.insert_or_merge(user_msg(Some("1"), None, 100, MessageStatus::Sent, "m"));
        store.mark_receipt("1", MessageStatus::Read);
        assert_eq!(store.messages()[0].status, MessageStatus::Read);
        store.mark_receipt("1", MessageStatus::Delivered);
        assert_eq!(store.messages()[0].status, MessageStatus::Read);
    }

    #[test]
    fn receipt_for_pending_message_is_ignored() {
        let mut store = ConversationState::new();
        let mut msg = user_msg(None, Some("cm-4"), 100, MessageStatus::Pending, "m");
        msg.id = Some("2".into());
        store.insert_or_merge(msg);
        store.mark_receipt("2", MessageStatus::Delivered);
        assert_eq!(store.messages()[0].status, MessageStatus::Pending);
    }

    #[test]
    fn failed_then_removed_for_retry() {
        let mut store = ConversationState::new();
        store.insert_or_merge(user_msg(
            None,
            Some("cm-5"),
            100,
            MessageStatus::Pending,
            "try",
        ));
        store.mark_failed("cm-5");
        assert_eq!(store.messages()[0].status, MessageStatus::Failed);
        let removed = store.remove_by_client_id("cm-5").unwrap();
        assert_eq!(removed.status, MessageStatus::Failed);
        assert!(store.is_empty());
        assert!(store.get_by_client_id("cm-5").is_none());
    }
}

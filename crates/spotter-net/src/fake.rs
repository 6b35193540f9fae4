//! In-process chat backend used by engine tests and local demos.
//!
//! The fake can be taken offline, told to fail a number of upcoming posts,
//! or told to hold posts until the test releases them in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};
use tracing::debug;
use uuid::Uuid;

use spotter_shared::protocol::{
    EditMessageRequest, PostMessageRequest, RoomSummary, RoomUpdate, ServerMessage,
};
use spotter_shared::{CanonicalId, ConversationId};

use crate::api::ChatApi;
use crate::error::{NetError, Result};

struct HeldPost {
    request: PostMessageRequest,
    release: oneshot::Sender<bool>,
}

#[derive(Default)]
pub struct FakeChatApi {
    offline: AtomicBool,
    hold_posts: AtomicBool,
    fail_posts: AtomicUsize,
    post_attempts: AtomicUsize,
    health_calls: AtomicUsize,
    rooms: Mutex<Vec<RoomSummary>>,
    messages: Mutex<HashMap<ConversationId, Vec<ServerMessage>>>,
    persisted: Mutex<Vec<PostMessageRequest>>,
    room_updates: Mutex<Vec<(ConversationId, RoomUpdate)>>,
    edits: Mutex<Vec<(CanonicalId, String)>>,
    deletes: Mutex<Vec<CanonicalId>>,
    held: Mutex<Vec<HeldPost>>,
    held_changed: Notify,
}

impl FakeChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rooms(rooms: Vec<RoomSummary>) -> Self {
        let fake = Self::default();
        *lock(&fake.rooms) = rooms;
        fake
    }

    /// Every call fails with [`NetError::Unreachable`] while offline.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Fail the next `n` posts with a 503 regardless of connectivity.
    pub fn fail_next_posts(&self, n: usize) {
        self.fail_posts.store(n, Ordering::SeqCst);
    }

    /// Park posts until [`release`](Self::release) is called for them.
    pub fn hold_posts(&self, hold: bool) {
        self.hold_posts.store(hold, Ordering::SeqCst);
    }

    /// Seed server-side history for a room.
    pub fn seed_history(&self, room: &ConversationId, history: Vec<ServerMessage>) {
        lock(&self.messages).insert(room.clone(), history);
    }

    /// Wait until at least `n` posts are parked.
    pub async fn wait_for_held(&self, n: usize) {
        loop {
            let notified = self.held_changed.notified();
            if lock(&self.held).len() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Let the parked post whose text is `text` complete.  `succeed = false`
    /// makes it fail with a 503.  Returns whether such a post was parked.
    pub fn release(&self, text: &str, succeed: bool) -> bool {
        let mut held = lock(&self.held);
        match held.iter().position(|h| h.request.text == text) {
            Some(pos) => {
                let post = held.remove(pos);
                let _ = post.release.send(succeed);
                true
            }
            None => false,
        }
    }

    pub fn held_count(&self) -> usize {
        lock(&self.held).len()
    }

    /// Total `POST /messages` calls, successful or not.
    pub fn post_attempts(&self) -> usize {
        self.post_attempts.load(Ordering::SeqCst)
    }

    /// Requests that were persisted, in completion order.
    pub fn persisted(&self) -> Vec<PostMessageRequest> {
        lock(&self.persisted).clone()
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn room_updates(&self) -> Vec<(ConversationId, RoomUpdate)> {
        lock(&self.room_updates).clone()
    }

    pub fn edits(&self) -> Vec<(CanonicalId, String)> {
        lock(&self.edits).clone()
    }

    pub fn deletes(&self) -> Vec<CanonicalId> {
        lock(&self.deletes).clone()
    }

    fn reachable(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(NetError::Unreachable)
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable() -> NetError {
    NetError::Status {
        status: 503,
        body: "service unavailable".into(),
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        self.reachable()?;
        Ok(lock(&self.rooms).clone())
    }

    async fn room_messages(&self, room: &ConversationId) -> Result<Vec<ServerMessage>> {
        self.reachable()?;
        Ok(lock(&self.messages).get(room).cloned().unwrap_or_default())
    }

    async fn post_message(&self, request: &PostMessageRequest) -> Result<ServerMessage> {
        self.post_attempts.fetch_add(1, Ordering::SeqCst);

        if self.hold_posts.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            lock(&self.held).push(HeldPost {
                request: request.clone(),
                release: tx,
            });
            self.held_changed.notify_waiters();
            debug!(text = %request.text, "Holding post");
            if !rx.await.unwrap_or(false) {
                return Err(unavailable());
            }
        }

        self.reachable()?;
        if self
            .fail_posts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(unavailable());
        }

        let message = ServerMessage {
            id: CanonicalId::new(Uuid::new_v4().to_string()),
            room_id: request.room_id.clone(),
            sender_id: request.sender_id.clone(),
            text: request.text.clone(),
            timestamp: chrono::Utc::now(),
            message_type: request.message_type,
            file_meta: request.file_meta.clone(),
            reply_to_id: request.reply_to_id.clone(),
            is_edited: false,
        };
        lock(&self.messages)
            .entry(request.room_id.clone())
            .or_default()
            .push(message.clone());
        lock(&self.persisted).push(request.clone());
        Ok(message)
    }

    async fn update_room(&self, room: &ConversationId, update: &RoomUpdate) -> Result<()> {
        self.reachable()?;
        lock(&self.room_updates).push((room.clone(), update.clone()));
        Ok(())
    }

    async fn edit_message(&self, id: &CanonicalId, edit: &EditMessageRequest) -> Result<()> {
        self.reachable()?;
        lock(&self.edits).push((id.clone(), edit.text.clone()));
        Ok(())
    }

    async fn delete_message(&self, id: &CanonicalId) -> Result<()> {
        self.reachable()?;
        lock(&self.deletes).push(id.clone());
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.reachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotter_shared::MessageType;
    use std::sync::Arc;

    fn request(text: &str) -> PostMessageRequest {
        PostMessageRequest {
            text: text.into(),
            room_id: ConversationId::new("r1"),
            sender_id: "coach".into(),
            timestamp: chrono::Utc::now(),
            message_type: MessageType::Text,
            file_meta: None,
            reply_to_id: None,
        }
    }

    #[tokio::test]
    async fn offline_fake_rejects_calls() {
        let api = FakeChatApi::new();
        api.set_online(false);
        assert!(matches!(api.health().await, Err(NetError::Unreachable)));
        assert!(api.post_message(&request("hi")).await.is_err());
        assert_eq!(api.post_attempts(), 1);
        assert!(api.persisted().is_empty());
    }

    #[tokio::test]
    async fn fail_next_posts_counts_down() {
        let api = FakeChatApi::new();
        api.fail_next_posts(1);
        assert!(api.post_message(&request("a")).await.is_err());
        assert!(api.post_message(&request("b")).await.is_ok());
        assert_eq!(api.persisted().len(), 1);
    }

    #[tokio::test]
    async fn held_posts_complete_in_release_order() {
        let api = Arc::new(FakeChatApi::new());
        api.hold_posts(true);

        let a = tokio::spawn({
            let api = api.clone();
            async move { api.post_message(&request("A")).await }
        });
        let b = tokio::spawn({
            let api = api.clone();
            async move { api.post_message(&request("B")).await }
        });

        api.wait_for_held(2).await;
        assert!(api.release("B", true));
        assert!(b.await.unwrap().is_ok());
        assert!(api.release("A", true));
        assert!(a.await.unwrap().is_ok());

        let texts: Vec<_> = api.persisted().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["B", "A"]);
    }
}

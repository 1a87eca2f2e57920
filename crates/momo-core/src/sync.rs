// ── Full-collection loads ──
//
// Cold start and refresh over REST. Each load seeds an untouched
// collection from the offline cache, takes a load ticket, fetches, and
// applies the snapshot fenced against push events that raced the fetch.
// Fetch failures are returned to the caller; the store is left as is.

use std::future::Future;

use momo_api::models::NewRequest;
use momo_api::{RestClient, UserRole};
use tracing::{debug, warn};

use crate::config::UserContext;
use crate::error::CoreError;
use crate::model::{
    ChatMessage, ChatRoom, CollectionKey, Record, RecordId, RequestItem, RequestStatus,
};
use crate::reconcile::Reconciler;
use crate::store::ReplaceOutcome;

/// Loads full snapshots from the REST API into the store.
#[derive(Clone)]
pub struct Synchronizer {
    rest: RestClient,
    reconciler: Reconciler,
    user: Option<UserContext>,
}

impl Synchronizer {
    pub fn new(rest: RestClient, reconciler: Reconciler, user: Option<UserContext>) -> Self {
        Self {
            rest,
            reconciler,
            user,
        }
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn user(&self) -> Option<&UserContext> {
        self.user.as_ref()
    }

    // ── Loads ────────────────────────────────────────────────────────

    pub async fn load_rooms(&self) -> Result<ReplaceOutcome, CoreError> {
        self.load(CollectionKey::Rooms, self.rest.list_chats()).await
    }

    pub async fn load_messages(&self, chat_id: &RecordId) -> Result<ReplaceOutcome, CoreError> {
        self.load(
            CollectionKey::Messages(chat_id.clone()),
            self.rest.list_messages(chat_id),
        )
        .await
    }

    /// Requests addressed to (managers) or sent by (employees) the user.
    pub async fn load_requests(&self) -> Result<ReplaceOutcome, CoreError> {
        let user = self.require_user()?;
        self.load(
            CollectionKey::Requests,
            self.rest.list_requests(user.role, &user.user_id),
        )
        .await
    }

    pub async fn load_assignments(&self) -> Result<ReplaceOutcome, CoreError> {
        let user = self.require_user()?;
        self.load(
            CollectionKey::Assignments,
            self.rest.list_assignments(&user.user_id),
        )
        .await
    }

    /// Replace the unassigned-employee collection with the matches for
    /// `query` (empty matches everyone).
    pub async fn search_unassigned(&self, query: &str) -> Result<ReplaceOutcome, CoreError> {
        self.load(
            CollectionKey::Unassigned,
            self.rest.search_unassigned_employees(query),
        )
        .await
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Post a chat message and merge the stored copy the server returns.
    ///
    /// The server also pushes the message back on the messages queue; the
    /// merge is idempotent, so whichever lands second replaces in place.
    pub async fn send_message(
        &self,
        chat_id: &RecordId,
        text: &str,
    ) -> Result<ChatMessage, CoreError> {
        let message = self.rest.send_message(chat_id, text).await?;
        self.reconciler
            .merge_record(&CollectionKey::Messages(chat_id.clone()), message.clone())?;
        Ok(message)
    }

    /// Open (or reuse) the direct chat between a manager and an employee.
    /// The returned room is upserted at the top of the room list.
    pub async fn create_direct_chat(
        &self,
        manager_id: &RecordId,
        employee_id: &RecordId,
    ) -> Result<ChatRoom, CoreError> {
        let room = self.rest.create_direct_chat(manager_id, employee_id).await?;
        self.reconciler
            .merge_record(&CollectionKey::Rooms, room.clone())?;
        Ok(room)
    }

    /// Send a join request from the signed-in manager to `employee_id`.
    /// The new request is prepended to the request feed.
    pub async fn create_request(
        &self,
        employee_id: &RecordId,
        message: Option<&str>,
    ) -> Result<RequestItem, CoreError> {
        let user = self.require_user()?;
        if user.role != UserRole::Manager {
            return Err(CoreError::Config {
                message: "only managers can send requests".into(),
            });
        }
        let request = self
            .rest
            .create_request(&NewRequest {
                manager_id: &user.user_id,
                employee_id,
                message,
            })
            .await?;
        self.reconciler
            .merge_record(&CollectionKey::Requests, request.clone())?;
        Ok(request)
    }

    /// Approve or reject a request; the answer replaces it in place.
    pub async fn update_request_status(
        &self,
        request_id: &RecordId,
        status: RequestStatus,
    ) -> Result<RequestItem, CoreError> {
        let request = self.rest.update_request_status(request_id, status).await?;
        self.reconciler
            .merge_record(&CollectionKey::Requests, request.clone())?;
        Ok(request)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn require_user(&self) -> Result<&UserContext, CoreError> {
        self.user.as_ref().ok_or_else(|| CoreError::Config {
            message: "no signed-in user configured for user-scoped loads".into(),
        })
    }

    /// `fetch` is lazy: nothing goes over the wire until the ticket has
    /// been taken.
    async fn load<T, F>(&self, key: CollectionKey, fetch: F) -> Result<ReplaceOutcome, CoreError>
    where
        T: Record,
        F: Future<Output = Result<Vec<T>, momo_api::Error>>,
    {
        let seeded = self.reconciler.seed_from_cache::<T>(&key)?;
        let ticket = self.reconciler.load_ticket::<T>(&key)?;
        debug!(collection = %key, seeded, ticket = ticket.seq(), "loading collection");

        let records = match fetch.await {
            Ok(records) => records,
            Err(e) => {
                warn!(collection = %key, error = %e, "full load failed");
                return Err(e.into());
            }
        };
        self.reconciler.replace_collection_fenced(&key, records, ticket)
    }
}


use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::{ServiceError, StoreError};
use crate::giveaway::domain::{
    Address, CompletedTask, DroplistDocument, LeaderboardRow, MetadataUpdateRequest, Task,
    TasksDocument, User, UsersDocument, XRequest, XRequestsDocument,
};
use crate::giveaway::ops;
use crate::oauth::XOAuthClient;
use crate::storage::{PersistentJson, StoreRegistry};
use crate::verify::SignatureVerifier;

pub const TASKS_KEY: &str = "tasks";
pub const USERS_KEY: &str = "users";
pub const X_REQUESTS_KEY: &str = "xRequests";
pub const DROPLIST_KEY: &str = "droplist";

/// The four documents the giveaway keeps.
#[derive(Clone)]
pub struct GiveawayStores {
    pub tasks: PersistentJson<TasksDocument>,
    pub users: PersistentJson<UsersDocument>,
    pub x_requests: PersistentJson<XRequestsDocument>,
    pub droplist: PersistentJson<DroplistDocument>,
}

impl GiveawayStores {
    pub fn open(registry: &StoreRegistry) -> Result<Self, StoreError> {
        Ok(Self {
            tasks: registry.open(TASKS_KEY, TasksDocument::new())?,
            users: registry.open(USERS_KEY, UsersDocument::new())?,
            x_requests: registry.open(X_REQUESTS_KEY, XRequestsDocument::new())?,
            droplist: registry.open(DROPLIST_KEY, DroplistDocument::new())?,
        })
    }
}

pub fn metadata_request_message(request: &str) -> String {
    format!("Accept Openmesh Giveaway metadata request: {request}")
}

pub fn droplist_message(address: &Address) -> String {
    format!("Register for Openmesh droplist: {address}")
}

/// Where the X login flow sends the user.
#[derive(Debug, Clone)]
pub struct XRedirects {
    /// Callback registered with X, pointing at `/giveaway/callbackX`.
    pub callback_uri: String,
    /// Page the user lands on after a successful link.
    pub success_uri: String,
}

pub struct GiveawayService {
    stores: GiveawayStores,
    verifier: Arc<dyn SignatureVerifier>,
    x_client: Option<Arc<dyn XOAuthClient>>,
    x_redirects: XRedirects,
}

impl GiveawayService {
    pub fn new(
        stores: GiveawayStores,
        verifier: Arc<dyn SignatureVerifier>,
        x_client: Option<Arc<dyn XOAuthClient>>,
        x_redirects: XRedirects,
    ) -> Self {
        Self { stores, verifier, x_client, x_redirects }
    }

    pub fn stores(&self) -> &GiveawayStores {
        &self.stores
    }

    pub fn x_redirects(&self) -> &XRedirects {
        &self.x_redirects
    }

    async fn require_signature(&self, address: &Address, message: &str, signature: &[u8]) -> Result<(), ServiceError> {
        if self.verifier.verify(address, message, signature).await? {
            Ok(())
        } else {
            Err(ServiceError::Validation("signature is not valid".into()))
        }
    }

    fn x_client(&self) -> Result<&Arc<dyn XOAuthClient>, ServiceError> {
        self.x_client
            .as_ref()
            .ok_or_else(|| ServiceError::Internal("X secrets not set up on this server".into()))
    }

    pub async fn leaderboard(&self, address: &Address) -> Result<Vec<LeaderboardRow>, ServiceError> {
        let users = self.stores.users.get().await?;
        Ok(ops::leaderboard(&users, address, ops::LEADERBOARD_TOP))
    }

    pub async fn user(&self, address: &Address) -> Result<User, ServiceError> {
        let users = self.stores.users.get().await?;
        users.get(address).cloned().ok_or_else(|| ServiceError::not_found("user"))
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, ServiceError> {
        Ok(self.stores.tasks.get().await?)
    }

    /// Apply a pending metadata change once its owner signed it.
    ///
    /// `raw_request` is the exact JSON text that was signed.
    pub async fn accept_metadata_request(
        &self,
        address: Address,
        raw_request: &str,
        signature: &[u8],
    ) -> Result<(), ServiceError> {
        self.require_signature(&address, &metadata_request_message(raw_request), signature).await?;
        let request: MetadataUpdateRequest = serde_json::from_str(raw_request)
            .map_err(|e| ServiceError::Validation(format!("request is not a valid metadata request: {e}")))?;

        self.stores
            .users
            .update(move |users| ops::accept_metadata_request(users, &address, &request))
            .await?;
        info!(%address, "metadata request accepted");
        Ok(())
    }

    /// Start an X login for `address`; returns the URL to send the user to.
    pub async fn start_x_login(&self, address: Address) -> Result<String, ServiceError> {
        let link = self.x_client()?.authorization_link(&self.x_redirects.callback_uri)?;
        let request = XRequest { code_verifier: link.code_verifier, address };
        let state = link.state;
        self.stores
            .x_requests
            .update(move |pending| -> Result<(), ServiceError> {
                pending.insert(state, request);
                Ok(())
            })
            .await?;
        Ok(link.url)
    }

    /// Finish an X login: exchange the code and queue the handle for the
    /// address that started the flow. The state token is single use.
    pub async fn finish_x_login(&self, state: &str, code: &str) -> Result<String, ServiceError> {
        let client = self.x_client()?;
        let state_key = state.to_string();
        let pending = self
            .stores
            .x_requests
            .update(move |pending| -> Result<Option<XRequest>, ServiceError> { Ok(pending.remove(&state_key)) })
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("state query param is invalid (expired?)".into()))?;

        let username = client
            .exchange(code, &pending.code_verifier, &self.x_redirects.callback_uri)
            .await
            .map_err(|e| {
                warn!(address = %pending.address, error = %e, "X login failed");
                ServiceError::Unauthorized("invalid verifier or access tokens".into())
            })?;

        let address = pending.address;
        let handle = username.clone();
        self.stores
            .users
            .update(move |users| ops::queue_x_link(users, address, &handle))
            .await?;
        info!(%address, x = %username, "X account queued for confirmation");
        Ok(username)
    }

    /// Award the points of task `task_index` to `address`.
    pub async fn complete_task(&self, address: Address, task_index: usize) -> Result<CompletedTask, ServiceError> {
        let tasks = self.stores.tasks.get().await?;
        let completed = self
            .stores
            .users
            .update(move |users| ops::complete_task(users, &tasks, address, task_index))
            .await?;
        info!(%address, task_index, points = completed.points, "task completed");
        Ok(completed)
    }

    /// Replace the task list.
    pub async fn set_tasks(&self, tasks: Vec<Task>) -> Result<(), ServiceError> {
        if tasks.iter().any(|t| t.description.trim().is_empty()) {
            return Err(ServiceError::Validation("task description required".into()));
        }
        self.stores
            .tasks
            .update(move |current| -> Result<(), ServiceError> {
                *current = tasks;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn register_droplist(&self, address: Address, signature: Vec<u8>) -> Result<usize, ServiceError> {
        self.require_signature(&address, &droplist_message(&address), &signature).await?;
        let now = Utc::now();
        let slot = self
            .stores
            .droplist
            .update(move |droplist| ops::register_droplist(droplist, address, signature, now))
            .await?;
        info!(%address, slot, "droplist registration");
        Ok(slot)
    }

    pub async fn droplist_slot(&self, address: &Address) -> Result<Option<usize>, ServiceError> {
        let droplist = self.stores.droplist.get().await?;
        Ok(ops::droplist_slot(&droplist, address))
    }
}

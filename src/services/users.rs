use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::users::{self, UserDetails, UserListing, UserSummary, UserUpdate};
use crate::repositories::{LedgerError, LedgerStore};

pub enum UserRequest {
    RegisterUser {
        new_user: users::NewUser,
        response: oneshot::Sender<Result<users::User, ServiceError>>,
    },
    GetUser {
        id: String,
        response: oneshot::Sender<Result<Option<users::User>, ServiceError>>,
    },
    ListUsers {
        response: oneshot::Sender<Result<Vec<UserListing>, ServiceError>>,
    },
    GetUserDetails {
        id: String,
        response: oneshot::Sender<Result<UserDetails, ServiceError>>,
    },
    UpdateUser {
        id: String,
        update: UserUpdate,
        response: oneshot::Sender<Result<users::User, ServiceError>>,
    },
    DeleteUser {
        id: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    store: Arc<dyn LedgerStore>,
}

impl UserRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        UserRequestHandler { store }
    }

    pub async fn register_user(
        &self,
        new_user: users::NewUser,
    ) -> Result<users::User, ServiceError> {
        let user = self.store.register_user(&new_user).await.map_err(|e| {
            log::warn!("Registration of {} failed: {}", new_user.email, e);
            ServiceError::from(e)
        })?;

        match &user.referred_by {
            Some(referrer_id) => log::info!(
                "Registered user {} referred by {}.",
                user.id,
                referrer_id
            ),
            None => log::info!("Registered user {}.", user.id),
        }

        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<users::User>, ServiceError> {
        Ok(self.store.get_user(id).await?)
    }

    /// Newest first, each with the summary of whoever referred them.
    pub async fn list_users(&self) -> Result<Vec<UserListing>, ServiceError> {
        let users = self.store.list_users().await?;
        let summaries: HashMap<&str, UserSummary> = users
            .iter()
            .map(|user| (user.id.as_str(), UserSummary::from(user)))
            .collect();

        Ok(users
            .iter()
            .map(|user| UserListing {
                user: user.clone(),
                referrer: user
                    .referred_by
                    .as_deref()
                    .and_then(|id| summaries.get(id).cloned()),
            })
            .collect())
    }

    pub async fn get_user_details(&self, id: &str) -> Result<UserDetails, ServiceError> {
        let user = self
            .store
            .get_user(id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(id.to_string()))?;

        let referrer = match user.referred_by.as_deref() {
            Some(referrer_id) => self
                .store
                .get_user(referrer_id)
                .await?
                .map(|referrer| UserSummary::from(&referrer)),
            None => None,
        };
        let referrals = self.store.list_referrals(Some(id)).await?;

        Ok(UserDetails {
            user,
            referrer,
            referrals,
        })
    }

    pub async fn update_user(
        &self,
        id: &str,
        update: UserUpdate,
    ) -> Result<users::User, ServiceError> {
        let user = self.store.update_user(id, &update).await.map_err(|e| {
            log::warn!("Update of user {} failed: {}", id, e);
            ServiceError::from(e)
        })?;
        log::info!("Updated user {}.", user.id);

        Ok(user)
    }

    /// Creates the configured admin, or promotes the user already holding
    /// that email.
    pub async fn seed_admin(&self, name: &str, email: &str) -> Result<users::User, ServiceError> {
        let user = match self.store.find_user_by_email(email).await? {
            Some(user) if user.is_admin => user,
            Some(user) => {
                let update = UserUpdate {
                    name: Some(name.to_string()),
                    email: None,
                    is_admin: Some(true),
                };
                self.store.update_user(&user.id, &update).await?
            }
            None => {
                let new_user = users::NewUser {
                    name: name.to_string(),
                    email: email.to_string(),
                    referral_code: None,
                    is_admin: true,
                };
                self.store.register_user(&new_user).await?
            }
        };
        log::info!("Admin user {} ({}) is ready.", user.id, user.email);

        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ServiceError> {
        self.store.delete_user(id).await?;
        log::info!("Deleted user {}.", id);

        Ok(())
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::RegisterUser { new_user, response } => {
                let user = self.register_user(new_user).await;
                let _ = response.send(user);
            }
            UserRequest::GetUser { id, response } => {
                let user = self.get_user(&id).await;
                let _ = response.send(user);
            }
            UserRequest::ListUsers { response } => {
                let users = self.list_users().await;
                let _ = response.send(users);
            }
            UserRequest::GetUserDetails { id, response } => {
                let details = self.get_user_details(&id).await;
                let _ = response.send(details);
            }
            UserRequest::UpdateUser {
                id,
                update,
                response,
            } => {
                let user = self.update_user(&id, update).await;
                let _ = response.send(user);
            }
            UserRequest::DeleteUser { id, response } => {
                let result = self.delete_user(&id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

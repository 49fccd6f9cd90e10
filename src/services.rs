use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::{LedgerError, LedgerStore};
use crate::settings::Referrals;

pub mod http;
pub mod referrals;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

#[derive(Clone)]
pub struct ServiceChannels {
    pub referral_channel: mpsc::Sender<referrals::ReferralRequest>,
    pub user_channel: mpsc::Sender<users::UserRequest>,
}

pub fn start_services(store: Arc<dyn LedgerStore>, settings: Referrals) -> ServiceChannels {
    let (referral_tx, mut referral_rx) = mpsc::channel(512);
    let (user_tx, mut user_rx) = mpsc::channel(512);

    let mut referral_service = referrals::ReferralService::new();
    let mut user_service = users::UserService::new();

    log::info!("Starting referral service.");
    let referral_store = store.clone();
    tokio::spawn(async move {
        referral_service
            .run(
                referrals::ReferralRequestHandler::new(referral_store, settings),
                &mut referral_rx,
            )
            .await;
    });

    log::info!("Starting user service.");
    tokio::spawn(async move {
        user_service
            .run(users::UserRequestHandler::new(store), &mut user_rx)
            .await;
    });

    log::info!("Started services.");
    ServiceChannels {
        referral_channel: referral_tx,
        user_channel: user_tx,
    }
}

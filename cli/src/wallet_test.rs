use super::*;
use commander::SessionManager;
use commander::net::types::{Challenge, ConnectRequest, MessageResponse, OAuthRedirect, UserPublic};
use commander::net::{ApiError, IdentityApi};
use commander::storage::MemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};

const ADDRESS: &str = "0x9f8e7d6c5b4a39281706f5e4d3c2b1a098765432";

/// Backend whose stored cookie has expired: every profile read is a 401.
#[derive(Default)]
struct ExpiredBackend {
    challenges: AtomicUsize,
}

#[async_trait::async_trait]
impl IdentityApi for ExpiredBackend {
    async fn challenge(&self, wallet_address: &str) -> Result<Challenge, ApiError> {
        self.challenges.fetch_add(1, Ordering::SeqCst);
        Ok(Challenge { message_to_sign: format!("Sign in as {wallet_address}"), nonce: "n-1".into() })
    }

    async fn connect(&self, _request: &ConnectRequest) -> Result<MessageResponse, ApiError> {
        Ok(MessageResponse { message: None })
    }

    async fn logout(&self) -> Result<MessageResponse, ApiError> {
        Ok(MessageResponse { message: None })
    }

    async fn current_user(&self) -> Result<UserPublic, ApiError> {
        Err(ApiError::Unauthorized { detail: Some("Not authenticated".into()) })
    }

    async fn initiate_oauth(&self, _platform: &str) -> Result<OAuthRedirect, ApiError> {
        Ok(OAuthRedirect { redirect_url: None })
    }
}

fn session(api: Arc<ExpiredBackend>, wallet: Arc<PromptWallet>, store: Arc<MemoryStore>) -> SessionManager {
    SessionManager::new(api, wallet, store, Arc::new(PrintNavigator))
}

#[test]
fn saved_wallet_follows_store() {
    let store = Arc::new(MemoryStore::new());
    let wallet = PromptWallet::saved(store.clone());
    assert!(!wallet.connection_state().is_connected);

    store.set(WALLET_ADDRESS_KEY, ADDRESS).unwrap();
    assert_eq!(wallet.address().as_deref(), Some(ADDRESS));

    wallet.set_address(None);
    assert!(store.get(WALLET_ADDRESS_KEY).is_none());
}

#[tokio::test]
async fn expired_session_does_not_request_challenge() {
    let store = Arc::new(MemoryStore::new());
    store.set(WALLET_ADDRESS_KEY, ADDRESS).unwrap();
    let api = Arc::new(ExpiredBackend::default());
    let wallet = Arc::new(PromptWallet::saved(store.clone()));
    let manager = session(api.clone(), wallet.clone(), store.clone());

    manager.hydrate().await;

    assert_eq!(api.challenges.load(Ordering::SeqCst), 0);
    assert!(wallet.address().is_none());
    assert!(!manager.state().is_authenticated());
}

#[tokio::test]
async fn saved_wallet_refuses_to_sign() {
    let wallet = PromptWallet::saved(Arc::new(MemoryStore::new()));
    assert!(matches!(wallet.sign_message("Sign in").await, Err(WalletError::Provider(_))));
}

#[tokio::test]
async fn prompt_wallet_disconnect_forgets_address() {
    let wallet = PromptWallet::prompt();
    wallet.set_address(Some(ADDRESS.into()));
    assert!(wallet.connection_state().is_connected);

    wallet.disconnect().await.unwrap();
    assert!(wallet.address().is_none());
}

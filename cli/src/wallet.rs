//! Terminal stand-ins for the wallet and the browser.
//!
//! The CLI never holds a private key. When the backend issues a challenge,
//! the message is printed and the user pastes the signature produced by
//! their own wallet.

use std::sync::{Arc, Mutex};

use commander::session::Navigator;
use commander::storage::KeyValueStore;
use commander::wallet::{ConnectionState, WalletError, WalletProvider};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Signed-in address carried between invocations. Written only while the
/// session is authenticated, so any session wipe removes it.
pub const WALLET_ADDRESS_KEY: &str = "wallet_address";

pub struct PromptWallet {
    source: AddressSource,
}

enum AddressSource {
    /// `login`: the address from the command line; signatures are read from
    /// the terminal.
    Prompt(Mutex<Option<String>>),
    /// Every other command: whatever the last sign-in saved. An expired
    /// session wipes it, which reads as a disconnect.
    Saved(Arc<dyn KeyValueStore>),
}

impl PromptWallet {
    pub fn prompt() -> Self {
        Self { source: AddressSource::Prompt(Mutex::new(None)) }
    }

    pub fn saved(store: Arc<dyn KeyValueStore>) -> Self {
        Self { source: AddressSource::Saved(store) }
    }

    pub fn address(&self) -> Option<String> {
        match &self.source {
            AddressSource::Prompt(address) => address.lock().ok().and_then(|a| a.clone()),
            AddressSource::Saved(store) => store.get(WALLET_ADDRESS_KEY),
        }
    }

    pub fn set_address(&self, address: Option<String>) {
        match &self.source {
            AddressSource::Prompt(slot) => {
                if let Ok(mut slot) = slot.lock() {
                    *slot = address;
                }
            }
            AddressSource::Saved(store) => {
                let result = match address {
                    Some(address) => store.set(WALLET_ADDRESS_KEY, &address),
                    None => store.delete(WALLET_ADDRESS_KEY),
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to update saved wallet address");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl WalletProvider for PromptWallet {
    fn connection_state(&self) -> ConnectionState {
        self.address().map_or_else(ConnectionState::disconnected, ConnectionState::connected)
    }

    async fn sign_message(&self, message: &str) -> Result<String, WalletError> {
        if matches!(self.source, AddressSource::Saved(_)) {
            return Err(WalletError::Provider("session expired; run `commander login` to sign in again".into()));
        }

        let mut stderr = tokio::io::stderr();
        let prompt = format!("\nSign this message with your wallet:\n\n{message}\n\nSignature (empty to cancel): ");
        stderr
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| WalletError::Provider(e.to_string()))?;
        stderr.flush().await.map_err(|e| WalletError::Provider(e.to_string()))?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| WalletError::Provider(e.to_string()))?;

        let signature = line.trim();
        if signature.is_empty() {
            return Err(WalletError::Rejected);
        }
        Ok(signature.to_string())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.set_address(None);
        Ok(())
    }
}

/// Prints authorization URLs instead of opening a browser.
pub struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn navigate(&self, url: &str) {
        println!("Open this URL in your browser to continue:\n  {url}");
    }
}

#[cfg(test)]
#[path = "wallet_test.rs"]
mod tests;

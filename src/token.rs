//! Session generations and the tokens that observe them
//!
//! Every scan session gets a new generation number. Work started for one
//! generation carries a [`SessionToken`] and checks it after each await: once
//! the generation moves on (close, success, camera switch) the token is stale
//! and the work must discard its result.

use tokio::sync::watch;

/// Source of session generations
#[derive(Debug)]
pub struct Generations {
    tx: watch::Sender<u64>,
}

impl Generations {
    /// Start at generation zero
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Current generation
    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Move to the next generation, invalidating every outstanding token
    pub fn advance(&self) -> SessionToken {
        self.tx.send_modify(|g| *g += 1);
        self.token()
    }

    /// Token for the current generation
    pub fn token(&self) -> SessionToken {
        let rx = self.tx.subscribe();
        let generation = *rx.borrow();
        SessionToken { generation, rx }
    }
}

impl Default for Generations {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle proving that work belongs to a still-wanted session
#[derive(Debug, Clone)]
pub struct SessionToken {
    generation: u64,
    rx: watch::Receiver<u64>,
}

impl SessionToken {
    /// Generation this token was issued for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the session is still wanted
    pub fn is_live(&self) -> bool {
        *self.rx.borrow() == self.generation
    }

    /// Resolve once the session is no longer wanted
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let generation = self.generation;
        // A dropped sender means the session itself is gone
        let _ = rx.wait_for(|current| *current != generation).await;
    }
}

//! Single-use browser tokens
//!
//! Browsers get a fresh token with every homepage render and spend it on
//! the reseed form. Tokens are sixteen random letters, live for four
//! minutes, and the store holds at most fifty of them: issuing past the
//! cap first drops expired entries, then the oldest ones.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::Rng;

const TOKEN_LEN: usize = 16;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Soft cap on stored tokens.
const MAX_TOKENS: usize = 50;

/// Token lifetime from issuance.
const TOKEN_TTL: Duration = Duration::from_secs(4 * 60);

pub struct TokenStore {
    ttl: Duration,
    issued: Mutex<HashMap<String, Instant>>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        Self::with_ttl(TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        TokenStore {
            ttl,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh token, evicting as needed so the store never leaves
    /// this call holding more than the cap.
    pub fn issue(&self) -> String {
        let mut issued = self.issued.lock();
        let now = Instant::now();

        let token = random_alpha_token();
        issued.insert(token.clone(), now);

        if issued.len() > MAX_TOKENS {
            let ttl = self.ttl;
            issued.retain(|t, at| *t == token || now.duration_since(*at) <= ttl);
            while issued.len() > MAX_TOKENS {
                let oldest = issued
                    .iter()
                    .filter(|(t, _)| **t != token)
                    .min_by_key(|(_, at)| **at)
                    .map(|(t, _)| t.clone());
                match oldest {
                    Some(t) => issued.remove(&t),
                    None => break,
                };
            }
        }

        token
    }

    /// Spend a token. True exactly once per fresh token; expired tokens
    /// are removed and refused.
    pub fn consume(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }

        let mut issued = self.issued.lock();
        match issued.remove(token) {
            Some(t) => t.elapsed() <= self.ttl,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.issued.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.lock().is_empty()
    }
}

/// Sixteen letters from OS entropy.
fn random_alpha_token() -> String {
    let mut token = String::with_capacity(TOKEN_LEN);
    for _ in 0..TOKEN_LEN {
        let idx = OsRng.gen_range(0..LETTERS.len());
        token.push(LETTERS[idx] as char);
    }
    token
}

//! Anti-forgery tokens gating `announce_peer` (spec §4.3).
//!
//! Grounded in `original_source/dht_token_manager.cpp`: a current secret and
//! a previous secret, rotated on a timer so a token issued just before
//! rotation is still valid just after it (no flapping at rotation, spec §3).

use krpc_encoding::compact::Addr;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SECRET_LEN: usize = 20;

struct Secrets {
    current: [u8; SECRET_LEN],
    previous: Option<[u8; SECRET_LEN]>,
    last_rotated: Instant,
}

pub struct TokenStore {
    secrets: Mutex<Secrets>,
    rotation_interval: Duration,
}

impl TokenStore {
    pub fn new(rotation_interval: Duration) -> TokenStore {
        TokenStore {
            secrets: Mutex::new(Secrets {
                current: random_secret(),
                previous: None,
                last_rotated: Instant::now(),
            }),
            rotation_interval,
        }
    }

    /// `issue(source) := H(secret_current || canonical(source))`, truncated
    /// to 20 bytes (spec §4.3).
    pub fn issue(&self, source: &Addr) -> Vec<u8> {
        let secrets = self.secrets.lock().unwrap();
        hash_token(&secrets.current, source)
    }

    /// `validate(token, source) := token in {H(s_current||c(source)),
    /// H(s_prev||c(source))}` (spec §4.3).
    pub fn validate(&self, token: &[u8], source: &Addr) -> bool {
        let secrets = self.secrets.lock().unwrap();
        if hash_token(&secrets.current, source) == token {
            return true;
        }
        if let Some(prev) = &secrets.previous {
            if hash_token(prev, source) == token {
                return true;
            }
        }
        false
    }

    /// Discards the old previous secret, promotes current to previous, and
    /// mints a fresh current secret.
    pub fn rotate(&self) {
        let mut secrets = self.secrets.lock().unwrap();
        secrets.previous = Some(secrets.current);
        secrets.current = random_secret();
        secrets.last_rotated = Instant::now();
        log::debug!("token secret rotated");
    }

    /// Whether enough time has elapsed since the last rotation to warrant
    /// another one — the background rotation-checker task calls this on a
    /// timer rather than rotating unconditionally (spec §4.3, §5).
    pub fn needs_rotation(&self) -> bool {
        let secrets = self.secrets.lock().unwrap();
        secrets.last_rotated.elapsed() >= self.rotation_interval
    }

    /// Runs the rotation check every `check_interval` until cancelled.
    pub async fn run_rotation_checker(&self, check_interval: Duration) {
        let mut ticker = tokio::time::interval(check_interval);
        loop {
            ticker.tick().await;
            if self.needs_rotation() {
                self.rotate();
            }
        }
    }
}

fn hash_token(secret: &[u8; SECRET_LEN], source: &Addr) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(&source.ip.octets());
    hasher.update(&source.port.to_be_bytes());
    hasher.finalize().to_vec()
}

fn random_secret() -> [u8; SECRET_LEN] {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn source(port: u16) -> Addr {
        Addr::new(Ipv4Addr::new(203, 0, 113, 5), port)
    }

    #[test]
    fn issued_token_validates_immediately() {
        let store = TokenStore::new(Duration::from_secs(600));
        let token = store.issue(&source(6881));
        assert!(store.validate(&token, &source(6881)));
    }

    #[test]
    fn token_does_not_validate_for_a_different_source() {
        let store = TokenStore::new(Duration::from_secs(600));
        let token = store.issue(&source(6881));
        assert!(!store.validate(&token, &source(6882)));
    }

    #[test]
    fn token_survives_one_rotation_but_not_two() {
        let store = TokenStore::new(Duration::from_secs(600));
        let token = store.issue(&source(6881));
        store.rotate();
        assert!(store.validate(&token, &source(6881)), "should survive within previous-secret window");
        store.rotate();
        assert!(!store.validate(&token, &source(6881)), "should expire after two rotations");
    }

    #[test]
    fn bogus_token_is_rejected() {
        let store = TokenStore::new(Duration::from_secs(600));
        assert!(!store.validate(b"deadbeef", &source(6881)));
    }
}

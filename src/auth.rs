use sha2::{Digest, Sha256};

/// Signed-in user for this daemon instance. The sidecar serves a single
/// UI process, so the session lives on `AppState` rather than in a token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub email: String,
}

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", salt, password).as_bytes());
    format!("{:x}", digest)
}

pub fn verify_password(salt: &str, password: &str, expected_hash: &str) -> bool {
    hash_password(salt, password) == expected_hash
}

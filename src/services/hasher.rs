//! Credential hashing
//!
//! Passwords are never stored. Each account carries two verifier tokens,
//! one keyed on the login and one on the email, both derived from the
//! password. Either identity can then be used to sign in, and a leaked
//! table row reveals neither the password nor whether two accounts share
//! one.
//!
//! A token is SHA-1 over a fixed application string mixed with the
//! upper-cased identity, the password, and the per-account salt, then
//! base64-encoded with the non-alphanumeric characters dropped. Accounts
//! predating salting have no salt stored; their tokens verify with the
//! salt-free form and are re-derived with a fresh salt on the next
//! successful login.

use data_encoding::BASE64;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::{Digest, Sha1};

/// Length of a session id cookie value
pub const SESID_LEN: usize = 15;

/// Length of a password-reset link key
pub const RESET_KEY_LEN: usize = 30;

/// Length of a freshly generated per-account salt
pub const SALT_LEN: usize = 10;

// Application-fixed mixing strings. Changing either invalidates every
// stored token.
const MIX_HEAD: &str = "J&eKGxkr";
const MIX_TAIL: &str = "VvP}28fQ";

// Stands in for the email identity when an account has none, so both
// token columns are always populated.
const NO_EMAIL: &str = "publicvoid";

/// Derive both verifier tokens for an account.
///
/// Returns `(login_token, email_token)`. Pass `None` for `salt` to verify
/// a legacy account created before per-account salting.
pub fn hash_credentials(
    login: &str,
    email: &str,
    password: &str,
    salt: Option<&str>,
) -> (String, String) {
    let email_identity = if email.is_empty() { NO_EMAIL } else { email };
    (
        derive(login, password, salt),
        derive(email_identity, password, salt),
    )
}

fn derive(identity: &str, password: &str, salt: Option<&str>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(MIX_HEAD.as_bytes());
    hasher.update(identity.to_uppercase().as_bytes());
    hasher.update(MIX_TAIL.as_bytes());
    hasher.update(password.as_bytes());
    if let Some(salt) = salt {
        hasher.update(salt.as_bytes());
    }
    let digest = hasher.finalize();

    BASE64
        .encode(&digest)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Random alphanumeric string, used for session ids, reset keys and salts
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Fresh per-account salt
pub fn generate_salt() -> String {
    random_token(SALT_LEN)
}

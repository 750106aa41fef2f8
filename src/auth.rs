/*!
Password hashing and verification.

Passwords are stored as Argon2id hashes in PHC string format, with the
salt generated here and carried inside the string. Default `argon2`
parameters throughout; there is deliberately no plaintext storage mode.
*/
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier,
        SaltString,
    },
    Argon2,
};

/// Outcome of checking a password (or a password change) against the
/// accounts table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    BadPassword,
    NoSuchUser,
}

/// Hash `password` with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| format!("Error hashing password: {}", &e))
}

/// Check `password` against a stored PHC hash string.
///
/// A mismatch is `Ok(false)`; `Err` means the stored hash itself was
/// unusable.
pub fn verify_password(password: &str, phc: &str) -> Result<bool, String> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| format!("Stored password hash is malformed: {}", &e))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(format!("Error verifying password: {}", &e)),
    }
}

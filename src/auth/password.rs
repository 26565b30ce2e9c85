// scrypt password hashing (N=16384, r=8, p=1, 64-byte key, 16-byte random salt).
// Stored as "hex(key).hex(salt)".

use rand::RngCore;
use scrypt::{scrypt, Params};
use subtle::ConstantTimeEq;

use crate::error::AppError;

const KEY_LEN: usize = 64;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);

    let key = derive_key(password, &salt_hex)?;
    Ok(format!("{}.{}", hex::encode(key), salt_hex))
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, AppError> {
    let (key_hex, salt_hex) = stored
        .split_once('.')
        .ok_or_else(|| AppError::internal("Invalid password hash format"))?;
    let expected = hex::decode(key_hex)
        .map_err(|e| AppError::internal(format!("Invalid hex in password hash: {e}")))?;

    let derived = derive_key(password, salt_hex)?;
    Ok(derived.ct_eq(&expected).into())
}

fn derive_key(password: &str, salt: &str) -> Result<Vec<u8>, AppError> {
    let params = Params::new(14, 8, 1, KEY_LEN)
        .map_err(|e| AppError::internal(format!("Invalid scrypt params: {e}")))?;

    let mut output = vec![0u8; KEY_LEN];
    scrypt(password.as_bytes(), salt.as_bytes(), &params, &mut output)
        .map_err(|e| AppError::internal(format!("scrypt failed: {e}")))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse battery").unwrap();

        let (key, salt) = hash.split_once('.').unwrap();
        assert_eq!(key.len(), KEY_LEN * 2);
        assert_eq!(salt.len(), 32);

        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong horse battery", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(verify_password("pw", "no-separator").is_err());
        assert!(verify_password("pw", "zz.abcd").is_err());
    }
}

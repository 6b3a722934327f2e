//! Password hashes used in maintainer `auth` attributes and for the
//! override password.

use std::{fmt, str::FromStr};

use openssl::{
    error::ErrorStack,
    hash::{Hasher, MessageDigest},
};

use crate::rpsl::InvalidValue;

const MD5_CRYPT_MAGIC: &str = "$1$";
const CRYPT_ALPHABET: &[u8] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const SCRYPT_LOG_N: u8 = 13;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

//------------ PasswordHash --------------------------------------------------

/// A stored password hash.
///
/// `MD5-PW` hashes use the md5-crypt format (`$1$<salt>$<hash>`).
/// `SCRYPT-PW` hashes are `<hex salt>:<hex hash>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PasswordHash {
    Md5Crypt(String),
    Scrypt { salt: Vec<u8>, hash: Vec<u8> },
}

impl PasswordHash {
    /// Parses the value following the method name.
    pub fn parse(scheme: &str, value: &str) -> Result<Self, InvalidValue> {
        let value = value.trim();
        match scheme {
            "MD5-PW" => {
                let salt = md5_crypt_salt(value).ok_or_else(|| InvalidValue::new("md5-crypt hash", value))?;
                let hash = &value[MD5_CRYPT_MAGIC.len() + salt.len() + 1..];
                if hash.len() == 22 && hash.bytes().all(|b| CRYPT_ALPHABET.contains(&b)) {
                    Ok(PasswordHash::Md5Crypt(value.to_string()))
                } else {
                    Err(InvalidValue::new("md5-crypt hash", value))
                }
            }
            "SCRYPT-PW" => {
                let invalid = || InvalidValue::new("scrypt hash", value);
                let (salt, hash) = value.split_once(':').ok_or_else(invalid)?;
                let salt = hex::decode(salt).map_err(|_| invalid())?;
                let hash = hex::decode(hash).map_err(|_| invalid())?;
                if salt.is_empty() || hash.len() != scrypt::Params::RECOMMENDED_LEN {
                    return Err(invalid());
                }
                Ok(PasswordHash::Scrypt { salt, hash })
            }
            _ => Err(InvalidValue::new("password scheme", scheme)),
        }
    }

    /// Hashes a new password with a random salt.
    pub fn scrypt(password: &str) -> Result<Self, ErrorStack> {
        let mut salt = [0u8; 16];
        openssl::rand::rand_bytes(&mut salt)?;
        let hash = scrypt_hash(password, &salt);
        Ok(PasswordHash::Scrypt {
            salt: salt.to_vec(),
            hash,
        })
    }

    /// Hashes a new password with md5-crypt and a random salt.
    pub fn md5_crypt(password: &str) -> Result<Self, ErrorStack> {
        let mut random = [0u8; 8];
        openssl::rand::rand_bytes(&mut random)?;
        let salt: String = random
            .iter()
            .map(|b| CRYPT_ALPHABET[usize::from(*b) % CRYPT_ALPHABET.len()] as char)
            .collect();
        md5_crypt(password.as_bytes(), &salt).map(PasswordHash::Md5Crypt)
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            PasswordHash::Md5Crypt(_) => "MD5-PW",
            PasswordHash::Scrypt { .. } => "SCRYPT-PW",
        }
    }

    /// Returns whether the password matches this hash.
    pub fn verify(&self, password: &str) -> bool {
        match self {
            PasswordHash::Md5Crypt(stored) => {
                let Some(salt) = md5_crypt_salt(stored) else {
                    return false;
                };
                match md5_crypt(password.as_bytes(), salt) {
                    Ok(computed) => computed.len() == stored.len() && openssl::memcmp::eq(computed.as_bytes(), stored.as_bytes()),
                    Err(e) => {
                        error!("Cannot compute md5-crypt hash: {e}");
                        false
                    }
                }
            }
            PasswordHash::Scrypt { salt, hash } => {
                let computed = scrypt_hash(password, salt);
                computed.len() == hash.len() && openssl::memcmp::eq(&computed, hash)
            }
        }
    }
}

impl FromStr for PasswordHash {
    type Err = InvalidValue;

    /// Parses `<scheme> <value>`, e.g. `MD5-PW $1$...`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, value) = s
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| InvalidValue::new("password hash", s))?;
        PasswordHash::parse(&scheme.to_ascii_uppercase(), value)
    }
}

impl fmt::Display for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PasswordHash::Md5Crypt(hash) => write!(f, "MD5-PW {hash}"),
            PasswordHash::Scrypt { salt, hash } => {
                write!(f, "SCRYPT-PW {}:{}", hex::encode(salt), hex::encode(hash))
            }
        }
    }
}

//------------ scrypt --------------------------------------------------------

fn scrypt_hash(password: &str, salt: &[u8]) -> Vec<u8> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, scrypt::Params::RECOMMENDED_LEN);
    let mut output = [0u8; scrypt::Params::RECOMMENDED_LEN];
    match params {
        Ok(params) => {
            if scrypt::scrypt(password.as_bytes(), salt, &params, &mut output).is_err() {
                error!("Cannot compute scrypt hash");
            }
        }
        Err(e) => error!("Invalid scrypt parameters: {e}"),
    }
    output.to_vec()
}

//------------ md5-crypt -----------------------------------------------------

/// Returns the salt of a `$1$<salt>$<hash>` string.
fn md5_crypt_salt(hash: &str) -> Option<&str> {
    let rest = hash.strip_prefix(MD5_CRYPT_MAGIC)?;
    let (salt, _) = rest.split_once('$')?;
    if salt.len() > 8 || !salt.bytes().all(|b| CRYPT_ALPHABET.contains(&b)) {
        None
    } else {
        Some(salt)
    }
}

fn md5(parts: &[&[u8]]) -> Result<Vec<u8>, ErrorStack> {
    let mut hasher = Hasher::new(MessageDigest::md5())?;
    for part in parts {
        hasher.update(part)?;
    }
    Ok(hasher.finish()?.to_vec())
}

fn push_crypt64(out: &mut String, mut value: u32, chars: usize) {
    for _ in 0..chars {
        out.push(CRYPT_ALPHABET[(value & 0x3f) as usize] as char);
        value >>= 6;
    }
}

/// The FreeBSD md5-crypt algorithm.
fn md5_crypt(password: &[u8], salt: &str) -> Result<String, ErrorStack> {
    let salt = salt.as_bytes();
    let salt = &salt[..salt.len().min(8)];

    let alternate = md5(&[password, salt, password])?;

    let mut hasher = Hasher::new(MessageDigest::md5())?;
    hasher.update(password)?;
    hasher.update(MD5_CRYPT_MAGIC.as_bytes())?;
    hasher.update(salt)?;

    let mut remaining = password.len();
    while remaining > 0 {
        let len = remaining.min(16);
        hasher.update(&alternate[..len])?;
        remaining -= len;
    }

    let mut i = password.len();
    while i != 0 {
        if i & 1 == 1 {
            hasher.update(&[0])?;
        } else {
            hasher.update(&password[..1])?;
        }
        i >>= 1;
    }

    let mut digest = hasher.finish()?.to_vec();

    for round in 0..1000 {
        let mut hasher = Hasher::new(MessageDigest::md5())?;
        if round & 1 == 1 {
            hasher.update(password)?;
        } else {
            hasher.update(&digest)?;
        }
        if round % 3 != 0 {
            hasher.update(salt)?;
        }
        if round % 7 != 0 {
            hasher.update(password)?;
        }
        if round & 1 == 1 {
            hasher.update(&digest)?;
        } else {
            hasher.update(password)?;
        }
        digest = hasher.finish()?.to_vec();
    }

    let d = |i: usize| u32::from(digest[i]);

    let mut out = String::with_capacity(34);
    out.push_str(MD5_CRYPT_MAGIC);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');
    push_crypt64(&mut out, (d(0) << 16) | (d(6) << 8) | d(12), 4);
    push_crypt64(&mut out, (d(1) << 16) | (d(7) << 8) | d(13), 4);
    push_crypt64(&mut out, (d(2) << 16) | (d(8) << 8) | d(14), 4);
    push_crypt64(&mut out, (d(3) << 16) | (d(9) << 8) | d(15), 4);
    push_crypt64(&mut out, (d(4) << 16) | (d(10) << 8) | d(5), 4);
    push_crypt64(&mut out, d(11), 2);

    Ok(out)
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_crypt_known_hash() {
        // openssl passwd -1 -salt xxxxxxxx password
        let hash = md5_crypt(b"password", "xxxxxxxx").unwrap();
        assert_eq!(hash, "$1$xxxxxxxx$UYCIxa628.9qXjpQCjM4a.");

        let stored = PasswordHash::from_str("MD5-PW $1$xxxxxxxx$UYCIxa628.9qXjpQCjM4a.").unwrap();
        assert!(stored.verify("password"));
        assert!(!stored.verify("Password"));
        assert!(!stored.verify(""));
    }

    #[test]
    fn md5_crypt_new_hash() {
        let hash = PasswordHash::md5_crypt("secret").unwrap();
        let parsed = PasswordHash::from_str(&hash.to_string()).unwrap();
        assert_eq!(parsed, hash);
        assert!(parsed.verify("secret"));
        assert!(!parsed.verify("secret2"));
    }

    #[test]
    fn scrypt_new_hash() {
        let hash = PasswordHash::scrypt("secret").unwrap();
        let text = hash.to_string();
        assert!(text.starts_with("SCRYPT-PW "));

        let parsed = PasswordHash::from_str(&text).unwrap();
        assert!(parsed.verify("secret"));
        assert!(!parsed.verify("wrong"));
    }

    #[test]
    fn invalid_hashes() {
        assert!(PasswordHash::from_str("MD5-PW $1$xxxxxxxx$short").is_err());
        assert!(PasswordHash::from_str("MD5-PW nodollar").is_err());
        assert!(PasswordHash::from_str("SCRYPT-PW abcd").is_err());
        assert!(PasswordHash::from_str("SCRYPT-PW 00:00").is_err());
        assert!(PasswordHash::from_str("CRYPT-PW abcdefgh").is_err());
    }
}

use std::{fmt, str::FromStr};

use crate::auth::PasswordHash;
use crate::rpsl::{InvalidValue, fields::is_key_cert_name, fields::is_mntner_name};

//------------ AuthMethod ----------------------------------------------------

/// A single `auth:` value of a maintainer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthMethod {
    /// A password hash, `MD5-PW` or `SCRYPT-PW`.
    Password(PasswordHash),

    /// A signature by the key in the `key-cert` object with this name.
    Key(String),

    /// Delegation to another maintainer.
    Mntner(String),

    /// Delegation to a named list of maintainers from the configuration.
    List(String),
}

impl FromStr for AuthMethod {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = match s.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme.to_ascii_uppercase(), rest.trim()),
            None => (s.to_ascii_uppercase(), ""),
        };

        match scheme.as_str() {
            "MD5-PW" | "SCRYPT-PW" => PasswordHash::parse(&scheme, rest).map(AuthMethod::Password),
            "MNTNER" if is_mntner_name(rest) => Ok(AuthMethod::Mntner(rest.to_ascii_uppercase())),
            "LIST" if !rest.is_empty() && !rest.contains(char::is_whitespace) => {
                Ok(AuthMethod::List(rest.to_ascii_uppercase()))
            }
            key if rest.is_empty() && is_key_cert_name(key) => Ok(AuthMethod::Key(key.to_string())),
            _ => Err(InvalidValue::new("auth method", s)),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthMethod::Password(hash) => hash.fmt(f),
            AuthMethod::Key(name) => name.fmt(f),
            AuthMethod::Mntner(name) => write!(f, "MNTNER {name}"),
            AuthMethod::List(name) => write!(f, "LIST {name}"),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_methods() {
        assert!(matches!(
            AuthMethod::from_str("md5-pw $1$xxxxxxxx$UYCIxa628.9qXjpQCjM4a."),
            Ok(AuthMethod::Password(PasswordHash::Md5Crypt(_)))
        ));
        assert_eq!(
            AuthMethod::from_str("MNTNER maint-other").unwrap(),
            AuthMethod::Mntner("MAINT-OTHER".to_string())
        );
        assert_eq!(
            AuthMethod::from_str("LIST upstreams").unwrap(),
            AuthMethod::List("UPSTREAMS".to_string())
        );

        let key = format!("KEY-{}", "ab".repeat(32));
        assert_eq!(
            AuthMethod::from_str(&key).unwrap(),
            AuthMethod::Key(key.to_ascii_uppercase())
        );

        assert!(AuthMethod::from_str("PGPKEY-12345678").is_err());
        assert!(AuthMethod::from_str("MNTNER").is_err());
        assert!(AuthMethod::from_str("CRYPT-PW abcdefgh").is_err());
    }
}

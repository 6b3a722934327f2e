//! Options for submitting changes.

use std::{fs, io};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::auth::PasswordHash;
use crate::cli::client::{Error, IrrdClient};
use crate::commons::api::{SubmissionReport, SubmissionRequest};

//------------ Submit --------------------------------------------------------

#[derive(clap::Parser)]
pub struct Submit {
    /// File with the objects, separated by empty lines. Use - for stdin.
    file: String,

    /// A password to authenticate with. May be repeated.
    #[arg(long = "password", value_name = "PASSWORD")]
    passwords: Vec<String>,

    /// A file with a detached signature over the objects. May be repeated.
    #[arg(long = "signature", value_name = "FILE")]
    signatures: Vec<String>,

    /// The override password.
    #[arg(long = "override", value_name = "PASSWORD")]
    override_password: Option<String>,
}

impl Submit {
    pub async fn run(self, client: &IrrdClient) -> Result<SubmissionReport, Error> {
        let request = self.request()?;
        client.submit(&request).await
    }

    fn request(self) -> Result<SubmissionRequest, Error> {
        let objects = read_text(&self.file)?;
        let signatures = self
            .signatures
            .iter()
            .map(|path| fs::read(path).map(|sig| BASE64.encode(sig)).map_err(|e| Error::read_file(path, e)))
            .collect::<Result<_, _>>()?;
        Ok(SubmissionRequest {
            objects,
            passwords: self.passwords,
            signatures,
            override_password: self.override_password,
        })
    }
}

/// Reads a text file, or stdin for `-`.
pub fn read_text(path: &str) -> Result<String, Error> {
    if path == "-" {
        io::read_to_string(io::stdin()).map_err(|e| Error::read_file("<stdin>", e))
    } else {
        fs::read_to_string(path).map_err(|e| Error::read_file(path, e))
    }
}

//------------ HashPassword --------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum HashScheme {
    #[default]
    Scrypt,
    Md5,
}

#[derive(clap::Parser)]
pub struct HashPassword {
    /// The hash scheme.
    #[arg(long, value_enum, default_value_t = HashScheme::Scrypt)]
    scheme: HashScheme,

    /// The password. Read from stdin if missing.
    password: Option<String>,
}

impl HashPassword {
    /// Returns the hash as used in `auth` attributes.
    pub fn run(self) -> Result<String, Error> {
        let password = match self.password {
            Some(password) => password,
            None => {
                let mut line = String::new();
                io::stdin().read_line(&mut line).map_err(|e| Error::read_file("<stdin>", e))?;
                line.trim_end_matches(['\r', '\n']).to_string()
            }
        };
        if password.is_empty() {
            return Err(Error::Other("empty password".into()));
        }
        let hash = match self.scheme {
            HashScheme::Scrypt => PasswordHash::scrypt(&password),
            HashScheme::Md5 => PasswordHash::md5_crypt(&password),
        }
        .map_err(|e| Error::Other(format!("cannot hash password: {e}")))?;
        Ok(hash.to_string())
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects.txt");
        let signature = dir.path().join("objects.sig");
        fs::write(&objects, "mntner: TEST-MNT\nsource: TEST\n").unwrap();
        fs::write(&signature, b"\x01\x02\x03").unwrap();

        let submit = Submit {
            file: objects.to_string_lossy().into(),
            passwords: vec!["secret".into()],
            signatures: vec![signature.to_string_lossy().into()],
            override_password: None,
        };
        let request = submit.request().unwrap();
        assert_eq!(request.objects, "mntner: TEST-MNT\nsource: TEST\n");
        assert_eq!(request.passwords, vec!["secret".to_string()]);
        assert_eq!(request.signatures, vec!["AQID".to_string()]);
    }

    #[test]
    fn missing_file() {
        let submit = Submit {
            file: "/nonexistent/objects.txt".into(),
            passwords: vec![],
            signatures: vec![],
            override_password: None,
        };
        assert!(matches!(submit.request(), Err(Error::ReadFile(..))));
    }

    #[test]
    fn hash_password_verifies() {
        for scheme in [HashScheme::Scrypt, HashScheme::Md5] {
            let hash = HashPassword {
                scheme,
                password: Some("secret".into()),
            }
            .run()
            .unwrap();
            let hash: PasswordHash = hash.parse().unwrap();
            assert!(hash.verify("secret"));
            assert!(!hash.verify("other"));
        }
    }
}

//! Signing key descriptors and backend selection
//!
//! A [`SigningKey`] is whatever the operator supplied. Validation turns it
//! into a [`ValidatedKey`] bound to exactly one [`SignerBackend`], or into a
//! [`KeyRejection`] explaining why signing will be skipped.
//!
//! | Populated fields                          | Backend           |
//! |-------------------------------------------|-------------------|
//! | `key_id` (+ `passphrase_file`)            | `SequoiaKeyId`    |
//! | `key_path` (+ `passphrase_file`)          | `SequoiaKeyFile`  |
//! | `key_id` + `key_path`, no passphrase      | `SequoiaKeyFile`  |
//! | `key_id` + `key_path` + a passphrase      | `EphemeralKeyring`|

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a key descriptor cannot be used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyRejection {
    #[error("no signing key supplied")]
    Empty,

    #[error("both a passphrase and a passphrase file were supplied")]
    ConflictingPassphrases,

    #[error("an inline passphrase needs both a key id and a key file")]
    InlinePassphraseWithoutKeyring,

    #[error("{what} {path} does not exist")]
    Missing { what: &'static str, path: PathBuf },

    #[error("{what} {path} is a directory")]
    IsDirectory { what: &'static str, path: PathBuf },
}

/// Signing strategy selected from the populated key fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignerBackend {
    /// `sq sign --signer <key id>` through rpmsign macros
    SequoiaKeyId,
    /// `sq sign --signer-file <key>` through rpmsign macros
    SequoiaKeyFile,
    /// GnuPG with the key imported into a temporary home
    EphemeralKeyring,
}

impl SignerBackend {
    /// Whether the backend needs an ephemeral keyring home
    pub fn needs_keyring(self) -> bool {
        matches!(self, SignerBackend::EphemeralKeyring)
    }
}

impl fmt::Display for SignerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignerBackend::SequoiaKeyId => "sequoia-key-id",
            SignerBackend::SequoiaKeyFile => "sequoia-key-file",
            SignerBackend::EphemeralKeyring => "ephemeral-keyring",
        };
        f.write_str(name)
    }
}

/// Where passphrase material comes from
#[derive(Clone, PartialEq, Eq)]
pub enum Passphrase {
    None,
    Inline(String),
    File(PathBuf),
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Passphrase::None => f.write_str("None"),
            Passphrase::Inline(_) => f.write_str("Inline(<redacted>)"),
            Passphrase::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Key descriptor as supplied by the operator
///
/// Empty strings count as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SigningKey {
    pub key_id: Option<String>,
    pub key_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub passphrase_file: Option<PathBuf>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("key_path", &self.key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("passphrase_file", &self.passphrase_file)
            .finish()
    }
}

impl SigningKey {
    pub fn new(
        key_id: Option<String>,
        key_path: Option<PathBuf>,
        passphrase: Option<String>,
        passphrase_file: Option<PathBuf>,
    ) -> Self {
        Self {
            key_id: key_id.filter(|s| !s.is_empty()),
            key_path: key_path.filter(|p| !p.as_os_str().is_empty()),
            passphrase: passphrase.filter(|s| !s.is_empty()),
            passphrase_file: passphrase_file.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_id.is_none()
            && self.key_path.is_none()
            && self.passphrase.is_none()
            && self.passphrase_file.is_none()
    }

    /// Select a backend and check every referenced file.
    pub fn validate(&self) -> Result<ValidatedKey, KeyRejection> {
        if self.is_empty() {
            return Err(KeyRejection::Empty);
        }

        let passphrase = match (&self.passphrase, &self.passphrase_file) {
            (Some(_), Some(_)) => return Err(KeyRejection::ConflictingPassphrases),
            (Some(inline), None) => Passphrase::Inline(inline.clone()),
            (None, Some(path)) => Passphrase::File(path.clone()),
            (None, None) => Passphrase::None,
        };

        let backend = match (&self.key_id, &self.key_path, &passphrase) {
            // the key file alone identifies the signer
            (Some(_), Some(_), Passphrase::None) => SignerBackend::SequoiaKeyFile,
            (Some(_), Some(_), _) => SignerBackend::EphemeralKeyring,
            (_, _, Passphrase::Inline(_)) => {
                return Err(KeyRejection::InlinePassphraseWithoutKeyring)
            }
            (Some(_), None, _) => SignerBackend::SequoiaKeyId,
            (None, Some(_), _) => SignerBackend::SequoiaKeyFile,
            // passphrase file alone
            (None, None, _) => return Err(KeyRejection::Empty),
        };

        if let Some(path) = &self.key_path {
            check_file("key file", path)?;
        }
        if let Passphrase::File(path) = &passphrase {
            check_file("passphrase file", path)?;
        }

        Ok(ValidatedKey {
            backend,
            key_id: self.key_id.clone(),
            key_path: self.key_path.clone(),
            passphrase,
        })
    }
}

fn check_file(what: &'static str, path: &Path) -> Result<(), KeyRejection> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(KeyRejection::IsDirectory {
            what,
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(_) => Err(KeyRejection::Missing {
            what,
            path: path.to_path_buf(),
        }),
    }
}

/// A key bound to one backend, with its files checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedKey {
    backend: SignerBackend,
    key_id: Option<String>,
    key_path: Option<PathBuf>,
    passphrase: Passphrase,
}

impl ValidatedKey {
    pub fn backend(&self) -> SignerBackend {
        self.backend
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn key_path(&self) -> Option<&Path> {
        self.key_path.as_deref()
    }

    pub fn passphrase(&self) -> &Passphrase {
        &self.passphrase
    }
}

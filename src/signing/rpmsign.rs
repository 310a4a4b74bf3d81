//! Package signing through `rpmsign`
//!
//! rpmsign appends the signature in place. The backend decides which
//! program produces the detached signature; that choice is injected with
//! `--define` overrides of rpm's signing macros.

use std::path::Path;

use tracing::info;

use super::key::{SignerBackend, ValidatedKey};
use crate::process::{Invocation, ProcessError};
use crate::tools::find_executable;

/// `__gpg_sign_cmd` for Sequoia signing by key id
pub const SQ_SIGN_CMD: &str = "%{shescape:%{__gpg}} %{__gpg} sign --signer %{_gpg_name} \
%{?_sq_sign_cmd_extra_args} --signature-file --output %{shescape:%{__signature_filename}} \
%{shescape:%{__plaintext_filename}}";

/// `__gpg_sign_cmd` for Sequoia signing with a key file
pub const SQ_SIGN_WITH_KEY_FILE_CMD: &str = "%{shescape:%{__gpg}} %{__gpg} sign \
%{?_sq_sign_cmd_extra_args} --signature-file --output %{shescape:%{__signature_filename}} \
%{shescape:%{__plaintext_filename}}";

/// `_gpg_name` placeholder when the key comes from a file
const KEY_FILE_SIGNER_NAME: &str = "dummy";

/// Everything a signer needs besides the artifact
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub key: &'a ValidatedKey,
    /// Keyring home for the ephemeral keyring backend
    pub keyring_home: Option<&'a Path>,
    pub passphrase_file: Option<&'a Path>,
}

/// Signs one package in place
pub trait PackageSigner {
    fn sign(&self, artifact: &Path, context: &SigningContext<'_>) -> Result<(), ProcessError>;
}

/// `rpmsign --addsign`
#[derive(Debug, Clone)]
pub struct RpmSign {
    rpmsign: String,
    sq: String,
    gpg: String,
}

impl RpmSign {
    pub fn new(rpmsign: impl Into<String>, sq: impl Into<String>, gpg: impl Into<String>) -> Self {
        Self {
            rpmsign: rpmsign.into(),
            sq: sq.into(),
            gpg: gpg.into(),
        }
    }

    pub fn invocation(&self, artifact: &Path, context: &SigningContext<'_>) -> Invocation {
        let key = context.key;
        let mut defines: Vec<String> = Vec::new();

        match key.backend() {
            SignerBackend::SequoiaKeyId => {
                defines.push(format!("_gpg_name {}", key.key_id().unwrap_or_default()));
                defines.push(format!("__gpg {}", absolute_program(&self.sq)));
                defines.push(format!("__gpg_sign_cmd {}", SQ_SIGN_CMD));
                if let Some(file) = context.passphrase_file {
                    defines.push(format!(
                        "_sq_sign_cmd_extra_args --batch --password-file {}",
                        quote(file)
                    ));
                }
            }
            SignerBackend::SequoiaKeyFile => {
                let mut extra = String::new();
                if let Some(path) = key.key_path() {
                    extra.push_str(&format!("--signer-file {}", quote(path)));
                }
                if let Some(file) = context.passphrase_file {
                    extra.push_str(&format!(" --batch --password-file {}", quote(file)));
                }
                defines.push(format!("_gpg_name {}", KEY_FILE_SIGNER_NAME));
                defines.push(format!("__gpg {}", absolute_program(&self.sq)));
                defines.push(format!("__gpg_sign_cmd {}", SQ_SIGN_WITH_KEY_FILE_CMD));
                defines.push(format!("_sq_sign_cmd_extra_args {}", extra.trim_start()));
            }
            SignerBackend::EphemeralKeyring => {
                defines.push(format!("_gpg_name {}", key.key_id().unwrap_or_default()));
                if let Some(home) = context.keyring_home {
                    defines.push(format!("_gpg_path {}", home.display()));
                }
                defines.push(format!("__gpg {}", absolute_program(&self.gpg)));
                if let Some(file) = context.passphrase_file {
                    defines.push(format!(
                        "_gpg_sign_cmd_extra_args --batch --pinentry-mode loopback --passphrase-file {}",
                        quote(file)
                    ));
                }
            }
        }

        let mut inv = Invocation::new(&self.rpmsign);
        for define in defines {
            inv = inv.arg("--define").arg(define);
        }
        inv.arg("--addsign").arg(artifact)
    }
}

impl Default for RpmSign {
    fn default() -> Self {
        Self::new("rpmsign", "sq", "gpg")
    }
}

impl PackageSigner for RpmSign {
    fn sign(&self, artifact: &Path, context: &SigningContext<'_>) -> Result<(), ProcessError> {
        info!("Signing {}", artifact.display());
        self.invocation(artifact, context).run_inherited()
    }
}

/// rpm executes the signing command without a PATH search.
fn absolute_program(program: &str) -> String {
    find_executable(program)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| program.to_string())
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

//! Ephemeral GnuPG keyring homes
//!
//! A home is created per signing run, holds the imported key and an agent
//! configuration that allows loopback pinentry, and is torn down when the
//! run ends:
//! 1. `gpgconf --homedir <home> --kill gpg-agent`
//! 2. recursive delete
//!
//! Teardown runs from [`Drop`] as well, so a failed import or a failed
//! signing batch never leaves the directory or the agent behind. Teardown
//! failures are logged and swallowed.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use super::key::Passphrase;
use crate::process::{Invocation, ProcessError};

/// Prefix for keyring home directories
pub const KEYRING_HOME_PREFIX: &str = "rpmtool-gnupg-";

const AGENT_CONF: &str = "gpg-agent.conf";
const AGENT_CONF_CONTENTS: &str = "allow-loopback-pinentry\n";
const PASSPHRASE_FILE: &str = "passphrase";

/// Keyring errors
#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("key import failed: {0}")]
    Import(#[source] ProcessError),

    #[error("gpg-agent shutdown failed: {0}")]
    Shutdown(#[source] ProcessError),

    #[error("ephemeral keyring needs a passphrase")]
    NoPassphrase,
}

/// Keyring operations against a home directory
pub trait KeyringTool {
    fn import(&self, home: &Path, key_path: &Path, passphrase_file: &Path)
        -> Result<(), KeyringError>;

    fn shutdown_agent(&self, home: &Path) -> Result<(), KeyringError>;
}

/// `gpg` and `gpgconf`
#[derive(Debug, Clone)]
pub struct GnuPg {
    gpg: String,
    gpgconf: String,
}

impl GnuPg {
    pub fn new(gpg: impl Into<String>, gpgconf: impl Into<String>) -> Self {
        Self {
            gpg: gpg.into(),
            gpgconf: gpgconf.into(),
        }
    }

    pub fn import_invocation(&self, home: &Path, key_path: &Path, passphrase_file: &Path) -> Invocation {
        Invocation::new(&self.gpg)
            .arg("--homedir")
            .arg(home)
            .args(["--batch", "--pinentry-mode", "loopback", "--passphrase-file"])
            .arg(passphrase_file)
            .arg("--import")
            .arg(key_path)
    }

    pub fn shutdown_invocation(&self, home: &Path) -> Invocation {
        Invocation::new(&self.gpgconf)
            .arg("--homedir")
            .arg(home)
            .args(["--kill", "gpg-agent"])
    }
}

impl Default for GnuPg {
    fn default() -> Self {
        Self::new("gpg", "gpgconf")
    }
}

impl KeyringTool for GnuPg {
    fn import(
        &self,
        home: &Path,
        key_path: &Path,
        passphrase_file: &Path,
    ) -> Result<(), KeyringError> {
        self.import_invocation(home, key_path, passphrase_file)
            .run_captured()
            .map(|_| ())
            .map_err(KeyringError::Import)
    }

    fn shutdown_agent(&self, home: &Path) -> Result<(), KeyringError> {
        self.shutdown_invocation(home)
            .run_captured()
            .map(|_| ())
            .map_err(KeyringError::Shutdown)
    }
}

/// A temporary keyring home, torn down on drop
pub struct EphemeralKeyringHome<'a> {
    dir: Option<TempDir>,
    passphrase_file: PathBuf,
    tool: &'a dyn KeyringTool,
}

impl<'a> EphemeralKeyringHome<'a> {
    /// Create a home under `parent` and import `key_path` into it.
    ///
    /// An inline passphrase is written to a private file inside the home.
    /// The guard exists before the first write, so any failure below
    /// tears the home down again.
    pub fn create(
        parent: &Path,
        key_path: &Path,
        passphrase: &Passphrase,
        tool: &'a dyn KeyringTool,
    ) -> Result<Self, KeyringError> {
        let dir = tempfile::Builder::new()
            .prefix(KEYRING_HOME_PREFIX)
            .tempdir_in(parent)
            .map_err(|source| KeyringError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        let home = dir.path().to_path_buf();
        debug!(home = %home.display(), "created keyring home");

        let mut guard = Self {
            dir: Some(dir),
            passphrase_file: PathBuf::new(),
            tool,
        };

        restrict_dir(&home)?;
        write_private(&home.join(AGENT_CONF), AGENT_CONF_CONTENTS)?;

        guard.passphrase_file = match passphrase {
            Passphrase::Inline(secret) => {
                let path = home.join(PASSPHRASE_FILE);
                write_private(&path, secret)?;
                path
            }
            Passphrase::File(path) => path.clone(),
            Passphrase::None => return Err(KeyringError::NoPassphrase),
        };

        tool.import(&home, key_path, &guard.passphrase_file)?;
        debug!(home = %home.display(), key = %key_path.display(), "imported signing key");

        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// Passphrase file to hand to the signer
    pub fn passphrase_file(&self) -> &Path {
        &self.passphrase_file
    }

    /// Stop the agent and delete the home now.
    pub fn teardown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let home = dir.path().to_path_buf();

        if let Err(e) = self.tool.shutdown_agent(&home) {
            warn!(home = %home.display(), error = %e, "failed to stop gpg-agent");
        }
        match dir.close() {
            Ok(()) => debug!(home = %home.display(), "removed keyring home"),
            Err(e) => warn!(home = %home.display(), error = %e, "failed to remove keyring home"),
        }
    }
}

impl Drop for EphemeralKeyringHome<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> Result<(), KeyringError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|source| {
        KeyringError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> Result<(), KeyringError> {
    Ok(())
}

fn write_private(path: &Path, contents: &str) -> Result<(), KeyringError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let io_err = |source| KeyringError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(contents.as_bytes()).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTool {
        fail_import: bool,
        imported: RefCell<Vec<(PathBuf, String)>>,
        shutdowns: RefCell<Vec<PathBuf>>,
    }

    impl KeyringTool for RecordingTool {
        fn import(
            &self,
            home: &Path,
            _key_path: &Path,
            passphrase_file: &Path,
        ) -> Result<(), KeyringError> {
            assert!(home.join(AGENT_CONF).exists());
            let secret = fs::read_to_string(passphrase_file).unwrap();
            self.imported.borrow_mut().push((home.to_path_buf(), secret));
            if self.fail_import {
                return Err(KeyringError::Import(ProcessError::Spawn {
                    program: "gpg".into(),
                    source: io::Error::new(io::ErrorKind::Other, "bad key"),
                }));
            }
            Ok(())
        }

        fn shutdown_agent(&self, home: &Path) -> Result<(), KeyringError> {
            self.shutdowns.borrow_mut().push(home.to_path_buf());
            Ok(())
        }
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_create_and_teardown() {
        let parent = TempDir::new().unwrap();
        let tool = RecordingTool::default();
        let passphrase = Passphrase::Inline("secret".into());

        let home = EphemeralKeyringHome::create(
            parent.path(),
            Path::new("/keys/signing.asc"),
            &passphrase,
            &tool,
        )
        .unwrap();
        let path = home.path().to_path_buf();

        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(KEYRING_HOME_PREFIX));
        assert_eq!(
            fs::read_to_string(path.join(AGENT_CONF)).unwrap(),
            "allow-loopback-pinentry\n"
        );
        assert_eq!(home.passphrase_file(), path.join(PASSPHRASE_FILE));
        assert_eq!(tool.imported.borrow()[0].1, "secret");

        home.teardown();
        assert!(!path.exists());
        assert_eq!(tool.shutdowns.borrow().as_slice(), &[path]);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let parent = TempDir::new().unwrap();
        let tool = RecordingTool::default();
        let home = EphemeralKeyringHome::create(
            parent.path(),
            Path::new("key.asc"),
            &Passphrase::Inline("secret".into()),
            &tool,
        )
        .unwrap();

        let dir_mode = fs::metadata(home.path()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        let file_mode = fs::metadata(home.passphrase_file()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn test_passphrase_file_is_used_in_place() {
        let parent = TempDir::new().unwrap();
        let pass = parent.path().join("pass.txt");
        fs::write(&pass, "from-file").unwrap();
        let tool = RecordingTool::default();

        let home = EphemeralKeyringHome::create(
            parent.path(),
            Path::new("key.asc"),
            &Passphrase::File(pass.clone()),
            &tool,
        )
        .unwrap();
        assert_eq!(home.passphrase_file(), pass);
        assert!(!home.path().join(PASSPHRASE_FILE).exists());
    }

    #[test]
    fn test_failed_import_leaves_nothing() {
        let parent = TempDir::new().unwrap();
        let tool = RecordingTool {
            fail_import: true,
            ..Default::default()
        };

        let result = EphemeralKeyringHome::create(
            parent.path(),
            Path::new("key.asc"),
            &Passphrase::Inline("secret".into()),
            &tool,
        );
        assert!(matches!(result, Err(KeyringError::Import(_))));
        assert_eq!(entries(parent.path()), 0);
        assert_eq!(tool.shutdowns.borrow().len(), 1);
    }

    #[test]
    fn test_drop_tears_down() {
        let parent = TempDir::new().unwrap();
        let tool = RecordingTool::default();
        {
            let _home = EphemeralKeyringHome::create(
                parent.path(),
                Path::new("key.asc"),
                &Passphrase::Inline("secret".into()),
                &tool,
            )
            .unwrap();
            assert_eq!(entries(parent.path()), 1);
        }
        assert_eq!(entries(parent.path()), 0);
    }

    #[test]
    fn test_gnupg_invocations() {
        let gpg = GnuPg::default();
        let import = gpg.import_invocation(
            Path::new("/tmp/h"),
            Path::new("/keys/k.asc"),
            Path::new("/tmp/h/passphrase"),
        );
        assert_eq!(import.program(), "gpg");
        assert_eq!(
            import.args_lossy(),
            vec![
                "--homedir",
                "/tmp/h",
                "--batch",
                "--pinentry-mode",
                "loopback",
                "--passphrase-file",
                "/tmp/h/passphrase",
                "--import",
                "/keys/k.asc"
            ]
        );

        let kill = gpg.shutdown_invocation(Path::new("/tmp/h"));
        assert_eq!(kill.program(), "gpgconf");
        assert_eq!(kill.args_lossy(), vec!["--homedir", "/tmp/h", "--kill", "gpg-agent"]);
    }
}

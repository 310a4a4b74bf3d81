//! Package signing
//!
//! The orchestrator walks one signing run through its states:
//!
//! `Idle -> KeyValidated -> EphemeralHomeReady -> Signing -> Torndown`
//!
//! A key that fails validation ends in `Rejected` without creating
//! anything on disk. Backends without a keyring skip `EphemeralHomeReady`.
//! Once a keyring home exists it is always torn down, whether signing
//! succeeded or stopped at the first failing package.

mod key;
mod keyring;
mod rpmsign;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use key::{KeyRejection, Passphrase, SignerBackend, SigningKey, ValidatedKey};
pub use keyring::{EphemeralKeyringHome, GnuPg, KeyringError, KeyringTool, KEYRING_HOME_PREFIX};
pub use rpmsign::{
    PackageSigner, RpmSign, SigningContext, SQ_SIGN_CMD, SQ_SIGN_WITH_KEY_FILE_CMD,
};

use crate::process::ProcessError;

/// Signing errors
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("unable to set up the ephemeral keyring: {0}")]
    Setup(#[from] KeyringError),

    #[error("signing failed for {artifact} ({signed} of {total} already signed): {source}")]
    Failed {
        artifact: PathBuf,
        signed: usize,
        total: usize,
        #[source]
        source: ProcessError,
    },
}

/// Signing run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningState {
    Idle,
    KeyValidated,
    EphemeralHomeReady,
    Signing,
    Torndown,
    Rejected,
}

impl SigningState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SigningState::Torndown | SigningState::Rejected)
    }
}

/// What the signing step did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SigningOutcome {
    Skipped { reason: String },
    Signed { backend: SignerBackend, count: usize },
}

/// Drives one signing run
pub struct SigningOrchestrator<'a> {
    signer: &'a dyn PackageSigner,
    keyring: &'a dyn KeyringTool,
    keyring_parent: PathBuf,
    state: SigningState,
}

impl<'a> SigningOrchestrator<'a> {
    pub fn new(
        signer: &'a dyn PackageSigner,
        keyring: &'a dyn KeyringTool,
        keyring_parent: impl Into<PathBuf>,
    ) -> Self {
        Self {
            signer,
            keyring,
            keyring_parent: keyring_parent.into(),
            state: SigningState::Idle,
        }
    }

    pub fn state(&self) -> SigningState {
        self.state
    }

    fn transition(&mut self, next: SigningState) {
        debug!(from = ?self.state, to = ?next, "signing state");
        self.state = next;
    }

    /// Validate `key`, or record why signing is skipped.
    pub fn validate(&mut self, key: &SigningKey) -> Result<ValidatedKey, KeyRejection> {
        match key.validate() {
            Ok(validated) => {
                debug!(backend = %validated.backend(), "signing key accepted");
                self.transition(SigningState::KeyValidated);
                Ok(validated)
            }
            Err(KeyRejection::Empty) => {
                debug!("no signing key supplied");
                self.transition(SigningState::Rejected);
                Err(KeyRejection::Empty)
            }
            Err(rejection) => {
                warn!(reason = %rejection, "signing key rejected, packages will not be signed");
                self.transition(SigningState::Rejected);
                Err(rejection)
            }
        }
    }

    /// Sign `artifacts` in order, stopping at the first failure.
    ///
    /// Packages signed before a failure stay signed.
    pub fn sign(
        &mut self,
        key: &ValidatedKey,
        artifacts: &[PathBuf],
    ) -> Result<usize, SigningError> {
        if self.state != SigningState::KeyValidated {
            self.transition(SigningState::KeyValidated);
        }

        let home = if key.backend().needs_keyring() {
            match self.open_keyring(key) {
                Ok(home) => {
                    self.transition(SigningState::EphemeralHomeReady);
                    Some(home)
                }
                Err(e) => {
                    self.transition(SigningState::Torndown);
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.transition(SigningState::Signing);
        let result = self.sign_all(key, home.as_ref(), artifacts);

        if let Some(home) = home {
            home.teardown();
        }
        self.transition(SigningState::Torndown);

        result
    }

    /// Validate and sign in one call.
    pub fn run(
        &mut self,
        key: &SigningKey,
        artifacts: &[PathBuf],
    ) -> Result<SigningOutcome, SigningError> {
        let validated = match self.validate(key) {
            Ok(validated) => validated,
            Err(rejection) => {
                return Ok(SigningOutcome::Skipped {
                    reason: rejection.to_string(),
                })
            }
        };
        let count = self.sign(&validated, artifacts)?;
        Ok(SigningOutcome::Signed {
            backend: validated.backend(),
            count,
        })
    }

    fn open_keyring(&self, key: &ValidatedKey) -> Result<EphemeralKeyringHome<'a>, SigningError> {
        let key_path = key.key_path().unwrap_or(Path::new(""));
        let home =
            EphemeralKeyringHome::create(&self.keyring_parent, key_path, key.passphrase(), self.keyring)?;
        Ok(home)
    }

    fn sign_all(
        &self,
        key: &ValidatedKey,
        home: Option<&EphemeralKeyringHome<'_>>,
        artifacts: &[PathBuf],
    ) -> Result<usize, SigningError> {
        let passphrase_file = match (home, key.passphrase()) {
            (Some(home), _) => Some(home.passphrase_file()),
            (None, Passphrase::File(path)) => Some(path.as_path()),
            (None, _) => None,
        };
        let context = SigningContext {
            key,
            keyring_home: home.map(|h| h.path()),
            passphrase_file,
        };

        for (signed, artifact) in artifacts.iter().enumerate() {
            self.signer
                .sign(artifact, &context)
                .map_err(|source| SigningError::Failed {
                    artifact: artifact.clone(),
                    signed,
                    total: artifacts.len(),
                    source,
                })?;
        }

        info!(count = artifacts.len(), backend = %key.backend(), "signed packages");
        Ok(artifacts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    /// Records every package it was asked to sign; fails on one name.
    #[derive(Default)]
    struct FakeSigner {
        fail_on: Option<&'static str>,
        signed: RefCell<Vec<PathBuf>>,
        homes: RefCell<Vec<Option<PathBuf>>>,
    }

    impl PackageSigner for FakeSigner {
        fn sign(&self, artifact: &Path, context: &SigningContext<'_>) -> Result<(), ProcessError> {
            self.homes
                .borrow_mut()
                .push(context.keyring_home.map(Path::to_path_buf));
            if let Some(home) = context.keyring_home {
                assert!(home.is_dir(), "keyring home gone while signing");
            }
            if self.fail_on.is_some_and(|name| artifact.ends_with(name)) {
                return Err(ProcessError::Spawn {
                    program: "rpmsign".into(),
                    source: io::Error::new(io::ErrorKind::Other, "bad signature"),
                });
            }
            self.signed.borrow_mut().push(artifact.to_path_buf());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeKeyring {
        imports: RefCell<usize>,
        shutdowns: RefCell<usize>,
    }

    impl KeyringTool for FakeKeyring {
        fn import(&self, _: &Path, _: &Path, _: &Path) -> Result<(), KeyringError> {
            *self.imports.borrow_mut() += 1;
            Ok(())
        }

        fn shutdown_agent(&self, _: &Path) -> Result<(), KeyringError> {
            *self.shutdowns.borrow_mut() += 1;
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        keyring_parent: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let keyring_parent = dir.path().join("keyrings");
            fs::create_dir(&keyring_parent).unwrap();
            fs::write(dir.path().join("key.asc"), "key").unwrap();
            Self {
                dir,
                keyring_parent,
            }
        }

        fn keyring_key(&self) -> SigningKey {
            SigningKey::new(
                Some("ABCD1234".into()),
                Some(self.dir.path().join("key.asc")),
                Some("secret".into()),
                None,
            )
        }

        fn artifacts(&self) -> Vec<PathBuf> {
            ["a.rpm", "b.rpm", "c.rpm"]
                .iter()
                .map(|n| self.dir.path().join(n))
                .collect()
        }

        fn keyring_homes(&self) -> usize {
            fs::read_dir(&self.keyring_parent).unwrap().count()
        }
    }

    #[test]
    fn test_mid_batch_failure_tears_down() {
        let fx = Fixture::new();
        let signer = FakeSigner {
            fail_on: Some("b.rpm"),
            ..Default::default()
        };
        let keyring = FakeKeyring::default();
        let mut orchestrator = SigningOrchestrator::new(&signer, &keyring, &fx.keyring_parent);

        let artifacts = fx.artifacts();
        let err = orchestrator.run(&fx.keyring_key(), &artifacts).unwrap_err();

        match err {
            SigningError::Failed {
                artifact, signed, total, ..
            } => {
                assert_eq!(artifact, artifacts[1]);
                assert_eq!(signed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(signer.signed.borrow().as_slice(), &artifacts[..1]);
        assert_eq!(fx.keyring_homes(), 0);
        assert_eq!(*keyring.shutdowns.borrow(), 1);
        assert_eq!(orchestrator.state(), SigningState::Torndown);
    }

    #[test]
    fn test_keyring_run_signs_everything() {
        let fx = Fixture::new();
        let signer = FakeSigner::default();
        let keyring = FakeKeyring::default();
        let mut orchestrator = SigningOrchestrator::new(&signer, &keyring, &fx.keyring_parent);

        let outcome = orchestrator.run(&fx.keyring_key(), &fx.artifacts()).unwrap();
        assert_eq!(
            outcome,
            SigningOutcome::Signed {
                backend: SignerBackend::EphemeralKeyring,
                count: 3
            }
        );
        assert_eq!(*keyring.imports.borrow(), 1);

        // one home shared by the whole batch
        let homes = signer.homes.borrow();
        assert!(homes.iter().all(|h| h.is_some() && *h == homes[0]));
        assert_eq!(fx.keyring_homes(), 0);
    }

    #[test]
    fn test_empty_key_creates_nothing() {
        let fx = Fixture::new();
        let signer = FakeSigner::default();
        let keyring = FakeKeyring::default();
        let mut orchestrator = SigningOrchestrator::new(&signer, &keyring, &fx.keyring_parent);

        let outcome = orchestrator.run(&SigningKey::default(), &fx.artifacts()).unwrap();
        assert!(matches!(outcome, SigningOutcome::Skipped { .. }));
        assert_eq!(orchestrator.state(), SigningState::Rejected);
        assert!(orchestrator.state().is_terminal());
        assert_eq!(fx.keyring_homes(), 0);
        assert_eq!(*keyring.imports.borrow(), 0);
        assert!(signer.signed.borrow().is_empty());
    }

    #[test]
    fn test_malformed_key_is_skipped() {
        let fx = Fixture::new();
        let signer = FakeSigner::default();
        let keyring = FakeKeyring::default();
        let mut orchestrator = SigningOrchestrator::new(&signer, &keyring, &fx.keyring_parent);

        let key = SigningKey::new(
            Some("ABCD1234".into()),
            Some(fx.dir.path().join("missing.asc")),
            Some("secret".into()),
            None,
        );
        let outcome = orchestrator.run(&key, &fx.artifacts()).unwrap();
        match outcome {
            SigningOutcome::Skipped { reason } => assert!(reason.contains("missing.asc")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(fx.keyring_homes(), 0);
    }

    #[test]
    fn test_sequoia_backend_skips_keyring() {
        let fx = Fixture::new();
        let signer = FakeSigner::default();
        let keyring = FakeKeyring::default();
        let mut orchestrator = SigningOrchestrator::new(&signer, &keyring, &fx.keyring_parent);

        let key = SigningKey::new(Some("ABCD1234".into()), None, None, None);
        let outcome = orchestrator.run(&key, &fx.artifacts()).unwrap();

        assert_eq!(
            outcome,
            SigningOutcome::Signed {
                backend: SignerBackend::SequoiaKeyId,
                count: 3
            }
        );
        assert_eq!(*keyring.imports.borrow(), 0);
        assert!(signer.homes.borrow().iter().all(Option::is_none));
    }

    #[test]
    fn test_setup_failure_is_reported() {
        let fx = Fixture::new();
        let signer = FakeSigner::default();
        let keyring = FakeKeyring::default();
        let missing_parent = fx.dir.path().join("no-such-parent");
        let mut orchestrator = SigningOrchestrator::new(&signer, &keyring, &missing_parent);

        let err = orchestrator.run(&fx.keyring_key(), &fx.artifacts()).unwrap_err();
        assert!(matches!(err, SigningError::Setup(_)));
        assert!(signer.signed.borrow().is_empty());
        assert_eq!(orchestrator.state(), SigningState::Torndown);
    }
}

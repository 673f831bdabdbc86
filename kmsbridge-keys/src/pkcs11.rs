//! PKCS#11 token manager
//!
//! Every operation runs on the blocking thread pool and follows the same
//! shape: find the slot whose token carries the configured serial number,
//! open a fresh read-only session, optionally log in, locate exactly one key
//! object, invoke `CKM_RSA_PKCS`. Sessions are closed when dropped and a
//! login is undone by [`LoginGuard`] on every exit path.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{TokenError, TokenResult};
use crate::key_types::KeyDescription;
use crate::token::TokenManager;
use async_trait::async_trait;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as Pkcs11Error, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::{AuthPin, Ulong};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Modulus size of the RSA key pairs used for encryption
pub const RSA_MODULUS_BITS: u64 = 2048;

/// Which half of a key pair to look up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Public,
    Private,
}

impl KeyClass {
    fn name(self) -> &'static str {
        match self {
            KeyClass::Public => "public key",
            KeyClass::Private => "private key",
        }
    }

    /// Search template for the key object with CKA_ID `id`
    pub fn template(self, id: u8) -> Vec<Attribute> {
        match self {
            KeyClass::Public => vec![
                Attribute::Class(ObjectClass::PUBLIC_KEY),
                Attribute::Id(vec![id]),
                Attribute::KeyType(KeyType::RSA),
                Attribute::ModulusBits(Ulong::from(RSA_MODULUS_BITS)),
            ],
            // Private key objects carry no CKA_MODULUS_BITS
            KeyClass::Private => vec![
                Attribute::Class(ObjectClass::PRIVATE_KEY),
                Attribute::Id(vec![id]),
                Attribute::KeyType(KeyType::RSA),
            ],
        }
    }
}

/// Token manager backed by a PKCS#11 provider library
///
/// The library is loaded on first use. A failed load is remembered and
/// reported by every later call until the process restarts.
#[derive(Clone)]
pub struct Pkcs11TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    library_path: PathBuf,
    library: OnceCell<Result<Pkcs11, String>>,
    // Login state is shared by all sessions of this process on a token
    operation_lock: Mutex<()>,
}

impl Pkcs11TokenManager {
    /// Create a token manager; the library at `library_path` is not loaded yet
    pub fn new(library_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                library_path: library_path.into(),
                library: OnceCell::new(),
                operation_lock: Mutex::new(()),
            }),
        }
    }

    pub fn library_path(&self) -> &Path {
        &self.inner.library_path
    }

    async fn run<T, F>(&self, operation: &'static str, serial: String, f: F) -> TokenResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> TokenResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || {
            let _serialized = inner
                .operation_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            f(&inner)
        })
        .await
        .unwrap_or_else(|e| Err(TokenError::Worker(e.to_string())));

        match &result {
            Ok(_) => debug!(operation, serial = %serial, "Token operation completed"),
            Err(e @ TokenError::PinIncorrect(_)) => {
                warn!(operation, serial = %serial, error = %e, "Token rejected PIN")
            }
            Err(e) => error!(operation, serial = %serial, error = %e, "Token operation failed"),
        }
        result
    }
}

#[async_trait]
impl TokenManager for Pkcs11TokenManager {
    async fn encrypt(&self, key: &KeyDescription, plaintext: &[u8]) -> TokenResult<Vec<u8>> {
        let key = key.clone();
        let plaintext = plaintext.to_vec();
        let serial = key.token_serial_number().to_string();
        self.run("encrypt", serial, move |inner| inner.encrypt(&key, &plaintext))
            .await
    }

    async fn decrypt(&self, key: &KeyDescription, ciphertext: &[u8]) -> TokenResult<Vec<u8>> {
        let key = key.clone();
        let ciphertext = ciphertext.to_vec();
        let serial = key.token_serial_number().to_string();
        self.run("decrypt", serial, move |inner| inner.decrypt(&key, &ciphertext))
            .await
    }

    async fn verify_keys(&self, keys: &[KeyDescription]) -> TokenResult<()> {
        let keys = keys.to_vec();
        let serials = keys
            .iter()
            .map(KeyDescription::token_serial_number)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join(",");
        self.run("verify_keys", serials, move |inner| inner.verify_keys(&keys))
            .await
    }
}

impl Inner {
    fn library(&self) -> TokenResult<&Pkcs11> {
        self.library
            .get_or_init(|| load_library(&self.library_path))
            .as_ref()
            .map_err(|e| TokenError::LibraryUnavailable(e.clone()))
    }

    fn encrypt(&self, key: &KeyDescription, plaintext: &[u8]) -> TokenResult<Vec<u8>> {
        let pkcs11 = self.library()?;
        let slot = select_slot(pkcs11, key.token_serial_number())?;
        let session = pkcs11.open_ro_session(slot)?;

        let public_key = find_single_key(
            &session,
            key.token_serial_number(),
            key.on_token_key_id(),
            KeyClass::Public,
        )?;
        Ok(session.encrypt(&Mechanism::RsaPkcs, public_key, plaintext)?)
    }

    fn decrypt(&self, key: &KeyDescription, ciphertext: &[u8]) -> TokenResult<Vec<u8>> {
        let pkcs11 = self.library()?;
        let slot = select_slot(pkcs11, key.token_serial_number())?;
        let session = pkcs11.open_ro_session(slot)?;
        let _login = LoginGuard::login(&session, key.token_serial_number(), key.token_pin())?;

        let private_key = find_single_key(
            &session,
            key.token_serial_number(),
            key.on_token_key_id(),
            KeyClass::Private,
        )?;
        Ok(session.decrypt(&Mechanism::RsaPkcs, private_key, ciphertext)?)
    }

    fn verify_keys(&self, keys: &[KeyDescription]) -> TokenResult<()> {
        let pkcs11 = self.library()?;

        for ((serial, pin), ids) in group_by_token(keys) {
            let slot = select_slot(pkcs11, serial)?;
            let session = pkcs11.open_ro_session(slot)?;
            let _login = LoginGuard::login(&session, serial, pin)?;

            for id in ids {
                find_single_key(&session, serial, id, KeyClass::Private)?;
                find_single_key(&session, serial, id, KeyClass::Public)?;
            }
            debug!(serial = %serial, "All requested key objects present");
        }

        Ok(())
    }
}

/// Distinct on-token ids per (serial, PIN), one session and login each
fn group_by_token(keys: &[KeyDescription]) -> BTreeMap<(&str, &str), BTreeSet<u8>> {
    let mut groups: BTreeMap<(&str, &str), BTreeSet<u8>> = BTreeMap::new();
    for key in keys {
        groups
            .entry((key.token_serial_number(), key.token_pin()))
            .or_default()
            .insert(key.on_token_key_id());
    }
    groups
}

/// Logged-in state of a session, undone when dropped
struct LoginGuard<'a> {
    session: &'a Session,
    serial: &'a str,
}

impl<'a> LoginGuard<'a> {
    fn login(session: &'a Session, serial: &'a str, pin: &str) -> TokenResult<Self> {
        let pin = AuthPin::new(pin.into());
        match session.login(UserType::User, Some(&pin)) {
            Ok(()) => Ok(Self { session, serial }),
            Err(Pkcs11Error::Pkcs11(RvError::PinIncorrect, _)) => {
                Err(TokenError::PinIncorrect(serial.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.logout() {
            warn!(serial = %self.serial, error = %e, "Failed to log out of token");
        }
    }
}

fn load_library(path: &Path) -> Result<Pkcs11, String> {
    let loaded = Pkcs11::new(path).and_then(|pkcs11| {
        pkcs11.initialize(CInitializeArgs::OsThreads)?;
        Ok(pkcs11)
    });

    match loaded {
        Ok(pkcs11) => {
            info!(path = %path.display(), "PKCS#11 library loaded");
            Ok(pkcs11)
        }
        Err(e) => {
            let message = format!("failed to load \"{}\": {}", path.display(), e);
            error!(path = %path.display(), error = %e, "Failed to load PKCS#11 library");
            Err(message)
        }
    }
}

/// First slot whose present token has exactly this serial number
fn select_slot(pkcs11: &Pkcs11, serial: &str) -> TokenResult<Slot> {
    for slot in pkcs11.get_slots_with_token()? {
        match pkcs11.get_token_info(slot) {
            Ok(info) if info.serial_number() == serial => return Ok(slot),
            Ok(_) => {}
            Err(e) => {
                warn!(slot = ?slot, error = %e, "Failed to read token info, skipping slot");
            }
        }
    }

    Err(TokenError::TokenNotPresent(serial.to_string()))
}

fn find_single_key(
    session: &Session,
    serial: &str,
    id: u8,
    class: KeyClass,
) -> TokenResult<ObjectHandle> {
    let mut handles = session.find_objects(&class.template(id))?;
    match handles.len() {
        1 => Ok(handles.remove(0)),
        0 => Err(TokenError::KeyObjectNotFound {
            serial: serial.to_string(),
            id,
            class: class.name(),
        }),
        count => Err(TokenError::AmbiguousKeyObject {
            serial: serial.to_string(),
            id,
            class: class.name(),
            count,
        }),
    }
}

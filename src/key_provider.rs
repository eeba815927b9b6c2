//! KeyProvider abstraction: the two roles that can stand on the reader
//! side of AuthenticateEV2First. `LocalKeyProvider` holds the raw AES key
//! directly; `CloudKeyProvider` delegates the cryptography to the cloud,
//! keeping only the returned `auth_id` around.

use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cloud::{CloudAuthOutcome, CloudClient};
use crate::crypto;
use crate::error::{Error, Result};
use crate::types::{Identifier, TagUid};

/// Session keys produced by a successful Authenticate, transferred once
/// into a [`crate::secure_messaging::SecureMessaging`] context. Zeroed on
/// drop.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    pub enc_key: [u8; 16],
    pub mac_key: [u8; 16],
    pub transaction_identifier: [u8; 4],
    pub picc_capabilities: [u8; 6],
}

/// The mutual-auth role a reader-side participant plays during
/// AuthenticateEV2First.
#[async_trait]
pub trait KeyProvider: Send {
    fn key_number(&self) -> u8;

    /// Given the tag's encrypted RndB, produce the 32-byte Part 2 payload.
    async fn create_ntag_challenge(&mut self, encrypted_rnd_b: &[u8; 16]) -> Result<[u8; 32]>;

    /// Given the tag's encrypted Part 3, verify RndA' and derive session
    /// keys.
    async fn verify_and_compute_session_keys(
        &mut self,
        encrypted_part3: &[u8; 32],
    ) -> Result<SessionKeys>;

    /// Called on any Part-1/Part-2 transport or crypto failure, before the
    /// error is surfaced, so no partial authentication state lingers.
    async fn cancel_authentication(&mut self);
}

#[derive(ZeroizeOnDrop)]
struct PendingAuth {
    rnd_a: [u8; 16],
    rnd_b: [u8; 16],
    #[zeroize(skip)]
    part2_cipher_tail: [u8; 16],
}

/// Local variant: holds the 16-byte AES key and an RNG directly.
pub struct LocalKeyProvider<R: RngCore + Send = rand::rngs::OsRng> {
    key_number: u8,
    auth_key: [u8; 16],
    rng: R,
    pending: Option<PendingAuth>,
}

impl LocalKeyProvider<rand::rngs::OsRng> {
    pub fn new(key_number: u8, auth_key: [u8; 16]) -> Self {
        LocalKeyProvider::with_rng(key_number, auth_key, rand::rngs::OsRng)
    }
}

impl<R: RngCore + Send> LocalKeyProvider<R> {
    pub fn with_rng(key_number: u8, auth_key: [u8; 16], rng: R) -> Self {
        LocalKeyProvider {
            key_number,
            auth_key,
            rng,
            pending: None,
        }
    }
}

impl<R: RngCore + Send> Drop for LocalKeyProvider<R> {
    fn drop(&mut self) {
        self.auth_key.zeroize();
    }
}

#[async_trait]
impl<R: RngCore + Send> KeyProvider for LocalKeyProvider<R> {
    fn key_number(&self) -> u8 {
        self.key_number
    }

    async fn create_ntag_challenge(&mut self, encrypted_rnd_b: &[u8; 16]) -> Result<[u8; 32]> {
        let rnd_b_plain = crypto::aes_cbc_decrypt(&self.auth_key, &[0u8; 16], encrypted_rnd_b)?;
        let mut rnd_b = [0u8; 16];
        rnd_b.copy_from_slice(&rnd_b_plain);

        let mut rnd_a = [0u8; 16];
        self.rng.fill_bytes(&mut rnd_a);

        let mut plaintext2 = [0u8; 32];
        plaintext2[..16].copy_from_slice(&rnd_a);
        plaintext2[16..].copy_from_slice(&crypto::rotate_left_1(&rnd_b));

        let cipher2 = crypto::aes_cbc_encrypt(&self.auth_key, encrypted_rnd_b, &plaintext2)?;
        let mut part2 = [0u8; 32];
        part2.copy_from_slice(&cipher2);

        let mut part2_cipher_tail = [0u8; 16];
        part2_cipher_tail.copy_from_slice(&cipher2[16..32]);

        self.pending = Some(PendingAuth {
            rnd_a,
            rnd_b,
            part2_cipher_tail,
        });

        Ok(part2)
    }

    async fn verify_and_compute_session_keys(
        &mut self,
        encrypted_part3: &[u8; 32],
    ) -> Result<SessionKeys> {
        let pending = self.pending.take().ok_or_else(|| {
            Error::failed_precondition("verify_and_compute_session_keys called before create_ntag_challenge")
        })?;

        let plain3 =
            crypto::aes_cbc_decrypt(&self.auth_key, &pending.part2_cipher_tail, encrypted_part3)?;

        let mut rnd_a_prime = [0u8; 16];
        rnd_a_prime.copy_from_slice(&plain3[0..16]);
        let mut ti = [0u8; 4];
        ti.copy_from_slice(&plain3[16..20]);
        let mut picc_caps = [0u8; 6];
        picc_caps.copy_from_slice(&plain3[20..26]);

        if !crypto::verify_rnd_a_prime(&pending.rnd_a, &rnd_a_prime) {
            return Err(Error::unauthenticated(
                "tag failed to prove knowledge of the authentication key",
            ));
        }

        let (enc_key, mac_key) =
            crypto::derive_session_keys(&self.auth_key, &pending.rnd_a, &pending.rnd_b)?;

        Ok(SessionKeys {
            enc_key,
            mac_key,
            transaction_identifier: ti,
            picc_capabilities: picc_caps,
        })
    }

    async fn cancel_authentication(&mut self) {
        self.pending = None;
    }
}

/// Cloud variant: delegates cryptography to a remote service that knows
/// the diversified key, retaining only the `auth_id` it's handed back.
pub struct CloudKeyProvider {
    key_number: u8,
    tag_uid: TagUid,
    cloud: Arc<dyn CloudClient>,
    auth_id: Option<Identifier>,
}

impl CloudKeyProvider {
    pub fn new(key_number: u8, tag_uid: TagUid, cloud: Arc<dyn CloudClient>) -> Self {
        CloudKeyProvider {
            key_number,
            tag_uid,
            cloud,
            auth_id: None,
        }
    }

    /// The `auth_id` the cloud returned, retained after a successful
    /// authentication for the verifier to insert into the auth cache.
    pub fn auth_id(&self) -> Option<Identifier> {
        self.auth_id
    }
}

#[async_trait]
impl KeyProvider for CloudKeyProvider {
    fn key_number(&self) -> u8 {
        self.key_number
    }

    async fn create_ntag_challenge(&mut self, encrypted_rnd_b: &[u8; 16]) -> Result<[u8; 32]> {
        let (auth_id, challenge) = self
            .cloud
            .authenticate_tag(self.tag_uid, self.key_number, encrypted_rnd_b)
            .await?;
        self.auth_id = Some(auth_id);
        Ok(challenge)
    }

    async fn verify_and_compute_session_keys(
        &mut self,
        encrypted_part3: &[u8; 32],
    ) -> Result<SessionKeys> {
        let auth_id = self.auth_id.ok_or_else(|| {
            Error::failed_precondition("verify_and_compute_session_keys called before create_ntag_challenge")
        })?;

        match self.cloud.complete_tag_auth(&auth_id, encrypted_part3).await? {
            CloudAuthOutcome::SessionKeys {
                enc_key,
                mac_key,
                ti,
                picc_caps,
            } => Ok(SessionKeys {
                enc_key,
                mac_key,
                transaction_identifier: ti,
                picc_capabilities: picc_caps,
            }),
            CloudAuthOutcome::Rejected { message } => {
                self.auth_id = None;
                Err(Error::unauthenticated(message))
            }
        }
    }

    async fn cancel_authentication(&mut self) {
        self.auth_id = None;
    }
}

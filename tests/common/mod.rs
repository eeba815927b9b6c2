//! A software NTAG424 DNA emulator: enough of the real chip's
//! AuthenticateEV2First / GetCardUid behavior to exercise the full
//! verifier pipeline against real AES/CMAC round trips instead of
//! scripted byte literals. Lives under `tests/common` (a support module,
//! not its own test binary) and is shared by the integration tests in
//! `tests/end_to_end.rs`.
//!
//! Scope: SelectApplication, Authenticate, and GetCardUid only — the
//! three operations every verifier tap actually exercises.
//! ReadData/WriteData/ChangeKey are already exercised against literal
//! APDU bytes in `src/tag/mod.rs`'s own tests, so the emulator doesn't
//! duplicate them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ntag_access_core::crypto;
use ntag_access_core::error::{Error, Result};
use ntag_access_core::reader::{NfcEvent, Reader, TagMetadata};
use ntag_access_core::types::TagUid;
use rand::RngCore;
use tokio::sync::Mutex;

pub const KEY_SLOTS: usize = 5;

/// A fixed, non-secret "PICC capabilities" value for test sessions —
/// real content is opaque to the core, which never inspects it.
const PICC_CAPS: [u8; 6] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05];

struct PendingAuth {
    key_number: u8,
    rnd_b: [u8; 16],
    encrypted_rnd_b: [u8; 16],
}

struct TagSession {
    enc_key: [u8; 16],
    mac_key: [u8; 16],
    ti: [u8; 4],
    cmd_ctr: u16,
}

impl TagSession {
    fn iv_block(&self, prefix: (u8, u8)) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[0] = prefix.0;
        block[1] = prefix.1;
        block[2..6].copy_from_slice(&self.ti);
        block[6..8].copy_from_slice(&self.cmd_ctr.to_le_bytes());
        block
    }

    fn iv_cmd(&self) -> [u8; 16] {
        crypto::aes_ecb_encrypt(&self.enc_key, &self.iv_block((0xA5, 0x5A))).unwrap()
    }

    fn iv_resp(&self) -> [u8; 16] {
        crypto::aes_ecb_encrypt(&self.enc_key, &self.iv_block((0x5A, 0xA5))).unwrap()
    }

    fn cmact(&self, data: &[u8]) -> [u8; 8] {
        let full = crypto::aes_cmac(&self.mac_key, data).unwrap();
        [
            full[1], full[3], full[5], full[7], full[9], full[11], full[13], full[15],
        ]
    }

    fn command_mac(&self, cmd: u8, header: &[u8], data: &[u8]) -> [u8; 8] {
        let mut input = vec![cmd];
        input.extend_from_slice(&self.cmd_ctr.to_le_bytes());
        input.extend_from_slice(&self.ti);
        input.extend_from_slice(header);
        input.extend_from_slice(data);
        self.cmact(&input)
    }

    fn response_mac(&self, response_code: u8, data: &[u8]) -> [u8; 8] {
        let mut input = vec![response_code];
        input.extend_from_slice(&self.cmd_ctr.to_le_bytes());
        input.extend_from_slice(&self.ti);
        input.extend_from_slice(data);
        self.cmact(&input)
    }

    /// Response-direction full-mode encrypt: ISO 7816-4 pad, then
    /// AES-CBC under IVResp (the mirror of `SecureMessaging::decrypt_full`
    /// on the reader side).
    fn encrypt_response(&self, plain: &[u8]) -> Vec<u8> {
        let padded_len = (plain.len() / 16 + 1) * 16;
        let mut padded = vec![0u8; padded_len];
        padded[..plain.len()].copy_from_slice(plain);
        padded[plain.len()] = 0x80;
        crypto::aes_cbc_encrypt(&self.enc_key, &self.iv_resp(), &padded).unwrap()
    }
}

/// An in-memory stand-in for a single NTAG424 DNA chip, driven entirely
/// through the `Reader` trait so the real `Ntag424Tag`/`Verifier` code
/// exercises it exactly as it would a physical reader.
pub struct EmulatedTag {
    keys: [[u8; 16]; KEY_SLOTS],
    real_uid: TagUid,
    events: Mutex<VecDeque<NfcEvent>>,
    pending: Mutex<Option<PendingAuth>>,
    session: Mutex<Option<TagSession>>,
    #[allow(dead_code)]
    files: Mutex<HashMap<u8, Vec<u8>>>,
}

impl EmulatedTag {
    pub fn new(real_uid: TagUid, keys: [[u8; 16]; KEY_SLOTS]) -> Arc<Self> {
        Arc::new(EmulatedTag {
            keys,
            real_uid,
            events: Mutex::new(VecDeque::new()),
            pending: Mutex::new(None),
            session: Mutex::new(None),
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Queues an arrival event. `transport_uid` is the anticollision UID
    /// the reader sees before authentication — NTAG424 normally randomizes
    /// this, so tests are free to pass something other than `real_uid`.
    pub fn push_arrival(&self, transport_uid: TagUid, supports_iso14443_4: bool) {
        self.events
            .try_lock()
            .unwrap()
            .push_back(NfcEvent::Arrived(TagMetadata {
                uid: transport_uid,
                sak: 0x20,
                target_number: 1,
                supports_iso14443_4,
            }));
    }

    pub fn push_departure(&self) {
        self.events.try_lock().unwrap().push_back(NfcEvent::Departed);
    }

    async fn dispatch(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        if apdu.len() < 4 {
            return Err(Error::invalid_argument("apdu shorter than a header"));
        }
        match apdu[1] {
            0xA4 => Ok(vec![0x90, 0x00]),
            0x71 => self.auth_part1(apdu).await,
            0xAF => self.auth_part2(apdu).await,
            0x51 => self.get_card_uid(apdu).await,
            other => Err(Error::unimplemented(format!(
                "emulator does not implement instruction 0x{other:02X}"
            ))),
        }
    }

    async fn auth_part1(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        let key_number = apdu[5];
        let key = self.keys[key_number as usize];

        let mut rnd_b = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut rnd_b);
        let encrypted_rnd_b: [u8; 16] = crypto::aes_cbc_encrypt(&key, &[0u8; 16], &rnd_b)?
            .try_into()
            .unwrap();

        *self.pending.lock().await = Some(PendingAuth {
            key_number,
            rnd_b,
            encrypted_rnd_b,
        });

        let mut response = encrypted_rnd_b.to_vec();
        response.extend_from_slice(&[0x91, 0xAF]);
        Ok(response)
    }

    async fn auth_part2(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::failed_precondition("part 2 received before part 1"))?;
        let key = self.keys[pending.key_number as usize];
        let part2_cipher = &apdu[5..37];

        let plain2 = crypto::aes_cbc_decrypt(&key, &pending.encrypted_rnd_b, part2_cipher)?;
        let mut rnd_a = [0u8; 16];
        rnd_a.copy_from_slice(&plain2[0..16]);
        let mut rnd_b_prime = [0u8; 16];
        rnd_b_prime.copy_from_slice(&plain2[16..32]);

        if !crypto::verify_rnd_a_prime(&pending.rnd_b, &rnd_b_prime) {
            return Err(Error::unauthenticated("reader failed to prove knowledge of the key"));
        }

        let ti = [0x10, 0x20, 0x30, 0x40];
        let mut plain3 = [0u8; 32];
        plain3[0..16].copy_from_slice(&crypto::rotate_left_1(&rnd_a));
        plain3[16..20].copy_from_slice(&ti);
        plain3[20..26].copy_from_slice(&PICC_CAPS);

        let iv3: [u8; 16] = part2_cipher[16..32].try_into().unwrap();
        let cipher3 = crypto::aes_cbc_encrypt(&key, &iv3, &plain3)?;

        let (enc_key, mac_key) = crypto::derive_session_keys(&key, &rnd_a, &pending.rnd_b)?;
        *self.session.lock().await = Some(TagSession {
            enc_key,
            mac_key,
            ti,
            cmd_ctr: 0,
        });

        let mut response = cipher3;
        response.extend_from_slice(&[0x90, 0x00]);
        Ok(response)
    }

    async fn get_card_uid(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::unauthenticated("no active session"))?;

        let received_cmac = &apdu[5..13];
        let expected_cmac = session.command_mac(0x51, &[], &[]);
        if expected_cmac != received_cmac {
            return Err(Error::data_loss("command CMAC mismatch"));
        }

        session.cmd_ctr += 1;
        let encrypted_uid = session.encrypt_response(self.real_uid.as_slice());
        let response_cmac = session.response_mac(0x00, &encrypted_uid);

        let mut response = encrypted_uid;
        response.extend_from_slice(&response_cmac);
        response.extend_from_slice(&[0x90, 0x00]);
        Ok(response)
    }
}

#[async_trait]
impl Reader for EmulatedTag {
    async fn subscribe(&self) -> Result<NfcEvent> {
        self.events
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| Error::unavailable("no scripted events remaining"))
    }

    async fn transceive(&self, command: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        self.dispatch(command).await
    }
}

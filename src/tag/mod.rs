//! The NTAG424 tag object: APDU framing, status-word mapping, and the
//! authenticated operation set (Authenticate, GetCardUid, ReadData,
//! WriteData, ChangeKey). Created once per RF encounter; owns the
//! [`SecureMessaging`] context installed by a successful Authenticate.

use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroize;

use crate::crypto;
use crate::error::{Error, ErrorKind, Result};
use crate::key_provider::KeyProvider;
use crate::reader::Reader;
use crate::secure_messaging::SecureMessaging;
use crate::types::TagUid;

/// Default transport timeout for every tag-facing command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

const CLA_NATIVE: u8 = 0x90;

/// Communication mode for ReadData/WriteData.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommMode {
    Plain,
    Mac,
    Full,
}

/// Proof that a caller authenticated against a particular tag instance.
/// Freely copyable; authority is validated against the owning tag at use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken {
    pub key_number: u8,
    pub auth_serial: u32,
}

enum StatusOutcome {
    Ok,
    Chaining,
    Err(Error),
}

fn classify_status(sw1: u8, sw2: u8) -> StatusOutcome {
    match (sw1, sw2) {
        (0x90, 0x00) | (0x91, 0x00) => StatusOutcome::Ok,
        (0x91, 0xAF) => StatusOutcome::Chaining,
        (0x91, 0x1C) => StatusOutcome::Err(Error::invalid_argument("illegal command")),
        (0x91, 0x1E) => StatusOutcome::Err(Error::data_loss("integrity error")),
        (0x91, 0x40) => StatusOutcome::Err(Error::not_found("no such key")),
        (0x91, 0x7E) => StatusOutcome::Err(Error::invalid_argument("length error")),
        (0x91, 0x9D) => StatusOutcome::Err(Error::permission_denied("command not allowed")),
        (0x91, 0x9E) => StatusOutcome::Err(Error::invalid_argument("parameter error")),
        (0x91, 0xAE) => StatusOutcome::Err(Error::unauthenticated("authentication required")),
        (0x91, 0xBE) => StatusOutcome::Err(Error::out_of_range("out of bounds / eof reached")),
        (0x91, 0xCA) => StatusOutcome::Err(Error::aborted("command aborted")),
        (0x91, 0xEE) => StatusOutcome::Err(Error::internal("memory error")),
        _ => StatusOutcome::Err(Error::unknown(format!(
            "unrecognized status word {sw1:02X}{sw2:02X}"
        ))),
    }
}

fn build_apdu(ins: u8, p1: u8, p2: u8, data: &[u8], le: Option<u8>) -> Vec<u8> {
    let mut apdu = Vec::with_capacity(5 + data.len() + 1);
    apdu.push(CLA_NATIVE);
    apdu.push(ins);
    apdu.push(p1);
    apdu.push(p2);
    if !data.is_empty() {
        apdu.push(data.len() as u8);
        apdu.extend_from_slice(data);
    }
    apdu.push(le.unwrap_or(0x00));
    apdu
}

fn offset_le24(offset: u32) -> [u8; 3] {
    let bytes = offset.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// The NTAG424 DNA tag as seen from the reader side of an RF encounter.
pub struct Ntag424Tag {
    reader: Arc<dyn Reader>,
    command_timeout: Duration,
    secure_messaging: Option<SecureMessaging>,
    authenticated_key_number: u8,
    auth_serial: u32,
}

impl Ntag424Tag {
    pub fn new(reader: Arc<dyn Reader>) -> Self {
        Ntag424Tag::with_timeout(reader, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(reader: Arc<dyn Reader>, command_timeout: Duration) -> Self {
        Ntag424Tag {
            reader,
            command_timeout,
            secure_messaging: None,
            authenticated_key_number: 0,
            auth_serial: 0,
        }
    }

    pub fn auth_serial(&self) -> u32 {
        self.auth_serial
    }

    pub fn is_authenticated(&self) -> bool {
        self.secure_messaging.is_some()
    }

    /// Resets `secure_messaging` but never `auth_serial`.
    pub fn clear_session(&mut self) {
        self.secure_messaging = None;
    }

    fn validate_token(&self, token: SessionToken) -> Result<()> {
        if token.auth_serial != self.auth_serial {
            return Err(Error::failed_precondition(
                "session token's auth_serial does not match the tag's current serial",
            ));
        }
        Ok(())
    }

    fn secure_messaging_mut(&mut self) -> Result<&mut SecureMessaging> {
        self.secure_messaging
            .as_mut()
            .ok_or_else(|| Error::unauthenticated("no active secure messaging session"))
    }

    async fn transceive(&self, apdu: &[u8]) -> Result<(Vec<u8>, u8, u8)> {
        let mut response = self.reader.transceive(apdu, self.command_timeout).await?;
        if response.len() < 2 {
            return Err(Error::data_loss("response shorter than a status word"));
        }
        let sw2 = response.pop().unwrap();
        let sw1 = response.pop().unwrap();
        Ok((response, sw1, sw2))
    }

    /// `00 A4 04 0C 07 D2 76 00 00 85 01 01 00`; expects `90 00`.
    pub async fn select_application(&self) -> Result<()> {
        let apdu = [
            0x00, 0xA4, 0x04, 0x0C, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01, 0x00,
        ];
        let (_, sw1, sw2) = self.transceive(&apdu).await?;
        match classify_status(sw1, sw2) {
            StatusOutcome::Ok => Ok(()),
            StatusOutcome::Chaining => Err(Error::internal(
                "unexpected chaining response to SelectApplication",
            )),
            StatusOutcome::Err(e) => Err(e),
        }
    }

    /// AuthenticateEV2First: a two-step challenge/response exchange that
    /// installs a fresh [`SecureMessaging`] context on success.
    pub async fn authenticate(
        &mut self,
        key_provider: &mut dyn KeyProvider,
    ) -> Result<SessionToken> {
        let result = self.authenticate_inner(key_provider).await;
        if result.is_err() {
            key_provider.cancel_authentication().await;
        }
        result
    }

    async fn authenticate_inner(
        &mut self,
        key_provider: &mut dyn KeyProvider,
    ) -> Result<SessionToken> {
        let part1 = build_apdu(0x71, 0x00, 0x00, &[key_provider.key_number(), 0x00], None);
        let (data, sw1, sw2) = self.transceive(&part1).await?;
        match classify_status(sw1, sw2) {
            StatusOutcome::Chaining if data.len() == 16 => {}
            StatusOutcome::Ok | StatusOutcome::Chaining => {
                return Err(Error::unauthenticated(
                    "unexpected response length to Authenticate part 1",
                ))
            }
            StatusOutcome::Err(e) => return Err(e),
        }
        let mut encrypted_rnd_b = [0u8; 16];
        encrypted_rnd_b.copy_from_slice(&data);

        let part2_payload = key_provider.create_ntag_challenge(&encrypted_rnd_b).await?;

        let part2_apdu = build_apdu(0xAF, 0x00, 0x00, &part2_payload, None);
        let (data, sw1, sw2) = self.transceive(&part2_apdu).await?;
        match classify_status(sw1, sw2) {
            StatusOutcome::Ok if data.len() == 32 => {}
            _ => {
                return Err(Error::unauthenticated(
                    "unexpected response to Authenticate part 2",
                ))
            }
        }
        let mut encrypted_part3 = [0u8; 32];
        encrypted_part3.copy_from_slice(&data);

        let session_keys = key_provider
            .verify_and_compute_session_keys(&encrypted_part3)
            .await?;

        self.secure_messaging = Some(SecureMessaging::new(
            session_keys.enc_key,
            session_keys.mac_key,
            session_keys.transaction_identifier,
        ));
        self.authenticated_key_number = key_provider.key_number();
        self.auth_serial = self.auth_serial.wrapping_add(1);

        Ok(SessionToken {
            key_number: self.authenticated_key_number,
            auth_serial: self.auth_serial,
        })
    }

    /// `90 51 00 00 08 <CMACt> 00`; returns up to 7 UID bytes.
    pub async fn get_card_uid(&mut self, token: SessionToken) -> Result<TagUid> {
        self.validate_token(token)?;
        let sm = self.secure_messaging_mut()?;
        sm.ensure_counter_capacity()?;
        let cmac = sm.command_mac(0x51, &[], &[])?;
        let apdu = build_apdu(0x51, 0x00, 0x00, &cmac, None);

        let (data, sw1, sw2) = self.transceive(&apdu).await?;
        match classify_status(sw1, sw2) {
            StatusOutcome::Ok => {}
            StatusOutcome::Chaining => {
                return Err(Error::unimplemented("ISO-DEP chaining is not implemented"))
            }
            StatusOutcome::Err(e) => return Err(e),
        }
        if data.len() != 24 {
            return Err(Error::data_loss("GetCardUid response has unexpected length"));
        }
        let encrypted_uid = &data[0..16];
        let mut received_cmac = [0u8; 8];
        received_cmac.copy_from_slice(&data[16..24]);

        let sm = self.secure_messaging_mut()?;
        sm.increment_counter()?;
        if !sm.verify_response_mac(0x00, encrypted_uid, &received_cmac)? {
            return Err(Error::data_loss("GetCardUid response CMAC mismatch"));
        }
        let mut decrypted = sm.decrypt_full(encrypted_uid)?;
        let uid = TagUid::from_slice(&decrypted[..decrypted.len().min(7)]);
        decrypted.zeroize();
        uid
    }

    /// `90 AD` with `{file_no, offset, length}`; Plain mode omits the
    /// trailing CMACt. Chaining (`91 AF`) returns `Unimplemented`.
    pub async fn read_data(
        &mut self,
        token: SessionToken,
        file_no: u8,
        offset: u32,
        length: u32,
        mode: CommMode,
    ) -> Result<Vec<u8>> {
        self.validate_token(token)?;
        let mut header = Vec::with_capacity(7);
        header.push(file_no);
        header.extend_from_slice(&offset_le24(offset));
        header.extend_from_slice(&offset_le24(length));

        let sm = self.secure_messaging_mut()?;
        sm.ensure_counter_capacity()?;
        let mut data = header.clone();
        if mode != CommMode::Plain {
            let cmac = sm.command_mac(0xAD, &header, &[])?;
            data.extend_from_slice(&cmac);
        }
        let apdu = build_apdu(0xAD, 0x00, 0x00, &data, None);

        let (response, sw1, sw2) = self.transceive(&apdu).await?;
        match classify_status(sw1, sw2) {
            StatusOutcome::Ok => {}
            StatusOutcome::Chaining => {
                return Err(Error::unimplemented("ISO-DEP chaining is not implemented"))
            }
            StatusOutcome::Err(e) => return Err(e),
        }

        let sm = self.secure_messaging_mut()?;
        sm.increment_counter()?;

        match mode {
            CommMode::Plain => Ok(response),
            CommMode::Mac => {
                if response.len() < 8 {
                    return Err(Error::data_loss("ReadData response shorter than a CMACt"));
                }
                let split = response.len() - 8;
                let (payload, cmac_bytes) = response.split_at(split);
                let mut received = [0u8; 8];
                received.copy_from_slice(cmac_bytes);
                if !sm.verify_response_mac(0x00, payload, &received)? {
                    return Err(Error::data_loss("ReadData response CMAC mismatch"));
                }
                Ok(payload.to_vec())
            }
            CommMode::Full => {
                if response.len() < 8 {
                    return Err(Error::data_loss("ReadData response shorter than a CMACt"));
                }
                let split = response.len() - 8;
                let (ciphertext, cmac_bytes) = response.split_at(split);
                let mut received = [0u8; 8];
                received.copy_from_slice(cmac_bytes);
                if !sm.verify_response_mac(0x00, ciphertext, &received)? {
                    return Err(Error::data_loss("ReadData response CMAC mismatch"));
                }
                sm.decrypt_full(ciphertext)
            }
        }
    }

    /// `90 8D` with `{file_no, offset, length}` followed by the write
    /// payload (plaintext or padded ciphertext) then, in non-Plain modes,
    /// a trailing CMACt.
    pub async fn write_data(
        &mut self,
        token: SessionToken,
        file_no: u8,
        offset: u32,
        plaintext: &[u8],
        mode: CommMode,
    ) -> Result<()> {
        self.validate_token(token)?;
        let mut header = Vec::with_capacity(7);
        header.push(file_no);
        header.extend_from_slice(&offset_le24(offset));
        header.extend_from_slice(&offset_le24(plaintext.len() as u32));

        let sm = self.secure_messaging_mut()?;
        sm.ensure_counter_capacity()?;
        let payload = match mode {
            CommMode::Plain | CommMode::Mac => plaintext.to_vec(),
            CommMode::Full => sm.encrypt_full(plaintext)?,
        };

        let mut data = header.clone();
        data.extend_from_slice(&payload);
        if mode != CommMode::Plain {
            let cmac = sm.command_mac(0x8D, &header, &payload)?;
            data.extend_from_slice(&cmac);
        }
        let apdu = build_apdu(0x8D, 0x00, 0x00, &data, None);

        let (response, sw1, sw2) = self.transceive(&apdu).await?;
        match classify_status(sw1, sw2) {
            StatusOutcome::Ok => {}
            StatusOutcome::Chaining => {
                return Err(Error::unimplemented("ISO-DEP chaining is not implemented"))
            }
            StatusOutcome::Err(e) => return Err(e),
        }

        let sm = self.secure_messaging_mut()?;
        sm.increment_counter()?;

        if mode != CommMode::Plain {
            if response.len() != 8 {
                return Err(Error::data_loss("WriteData response is not a bare CMACt"));
            }
            let mut received = [0u8; 8];
            received.copy_from_slice(&response);
            if !sm.verify_response_mac(0x00, &[], &received)? {
                return Err(Error::data_loss("WriteData response CMAC mismatch"));
            }
        }
        Ok(())
    }

    /// `90 C4 00 00 <Lc> KeyNo <ciphertext> <CMACt> 00`.
    ///
    /// `old_key` is required (and ignored) for the currently authenticated
    /// slot, and required for every other slot to compute the XOR'd
    /// plaintext and CRC32NK.
    pub async fn change_key(
        &mut self,
        token: SessionToken,
        key_no: u8,
        mut new_key: [u8; 16],
        mut old_key: [u8; 16],
        key_version: u8,
    ) -> Result<()> {
        self.validate_token(token)?;
        let is_auth_key = key_no == self.authenticated_key_number;

        let mut plaintext = if is_auth_key {
            let mut p = Vec::with_capacity(17);
            p.extend_from_slice(&new_key);
            p.push(key_version);
            p
        } else {
            let mut p = Vec::with_capacity(21);
            let mut xored = [0u8; 16];
            for i in 0..16 {
                xored[i] = new_key[i] ^ old_key[i];
            }
            p.extend_from_slice(&xored);
            p.push(key_version);
            p.extend_from_slice(&crypto::crc32_nk(&new_key));
            xored.zeroize();
            p
        };

        let result = self
            .change_key_inner(token, key_no, is_auth_key, &plaintext)
            .await;

        new_key.zeroize();
        old_key.zeroize();
        plaintext.zeroize();

        result
    }

    async fn change_key_inner(
        &mut self,
        _token: SessionToken,
        key_no: u8,
        is_auth_key: bool,
        plaintext: &[u8],
    ) -> Result<()> {
        let sm = self.secure_messaging_mut()?;
        sm.ensure_counter_capacity()?;
        let ciphertext = sm.encrypt_full(plaintext)?;

        let mut header = Vec::with_capacity(1);
        header.push(key_no);
        let cmac = sm.command_mac(0xC4, &header, &ciphertext)?;

        let mut data = Vec::with_capacity(1 + ciphertext.len() + 8);
        data.push(key_no);
        data.extend_from_slice(&ciphertext);
        data.extend_from_slice(&cmac);
        let apdu = build_apdu(0xC4, 0x00, 0x00, &data, None);

        let (response, sw1, sw2) = self.transceive(&apdu).await?;
        match classify_status(sw1, sw2) {
            StatusOutcome::Ok => {}
            StatusOutcome::Chaining => {
                return Err(Error::internal("unexpected chaining response to ChangeKey"))
            }
            StatusOutcome::Err(e) => return Err(e),
        }

        if is_auth_key {
            // The tag invalidates its session after changing the
            // currently authenticated key; don't attempt to verify a
            // response MAC under a session that no longer exists.
            self.clear_session();
            return Ok(());
        }

        let sm = self.secure_messaging_mut()?;
        sm.increment_counter()?;
        if response.len() != 8 {
            return Err(Error::data_loss("ChangeKey response is not a bare CMACt"));
        }
        let mut received = [0u8; 8];
        received.copy_from_slice(&response);
        if !sm.verify_response_mac(0x00, &[], &received)? {
            return Err(Error::data_loss("ChangeKey response CMAC mismatch"));
        }
        Ok(())
    }
}

//! Secure-messaging context: IVCmd/IVResp derivation, CMACt, full-mode
//! encryption, and command-counter bookkeeping. Owned exclusively by the
//! [`crate::tag::Ntag424Tag`] it's installed into.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::error::{Error, Result};

/// A fresh secure-messaging context installed after a successful
/// Authenticate. Key material is zeroed on drop.
#[derive(ZeroizeOnDrop)]
pub struct SecureMessaging {
    enc_key: [u8; 16],
    mac_key: [u8; 16],
    ti: [u8; 4],
    cmd_ctr: u16,
}

impl SecureMessaging {
    pub fn new(enc_key: [u8; 16], mac_key: [u8; 16], ti: [u8; 4]) -> Self {
        SecureMessaging {
            enc_key,
            mac_key,
            ti,
            cmd_ctr: 0,
        }
    }

    pub fn cmd_ctr(&self) -> u16 {
        self.cmd_ctr
    }

    pub fn ti(&self) -> [u8; 4] {
        self.ti
    }

    /// Checked ahead of building any authenticated command: the counter
    /// must still have room to advance once the response comes back.
    /// Doesn't mutate `cmd_ctr` — callers use this to refuse to send an
    /// APDU at all once the counter is exhausted, rather than sending one
    /// and only discovering exhaustion when `increment_counter` is called
    /// after the response arrives.
    pub fn ensure_counter_capacity(&self) -> Result<()> {
        if self.cmd_ctr == 0xFFFF {
            return Err(Error::resource_exhausted(
                "secure messaging command counter would wrap past 0xFFFF",
            ));
        }
        Ok(())
    }

    /// Advance the counter once per successful authenticated command.
    /// Fails with `ResourceExhausted` if the counter is already at its
    /// maximum — a fresh Authenticate is then required.
    pub fn increment_counter(&mut self) -> Result<()> {
        self.ensure_counter_capacity()?;
        self.cmd_ctr += 1;
        Ok(())
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn set_cmd_ctr_for_test(&mut self, value: u16) {
        self.cmd_ctr = value;
    }

    fn iv_block(&self, prefix: (u8, u8)) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[0] = prefix.0;
        block[1] = prefix.1;
        block[2..6].copy_from_slice(&self.ti);
        block[6..8].copy_from_slice(&self.cmd_ctr.to_le_bytes());
        block
    }

    /// `IVCmd = AES-ECB(enc_key, A5 5A || TI || cmd_ctr_LE || 0x00 * 8)`.
    pub fn iv_cmd(&self) -> Result<[u8; 16]> {
        crypto::aes_ecb_encrypt(&self.enc_key, &self.iv_block((0xA5, 0x5A)))
    }

    /// `IVResp = AES-ECB(enc_key, 5A A5 || TI || cmd_ctr_LE || 0x00 * 8)`.
    pub fn iv_resp(&self) -> Result<[u8; 16]> {
        crypto::aes_ecb_encrypt(&self.enc_key, &self.iv_block((0x5A, 0xA5)))
    }

    /// Truncated CMAC: the 8 bytes at odd indices of the 16-byte CMAC.
    pub fn cmact(&self, data: &[u8]) -> Result<[u8; 8]> {
        let full = crypto::aes_cmac(&self.mac_key, data)?;
        Ok([
            full[1], full[3], full[5], full[7], full[9], full[11], full[13], full[15],
        ])
    }

    /// Build and truncate a command MAC:
    /// `cmd || cmd_ctr_LE || TI || cmd_header [|| cmd_data]`.
    pub fn command_mac(&self, cmd: u8, cmd_header: &[u8], cmd_data: &[u8]) -> Result<[u8; 8]> {
        let mut input = Vec::with_capacity(1 + 2 + 4 + cmd_header.len() + cmd_data.len());
        input.push(cmd);
        input.extend_from_slice(&self.cmd_ctr.to_le_bytes());
        input.extend_from_slice(&self.ti);
        input.extend_from_slice(cmd_header);
        input.extend_from_slice(cmd_data);
        self.cmact(&input)
    }

    /// Build and truncate a response MAC:
    /// `response_code || cmd_ctr_LE || TI [|| response_data]`.
    pub fn response_mac(&self, response_code: u8, response_data: &[u8]) -> Result<[u8; 8]> {
        let mut input = Vec::with_capacity(1 + 2 + 4 + response_data.len());
        input.push(response_code);
        input.extend_from_slice(&self.cmd_ctr.to_le_bytes());
        input.extend_from_slice(&self.ti);
        input.extend_from_slice(response_data);
        self.cmact(&input)
    }

    /// Verify a response MAC in constant time.
    pub fn verify_response_mac(
        &self,
        response_code: u8,
        response_data: &[u8],
        received: &[u8; 8],
    ) -> Result<bool> {
        let expected = self.response_mac(response_code, response_data)?;
        Ok(crypto::constant_time_eq(&expected, received))
    }

    /// Full-mode encrypt: ISO 7816-4 pad (`0x80` then `0x00...`, always at
    /// least one byte), then AES-CBC under IVCmd.
    pub fn encrypt_full(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let padded_len = (plain.len() / 16 + 1) * 16;
        let mut padded = vec![0u8; padded_len];
        padded[..plain.len()].copy_from_slice(plain);
        padded[plain.len()] = 0x80;
        let cipher = crypto::aes_cbc_encrypt(&self.enc_key, &self.iv_cmd()?, &padded);
        let mut padded_owned = padded;
        padded_owned.zeroize();
        cipher
    }

    /// Full-mode decrypt: AES-CBC under IVResp, then strip ISO 7816-4
    /// padding. A missing `0x80` terminator is `DataLoss`.
    pub fn decrypt_full(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        let mut decrypted = crypto::aes_cbc_decrypt(&self.enc_key, &self.iv_resp()?, cipher)?;
        let mut end = decrypted.len();
        loop {
            if end == 0 {
                decrypted.zeroize();
                return Err(Error::data_loss(
                    "ISO 7816-4 padding terminator 0x80 not found",
                ));
            }
            end -= 1;
            match decrypted[end] {
                0x00 => continue,
                0x80 => break,
                _ => {
                    decrypted.zeroize();
                    return Err(Error::data_loss(
                        "ISO 7816-4 padding terminator 0x80 not found",
                    ));
                }
            }
        }
        let result = decrypted[..end].to_vec();
        decrypted.zeroize();
        Ok(result)
    }
}

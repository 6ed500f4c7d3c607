//! Periodic encrypted snapshots to the broker.
//!
//! Each value is formatted with two fraction digits, encrypted with
//! AES-128-CBC under a static key and IV, and published as lowercase hex on
//! `<prefix>/<quantity>`. The static IV makes the scheme deterministic: equal
//! plaintexts yield equal ciphertexts.

use aes::Aes128;
use anyhow::{bail, Context, Result};
use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use serde::Serialize;

use crate::quantity::Quantity;
use crate::sensors::SensorReading;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

// ---------------------------------------------------------------------------
// Sink boundary
// ---------------------------------------------------------------------------

/// Where telemetry goes. `publish` returns `false` when the transport refused
/// the message (queue full, session gone).
pub trait TelemetrySink {
    fn is_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: String) -> bool;
}

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PayloadCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl PayloadCipher {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self> {
        Ok(Self::new(decode_block(key_hex, "key")?, decode_block(iv_hex, "iv")?))
    }

    /// PKCS#7-padded AES-128-CBC. A plaintext that is already a multiple of
    /// 16 bytes gains a full padding block.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn encrypt_hex(&self, plaintext: &str) -> String {
        hex::encode(self.encrypt(plaintext.as_bytes()))
    }
}

fn decode_block(value: &str, what: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(value).with_context(|| format!("telemetry {what} is not valid hex"))?;
    match <[u8; 16]>::try_from(bytes.as_slice()) {
        Ok(block) => Ok(block),
        Err(_) => bail!("telemetry {what} must be 16 bytes, got {}", bytes.len()),
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// The session was down; nothing was attempted.
    pub skipped: bool,
    pub published: usize,
    pub rejected: usize,
}

pub struct TelemetryPublisher {
    cipher: PayloadCipher,
    prefix: String,
}

impl TelemetryPublisher {
    pub fn new(cipher: PayloadCipher, prefix: impl Into<String>) -> Self {
        Self {
            cipher,
            prefix: prefix.into(),
        }
    }

    pub fn topic(&self, quantity: Quantity) -> String {
        format!("{}/{}", self.prefix, quantity.as_str())
    }

    pub fn payload(&self, value: f32) -> String {
        self.cipher.encrypt_hex(&format!("{value:.2}"))
    }

    /// One publication pass over `snapshot`. Rejected publishes are counted,
    /// never retried; reconnection belongs to the connectivity supervisor.
    pub fn cycle<S: TelemetrySink + ?Sized>(
        &self,
        snapshot: &[SensorReading],
        sink: &mut S,
    ) -> PublishReport {
        if !sink.is_connected() {
            tracing::debug!("broker session down, telemetry cycle skipped");
            return PublishReport {
                skipped: true,
                ..Default::default()
            };
        }

        let mut report = PublishReport::default();
        for reading in snapshot {
            let topic = self.topic(reading.quantity);
            if sink.publish(&topic, self.payload(reading.value)) {
                report.published += 1;
            } else {
                report.rejected += 1;
                tracing::warn!(%topic, "telemetry publish rejected");
            }
        }

        tracing::debug!(
            published = report.published,
            rejected = report.rejected,
            "telemetry cycle"
        );
        report
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use cbc::cipher::BlockDecryptMut;

    type Aes128CbcDec = cbc::Decryptor<Aes128>;

    /// Records publishes; topics listed in `refuse` are rejected.
    #[derive(Default)]
    struct RecordingSink {
        connected: bool,
        refuse: Vec<String>,
        sent: Vec<(String, String)>,
    }

    impl TelemetrySink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn publish(&mut self, topic: &str, payload: String) -> bool {
            if self.refuse.iter().any(|t| t == topic) {
                return false;
            }
            self.sent.push((topic.to_string(), payload));
            true
        }
    }

    fn default_cipher() -> PayloadCipher {
        let cfg = TelemetryConfig::default();
        PayloadCipher::from_hex(&cfg.key_hex, &cfg.iv_hex).unwrap()
    }

    fn decrypt(cipher: &PayloadCipher, hex_ct: &str) -> String {
        let ct = hex::decode(hex_ct).unwrap();
        let pt = Aes128CbcDec::new(&cipher.key.into(), &cipher.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ct)
            .unwrap();
        String::from_utf8(pt).unwrap()
    }

    fn reading(quantity: Quantity, value: f32) -> SensorReading {
        SensorReading { quantity, value }
    }

    // -- Cipher -------------------------------------------------------------

    #[test]
    fn matches_sp800_38a_first_block() {
        // NIST SP 800-38A F.2.1, CBC-AES128.Encrypt, block 1.
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let cipher = PayloadCipher::new(key.try_into().unwrap(), iv.try_into().unwrap());

        let pt = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let ct = hex::encode(cipher.encrypt(&pt));

        assert_eq!(ct.len(), 64, "full-block plaintext gains a padding block");
        assert_eq!(&ct[..32], "7649abac8119b246cee98e9b12e9197d");
    }

    #[test]
    fn short_plaintext_pads_to_one_block() {
        let hex_ct = default_cipher().encrypt_hex("21.50");
        assert_eq!(hex_ct.len(), 32);
        assert!(hex_ct.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn encryption_is_deterministic() {
        let c = default_cipher();
        assert_eq!(c.encrypt_hex("400.00"), c.encrypt_hex("400.00"));
        assert_ne!(c.encrypt_hex("400.00"), c.encrypt_hex("400.01"));
    }

    #[test]
    fn ciphertext_decrypts_back() {
        let c = default_cipher();
        assert_eq!(decrypt(&c, &c.encrypt_hex("1234.56")), "1234.56");
    }

    #[test]
    fn from_hex_rejects_bad_material() {
        assert!(PayloadCipher::from_hex("00", "000102030405060708090a0b0c0d0e0f").is_err());
        assert!(PayloadCipher::from_hex(&"zz".repeat(16), &"00".repeat(16)).is_err());
    }

    // -- Publisher ----------------------------------------------------------

    #[test]
    fn cycle_publishes_every_reading_on_prefixed_topic() {
        let publisher = TelemetryPublisher::new(default_cipher(), "topic");
        let mut sink = RecordingSink {
            connected: true,
            ..Default::default()
        };
        let snapshot = vec![
            reading(Quantity::Temperature, 21.5),
            reading(Quantity::Co2, 412.0),
        ];

        let report = publisher.cycle(&snapshot, &mut sink);
        assert_eq!(
            report,
            PublishReport {
                skipped: false,
                published: 2,
                rejected: 0
            }
        );
        assert_eq!(sink.sent[0].0, "topic/temperature");
        assert_eq!(sink.sent[1].0, "topic/co2");
        assert_eq!(decrypt(&default_cipher(), &sink.sent[0].1), "21.50");
        assert_eq!(decrypt(&default_cipher(), &sink.sent[1].1), "412.00");
    }

    #[test]
    fn cycle_skips_when_disconnected() {
        let publisher = TelemetryPublisher::new(default_cipher(), "topic");
        let mut sink = RecordingSink::default();
        let report = publisher.cycle(&[reading(Quantity::Light, 1.0)], &mut sink);
        assert!(report.skipped);
        assert_eq!(report.published, 0);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn rejected_publish_is_counted_not_retried() {
        let publisher = TelemetryPublisher::new(default_cipher(), "farm");
        let mut sink = RecordingSink {
            connected: true,
            refuse: vec!["farm/light".into()],
            ..Default::default()
        };
        let snapshot = vec![
            reading(Quantity::Light, 1.0),
            reading(Quantity::WaterLevel, 2.0),
        ];
        let report = publisher.cycle(&snapshot, &mut sink);
        assert_eq!(report.published, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(sink.sent[0].0, "farm/water_level");
    }

    #[test]
    fn payload_uses_two_fraction_digits() {
        let publisher = TelemetryPublisher::new(default_cipher(), "topic");
        let c = default_cipher();
        assert_eq!(decrypt(&c, &publisher.payload(0.0)), "0.00");
        assert_eq!(decrypt(&c, &publisher.payload(3.14159)), "3.14");
    }
}

//! DX7-style SysEx patch banks.
//!
//! Detects 32-voice bank dumps and single-voice dumps, splits them into
//! 128-byte patches, and re-encodes one patch as a single-voice dump message
//! that can be sent to an instrument through its MIDI input.
//!
//! An unrecognized file yields no patches rather than an error; callers treat
//! an empty result as a skippable condition.

use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Size of one voice in bank (packed) form.
pub const PATCH_SIZE: usize = 128;

/// Number of voices in a bank dump.
pub const BANK_VOICES: usize = 32;

/// Minimum length of a 32-voice bank: 6 header + 4096 data + checksum + F7.
pub const BANK_DUMP_LEN: usize = 6 + BANK_VOICES * PATCH_SIZE + 2;

/// Minimum length of a single-voice dump as accepted by the parser.
pub const SINGLE_DUMP_LEN: usize = 140;

/// Length of a message built by [`build_device_message`].
pub const DEVICE_MESSAGE_LEN: usize = 6 + PATCH_SIZE + 2;

/// Header of an outgoing single-voice dump: F0, Yamaha ID, channel 1, format, byte count.
const DEVICE_HEADER: [u8; 6] = [0xF0, 0x43, 0x00, 0x00, 0x01, 0x1B];

/// Offset of the first voice byte in either dump format.
const DATA_OFFSET: usize = 6;

/// Voice name position within a 128-byte packed voice.
const NAME_RANGE: std::ops::Range<usize> = 118..128;

/// One voice extracted from a bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysExPatch {
    pub name: String,
    pub data: [u8; PATCH_SIZE],
}

impl SysExPatch {
    fn from_slice(name: String, bytes: &[u8]) -> Self {
        let mut data = [0u8; PATCH_SIZE];
        data.copy_from_slice(&bytes[..PATCH_SIZE]);
        Self { name, data }
    }
}

/// Detected dump format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankFormat {
    /// 32 packed voices: F0 43 0n 09 20 00 ...
    Bank,
    /// One voice: F0 43 0n 00 01 1B ...
    SingleVoice,
}

/// Identifies the dump format by its header bytes, if recognized.
pub fn detect_format(bytes: &[u8]) -> Option<BankFormat> {
    if bytes.len() >= BANK_DUMP_LEN
        && bytes[0] == 0xF0
        && bytes[1] == 0x43
        && bytes[3] == 0x09
        && bytes[4] == 0x20
        && bytes[5] == 0x00
    {
        Some(BankFormat::Bank)
    } else if bytes.len() >= SINGLE_DUMP_LEN
        && bytes[0] == 0xF0
        && bytes[1] == 0x43
        && bytes[4] == 0x01
        && bytes[5] == 0x1B
    {
        Some(BankFormat::SingleVoice)
    } else {
        None
    }
}

/// Splits a SysEx dump into its patches.
///
/// # Returns
///
/// 32 patches for a bank dump, 1 patch named "Single Voice" for a
/// single-voice dump, or an empty vector for anything else.
pub fn parse_bank(bytes: &[u8]) -> Vec<SysExPatch> {
    match detect_format(bytes) {
        Some(BankFormat::Bank) => {
            debug!("detected 32-voice bank");
            bytes[DATA_OFFSET..DATA_OFFSET + BANK_VOICES * PATCH_SIZE]
                .chunks_exact(PATCH_SIZE)
                .enumerate()
                .map(|(index, voice)| SysExPatch::from_slice(voice_name(voice, index), voice))
                .collect()
        }
        Some(BankFormat::SingleVoice) => {
            debug!("detected single voice dump");
            vec![SysExPatch::from_slice(
                "Single Voice".to_string(),
                &bytes[DATA_OFFSET..DATA_OFFSET + PATCH_SIZE],
            )]
        }
        None => {
            warn!(bytes = bytes.len(), "unknown SysEx format");
            Vec::new()
        }
    }
}

/// Reads a `.syx` file and splits it into patches.
pub fn load_bank<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<SysExPatch>> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    info!(path = %path.display(), bytes = bytes.len(), "loading SysEx file");
    Ok(parse_bank(&bytes))
}

/// Decodes the 10-character voice name, falling back to "Patch N".
fn voice_name(voice: &[u8], index: usize) -> String {
    let raw: String = voice[NAME_RANGE]
        .iter()
        .map(|&b| if (32..=126).contains(&b) { b as char } else { ' ' })
        .collect();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        format!("Patch {}", index + 1)
    } else {
        trimmed.to_string()
    }
}

/// Picks a patch by index, falling back to the first patch when the index
/// is negative or out of range.
///
/// # Panics
///
/// Panics if `patches` is empty; check for an empty bank first.
pub fn select_patch(patches: &[SysExPatch], requested: i64) -> &SysExPatch {
    let index = usize::try_from(requested)
        .ok()
        .filter(|&i| i < patches.len());
    match index {
        Some(i) => &patches[i],
        None => {
            if requested >= 0 {
                warn!(requested, available = patches.len(), "patch not available, using patch 0");
            }
            &patches[0]
        }
    }
}

/// Two's complement of the payload sum, masked to 7 bits.
pub fn checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1) & 0x7F
}

/// Builds a single-voice dump message from patch data.
///
/// The payload is always exactly 128 bytes: longer input is truncated and
/// shorter input is zero-padded. The checksum covers the payload only.
///
/// # Returns
///
/// A 136-byte message: `F0 43 00 00 01 1B <128 bytes> <checksum> F7`
pub fn build_device_message(patch_data: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(DEVICE_MESSAGE_LEN);
    message.extend_from_slice(&DEVICE_HEADER);

    let take = patch_data.len().min(PATCH_SIZE);
    message.extend_from_slice(&patch_data[..take]);
    message.resize(DATA_OFFSET + PATCH_SIZE, 0x00);

    let sum = checksum(&message[DATA_OFFSET..]);
    message.push(sum);
    message.push(0xF7);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_bytes() -> Vec<u8> {
        let mut bytes = vec![0xF0, 0x43, 0x00, 0x09, 0x20, 0x00];
        for voice in 0..BANK_VOICES {
            let mut data = [voice as u8; PATCH_SIZE];
            let name: &[u8] = match voice {
                0 => b"BRASS   1 ",
                1 => &[0x01, b'E', b'.', b'P', b'I', b'A', b'N', b'O', 0x7F, 0x00],
                2 => &[0x00; 10],
                _ => b"  STRINGS ",
            };
            data[NAME_RANGE].copy_from_slice(name);
            bytes.extend_from_slice(&data);
        }
        bytes.push(0x00);
        bytes.push(0xF7);
        bytes
    }

    #[test]
    fn test_parse_bank() {
        let bytes = bank_bytes();
        assert_eq!(bytes.len(), BANK_DUMP_LEN);

        let patches = parse_bank(&bytes);
        assert_eq!(patches.len(), 32);
        assert!(patches.iter().all(|p| p.data.len() == PATCH_SIZE));
        assert_eq!(patches[0].name, "BRASS   1");
        assert_eq!(patches[1].name, "E.PIANO");
        assert_eq!(patches[2].name, "Patch 3");
        assert_eq!(patches[31].name, "STRINGS");
        assert_eq!(patches[5].data[0], 5);
        assert_eq!(patches[5].data[117], 5);
    }

    #[test]
    fn test_parse_single_voice() {
        let mut bytes = vec![0xF0, 0x43, 0x00, 0x00, 0x01, 0x1B];
        bytes.extend((0..155).map(|i| (i % 100) as u8));
        bytes.push(0x00);
        bytes.push(0xF7);
        let bytes = &bytes[..SINGLE_DUMP_LEN];

        let patches = parse_bank(bytes);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].name, "Single Voice");
        assert_eq!(patches[0].data[0], 0);
        assert_eq!(patches[0].data[127], 27);
    }

    #[test]
    fn test_unrecognized_formats() {
        assert!(parse_bank(&[]).is_empty());
        assert!(parse_bank(&[0xF0, 0x43, 0x00, 0x09, 0x20, 0x00]).is_empty());

        let mut wrong_vendor = bank_bytes();
        wrong_vendor[1] = 0x41;
        assert!(parse_bank(&wrong_vendor).is_empty());

        let mut truncated = bank_bytes();
        truncated.truncate(BANK_DUMP_LEN - 1);
        assert!(parse_bank(&truncated).is_empty());
    }

    #[test]
    fn test_select_patch_fallback() {
        let patches = parse_bank(&bank_bytes());
        assert_eq!(select_patch(&patches, 1).name, "E.PIANO");
        assert_eq!(select_patch(&patches, -1).name, "BRASS   1");
        assert_eq!(select_patch(&patches, 32).name, "BRASS   1");
        assert_eq!(select_patch(&patches, 31).name, "STRINGS");
    }

    #[test]
    fn test_device_message_layout() {
        let patches = parse_bank(&bank_bytes());
        let message = build_device_message(&patches[4].data);
        assert_eq!(message.len(), DEVICE_MESSAGE_LEN);
        assert_eq!(&message[..6], &DEVICE_HEADER);
        assert_eq!(&message[6..134], &patches[4].data[..]);
        assert_eq!(message[135], 0xF7);
    }

    #[test]
    fn test_device_message_pads_and_truncates() {
        let short = build_device_message(&[0x10; 20]);
        assert_eq!(short.len(), 136);
        assert!(short[26..134].iter().all(|&b| b == 0));

        let long = build_device_message(&[0x01; 300]);
        assert_eq!(long.len(), 136);
        assert_eq!(long[134], checksum(&[0x01; 128]));
    }

    #[test]
    fn test_checksum_balances_payload() {
        for fill in [0u8, 1, 0x3F, 0x7F] {
            let mut data = [fill; PATCH_SIZE];
            data[0] = 0x55;
            data[127] = 0x22;
            let message = build_device_message(&data);
            let sum: u32 = message[6..134].iter().map(|&b| b as u32).sum::<u32>()
                + message[134] as u32;
            assert_eq!(sum % 128, 0);
        }
    }
}

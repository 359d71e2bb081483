// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payload integrity: CRC-32 fingerprints for cached print data.
//
// Standard reflected CRC-32 (IEEE 802.3): polynomial 0xEDB88320, initial
// value 0xFFFFFFFF, final XOR 0xFFFFFFFF.  The 256-entry lookup table is
// built on first use behind a `OnceLock`, so concurrent first callers all
// observe the same fully initialised table.

use std::sync::OnceLock;

use portmaster_core::error::PortmasterError;

const POLYNOMIAL: u32 = 0xEDB8_8320;
const SEED: u32 = 0xFFFF_FFFF;
const FINAL_XOR: u32 = 0xFFFF_FFFF;

static TABLE: OnceLock<[u32; 256]> = OnceLock::new();

fn table() -> &'static [u32; 256] {
    TABLE.get_or_init(build_table)
}

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
        }
        *slot = crc;
    }
    table
}

/// CRC-32 engine supporting both one-shot and streaming use.
///
/// ```
/// use portmaster_cache::ChecksumEngine;
///
/// let mut engine = ChecksumEngine::new();
/// engine.update(b"1234");
/// engine.update(b"56789");
/// assert_eq!(engine.value(), ChecksumEngine::calculate(b"123456789"));
/// ```
#[derive(Debug, Clone)]
pub struct ChecksumEngine {
    crc: u32,
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumEngine {
    pub fn new() -> Self {
        Self { crc: SEED }
    }

    /// Checksum of `data` in one call.
    pub fn calculate(data: &[u8]) -> u32 {
        let mut engine = Self::new();
        engine.update(data);
        engine.value()
    }

    /// Whether `data` has the checksum `expected`.
    pub fn verify(data: &[u8], expected: u32) -> bool {
        Self::calculate(data) == expected
    }

    /// Start a new streaming computation.
    pub fn reset(&mut self) {
        self.crc = SEED;
    }

    pub fn update(&mut self, data: &[u8]) {
        let table = table();
        let mut crc = self.crc;
        for &byte in data {
            crc = table[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
        }
        self.crc = crc;
    }

    pub fn update_byte(&mut self, byte: u8) {
        self.update(std::slice::from_ref(&byte));
    }

    /// Checksum of everything fed since the last reset.
    pub fn value(&self) -> u32 {
        self.crc ^ FINAL_XOR
    }
}

/// Compute the CRC-32 of `data` as a lowercase 8-digit hex string.
///
/// This is the representation stored in `FileMetadata::checksum`.
pub fn checksum_hex(data: &[u8]) -> String {
    hex::encode(ChecksumEngine::calculate(data).to_be_bytes())
}

/// Verify that `data` matches the expected hex checksum.
///
/// Returns `Err(PortmasterError::ChecksumMismatch)` with both values when it
/// does not.
pub fn verify_checksum_hex(data: &[u8], expected_hex: &str) -> Result<(), PortmasterError> {
    let actual = checksum_hex(data);
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(PortmasterError::ChecksumMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// portmaster-cache: staging of received print data ahead of delivery.
//
// `TempDataManager` holds payloads under a session id, in memory or in a
// spill file, and fingerprints each one with the CRC-32 `ChecksumEngine` so
// the delivery path can detect corruption of the staged copy.

pub mod checksum;
pub mod temp_data;

pub use checksum::{ChecksumEngine, checksum_hex, verify_checksum_hex};
pub use temp_data::{CACHE_DIR_NAME, CachedFileData, DEFAULT_MAX_AGE, TempDataManager};

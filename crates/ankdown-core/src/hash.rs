// Copyright 2025 Fernando Borretti
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

/// Mask that clears the top bit, so hashes fit in a signed 64-bit column.
const MASK_63: u64 = (1 << 63) - 1;

/// Fingerprint arbitrary text as an unsigned 63-bit integer.
///
/// This is the first eight bytes of the BLAKE3 digest, read little-endian,
/// with the top bit cleared. It is stable across runs and platforms, and is
/// used both for deck/card/model identity and for detecting changed files.
pub fn content_hash(text: &str) -> u64 {
    hash_bytes(text.as_bytes())
}

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let digest = blake3::hash(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix) & MASK_63
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_value() {
        // BLAKE3("test") starts with 4878ca0425c739fa.
        assert_eq!(content_hash("test"), 0x7a39c72504ca7848);
    }

    #[test]
    fn test_idempotent() {
        let text = "Front text\n\n%\n\nBack text\n";
        assert_eq!(content_hash(text), content_hash(text));
    }

    #[test]
    fn test_top_bit_is_clear() {
        for text in ["", "a", "deck1", "deck1/basic.md0", "ünïcødé"] {
            assert!(content_hash(text) <= i64::MAX as u64);
        }
    }

    #[test]
    fn test_distinct_inputs() {
        assert_ne!(content_hash("deck1/basic.md0"), content_hash("deck1/basic.md1"));
    }
}

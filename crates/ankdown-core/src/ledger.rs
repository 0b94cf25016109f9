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

//! The version log records a fingerprint for every document that made it into
//! a package, so `updated_only` builds can skip documents that have not
//! changed.
//!
//! The log is read once when the build starts and written once when it ends.
//! A build that fails halfway leaves the old log in place, so the next run
//! reprocesses everything that was not packaged.

use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::fs::write;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ErrorReport;
use crate::error::Fallible;

/// Map from document path to the fingerprint of its contents.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionLedger {
    entries: BTreeMap<String, u64>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`. A missing file is an empty ledger; a file
    /// that is not a JSON object of integers is an error.
    pub fn load(path: &Path) -> Fallible<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = read_to_string(path)?;
        serde_json::from_str(&text).map_err(|err| {
            ErrorReport::new(format!(
                "malformed version log {}: {err}",
                path.display()
            ))
        })
    }

    /// Overwrite the ledger file with the current contents.
    pub fn save(&self, path: &Path) -> Fallible<()> {
        let json = serde_json::to_string(self)?;
        write(path, json)?;
        Ok(())
    }

    pub fn fingerprint(&self, document: &Path) -> Option<u64> {
        self.entries.get(&key(document)).copied()
    }

    /// Whether the document has to be parsed in this build.
    pub fn should_process(&self, document: &Path, fingerprint: u64, updated_only: bool) -> bool {
        !updated_only || self.fingerprint(document) != Some(fingerprint)
    }

    /// Remember the fingerprint of a document that was processed successfully.
    pub fn record(&mut self, document: &Path, fingerprint: u64) {
        self.entries.insert(key(document), fingerprint);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key(document: &Path) -> String {
    document.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_missing_file_is_empty() -> Fallible<()> {
        let dir = tempdir()?;
        let ledger = VersionLedger::load(&dir.path().join(".mdvlog"))?;
        assert!(ledger.is_empty());
        Ok(())
    }

    #[test]
    fn test_roundtrip() -> Fallible<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".mdvlog");
        let mut ledger = VersionLedger::new();
        ledger.record(Path::new("/notes/deck1/a.md"), 42);
        ledger.record(Path::new("/notes/deck2/b.md"), 7);
        ledger.save(&path)?;
        assert_eq!(
            read_to_string(&path)?,
            r#"{"/notes/deck1/a.md":42,"/notes/deck2/b.md":7}"#
        );
        assert_eq!(VersionLedger::load(&path)?, ledger);
        Ok(())
    }

    #[test]
    fn test_save_overwrites() -> Fallible<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".mdvlog");
        write(&path, r#"{"/old.md": 1, "/other.md": 2}"#)?;
        let mut ledger = VersionLedger::new();
        ledger.record(Path::new("/new.md"), 3);
        ledger.save(&path)?;
        assert_eq!(read_to_string(&path)?, r#"{"/new.md":3}"#);
        Ok(())
    }

    #[test]
    fn test_malformed_file_is_an_error() -> Fallible<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".mdvlog");
        write(&path, "[1, 2")?;
        let err = VersionLedger::load(&path).expect_err("malformed ledger must not load");
        assert!(err.message().starts_with("malformed version log"));
        Ok(())
    }

    #[test]
    fn test_should_process() {
        let mut ledger = VersionLedger::new();
        let doc = PathBuf::from("/notes/deck1/a.md");
        // Unseen documents are always processed.
        assert!(ledger.should_process(&doc, 1, true));
        ledger.record(&doc, 1);
        assert!(!ledger.should_process(&doc, 1, true));
        assert!(ledger.should_process(&doc, 2, true));
        // Without incremental mode, everything is processed.
        assert!(ledger.should_process(&doc, 1, false));
    }
}

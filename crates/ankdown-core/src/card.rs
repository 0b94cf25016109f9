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

use std::path::Path;
use std::path::PathBuf;

use crate::hash::content_hash;

/// Cards carry at most a front, a back, and a tag string.
pub const MAX_FIELDS: usize = 3;

/// A single flashcard, as parsed from one Markdown document.
#[derive(Clone, Debug, PartialEq)]
pub struct Card {
    /// Path to the document the card was parsed from.
    source_path: PathBuf,
    /// Position of the card within its document, starting at zero.
    index: usize,
    /// Compiled fields, in order: front, back, tags.
    fields: Vec<String>,
}

impl Card {
    pub fn new(source_path: PathBuf, index: usize) -> Self {
        Self {
            source_path,
            index,
            fields: Vec::new(),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [String] {
        &mut self.fields
    }

    pub fn add_field(&mut self, field: String) {
        self.fields.push(field);
    }

    /// The directory containing the source document.
    pub fn deck_dir(&self) -> &Path {
        self.source_path.parent().unwrap_or(Path::new(""))
    }

    /// Decks are named after the directory their documents live in.
    pub fn deck_name(&self) -> String {
        file_name_of(self.deck_dir())
    }

    pub fn base_name(&self) -> String {
        file_name_of(&self.source_path)
    }

    /// The string the card ID is derived from: `<deck>/<file><index>`.
    pub fn card_key(&self) -> String {
        format!("{}/{}{}", self.deck_name(), self.base_name(), self.index)
    }

    /// Deterministic card ID. Rebuilding a document that has not moved yields
    /// the same ID, so re-importing updates notes instead of duplicating them.
    pub fn id(&self) -> u64 {
        content_hash(&self.card_key())
    }

    /// True if any field has non-whitespace content.
    pub fn has_data(&self) -> bool {
        self.fields.iter().any(|field| !field.trim().is_empty())
    }

    /// True once the front and the back have been added.
    pub fn has_front_and_back(&self) -> bool {
        self.fields.len() >= 2
    }

    /// Drop every field past the tags.
    pub fn truncate_fields(&mut self) {
        self.fields.truncate(MAX_FIELDS);
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

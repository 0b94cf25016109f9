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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::copy;
use std::path::Path;

use crate::card::Card;
use crate::error::ErrorReport;
use crate::error::Fallible;
use crate::hash::content_hash;
use crate::media::resolve_media;

/// A card as it goes into the package.
#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    /// The card ID. Anki matches notes on this, so rebuilding a deck updates
    /// existing notes rather than adding duplicates.
    pub guid: u64,
    pub fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Deck {
    id: u64,
    name: String,
    notes: Vec<Note>,
}

impl Deck {
    pub fn new(name: &str) -> Self {
        Self {
            id: content_hash(name),
            name: name.to_string(),
            notes: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn add_note(&mut self, note: Note) {
        self.notes.push(note);
    }
}

/// Decks by name, created on first use.
#[derive(Debug, Default)]
pub struct DeckCollection {
    decks: BTreeMap<String, Deck>,
}

impl DeckCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_deck(&mut self, name: &str) -> &mut Deck {
        self.decks
            .entry(name.to_string())
            .or_insert_with(|| Deck::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Deck> {
        self.decks.get(name)
    }

    pub fn len(&self) -> usize {
        self.decks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decks.is_empty()
    }

    /// Decks in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Deck> {
        self.decks.values()
    }
}

/// Everything the package writer needs.
#[derive(Debug, Default)]
pub struct Assembly {
    pub decks: DeckCollection,
    /// Names of the media files staged in the staging directory.
    pub media: BTreeSet<String>,
    pub card_count: usize,
}

/// Collects cards into decks, staging their media files as it goes.
pub struct DeckAssembler<'a> {
    staging_dir: &'a Path,
    assembly: Assembly,
}

impl<'a> DeckAssembler<'a> {
    pub fn new(staging_dir: &'a Path) -> Self {
        Self {
            staging_dir,
            assembly: Assembly::default(),
        }
    }

    pub fn add_card(&mut self, mut card: Card) -> Fallible<()> {
        card.truncate_fields();
        for media in resolve_media(&mut card) {
            let target = self.staging_dir.join(&media.package_name);
            copy(&media.source, &target).map_err(|err| {
                ErrorReport::new(format!(
                    "failed to stage media file {} for card {}: {err}",
                    media.source.display(),
                    card.card_key()
                ))
            })?;
            log::debug!("Staged {} as {}", media.source.display(), media.package_name);
            self.assembly.media.insert(media.package_name);
        }
        let guid = card.id();
        let deck_name = card.deck_name();
        let note = Note {
            guid,
            fields: card.fields().to_vec(),
        };
        self.assembly.decks.get_or_create_deck(&deck_name).add_note(note);
        self.assembly.card_count += 1;
        Ok(())
    }

    pub fn finish(self) -> Assembly {
        self.assembly
    }
}

/// Assemble a stream of cards. Stops at the first error.
pub fn assemble(
    cards: impl IntoIterator<Item = Fallible<Card>>,
    staging_dir: &Path,
) -> Fallible<Assembly> {
    let mut assembler = DeckAssembler::new(staging_dir);
    for card in cards {
        assembler.add_card(card?)?;
    }
    Ok(assembler.finish())
}

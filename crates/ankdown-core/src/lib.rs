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

//! ankdown-core: the card-compilation pipeline behind ankdown.
//!
//! This library provides the pieces that turn Markdown documents into Anki
//! notes:
//! - Splitting documents into cards and fields
//! - Compiling fields: math delimiters, remote images, Markdown rendering
//! - Rewriting media references for the package's flat media store
//! - Deterministic deck and card IDs, and the version log for incremental
//!   builds

pub mod card;
pub mod deck;
pub mod error;
pub mod field;
pub mod hash;
pub mod ledger;
pub mod markdown;
pub mod math;
pub mod media;
pub mod model;
pub mod parser;

// Re-exports for convenience
pub use card::Card;
pub use deck::{Assembly, Deck, DeckAssembler, DeckCollection, Note, assemble};
pub use error::{ErrorReport, Fallible, fail};
pub use field::{FieldCompiler, FieldMode, MediaFetchError, MediaFetcher};
pub use hash::content_hash;
pub use ledger::VersionLedger;
pub use markdown::highlight_css;
pub use math::MathMode;
pub use model::{CardModel, ModelField, ModelTemplate};
pub use parser::parse_document;

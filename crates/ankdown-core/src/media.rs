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

use std::path::Component;
use std::path::MAIN_SEPARATOR;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Captures;
use regex::Regex;

use crate::card::Card;

/// Replaces path separators in packaged media names, since the package has a
/// flat media directory.
pub const SEPARATOR_SENTINEL: &str = "%";

// `[sound:...]` embeds are not recognized, only HTML `src` attributes.
static SRC_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src="([^"]*?)""#).expect("valid src regex"));

// Anki mangles fields that carry `alt` attributes.
static ALT_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"alt="[^"]*?""#).expect("valid alt regex"));

/// A file referenced by a card, and the name it is stored under in the
/// package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaReference {
    /// Where the file is read from.
    pub source: PathBuf,
    /// Flat file name inside the package.
    pub package_name: String,
}

impl MediaReference {
    /// Resolve a reference as written in a field.
    ///
    /// Absolute references are used as-is. Relative references are resolved
    /// against `deck_dir`, the directory holding the card's document, not the
    /// process working directory.
    pub fn resolve(deck_dir: &Path, reference: &str) -> Self {
        let path = Path::new(reference);
        let source = if path.is_absolute() {
            path.to_path_buf()
        } else {
            normalize(&deck_dir.join(path))
        };
        Self {
            source,
            package_name: flatten(reference),
        }
    }
}

/// Rewrite every media reference in the card's fields to its flat package
/// name, strip `alt` attributes, and return the files that need staging.
pub fn resolve_media(card: &mut Card) -> Vec<MediaReference> {
    let deck_dir = card.deck_dir().to_path_buf();
    let mut references = Vec::new();
    for field in card.fields_mut() {
        let updated = {
            let rewritten = SRC_ATTRIBUTE.replace_all(field.as_str(), |caps: &Captures| {
                let reference = MediaReference::resolve(&deck_dir, &caps[1]);
                let attribute = format!(r#"src="{}""#, reference.package_name);
                references.push(reference);
                attribute
            });
            ALT_ATTRIBUTE.replace_all(&rewritten, "").into_owned()
        };
        *field = updated;
    }
    references
}

fn flatten(reference: &str) -> String {
    reference.replace(MAIN_SEPARATOR, SEPARATOR_SENTINEL)
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. The filesystem is not consulted.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `..` at the root stays at the root.
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_with(path: &str, fields: &[&str]) -> Card {
        let mut card = Card::new(PathBuf::from(path), 0);
        for field in fields {
            card.add_field(field.to_string());
        }
        card
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_relative_reference() {
        let reference = MediaReference::resolve(Path::new("deck1"), "images/diagram.png");
        assert_eq!(reference.source, PathBuf::from("deck1/images/diagram.png"));
        assert_eq!(reference.package_name, "images%diagram.png");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_absolute_reference() {
        let reference = MediaReference::resolve(Path::new("/notes/deck1"), "/tmp/stage/a.png");
        assert_eq!(reference.source, PathBuf::from("/tmp/stage/a.png"));
        assert_eq!(reference.package_name, "%tmp%stage%a.png");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_parent_components_are_folded() {
        let reference = MediaReference::resolve(Path::new("/notes/deck1"), "../shared/./a.png");
        assert_eq!(reference.source, PathBuf::from("/notes/shared/a.png"));
        assert_eq!(reference.package_name, "..%shared%.%a.png");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("../a")), PathBuf::from("../a"));
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_resolve_media_rewrites_fields() {
        let mut card = card_with(
            "deck1/card.md",
            &[
                "<p><img src=\"images/diagram.png\" alt=\"A diagram\" /></p>\n",
                "<p>no media</p>\n",
            ],
        );
        let references = resolve_media(&mut card);
        assert_eq!(
            references,
            vec![MediaReference {
                source: PathBuf::from("deck1/images/diagram.png"),
                package_name: "images%diagram.png".to_string(),
            }]
        );
        assert_eq!(
            card.fields(),
            [
                "<p><img src=\"images%diagram.png\"  /></p>\n",
                "<p>no media</p>\n",
            ]
        );
    }

    #[test]
    fn test_multiple_references_in_one_field() {
        let mut card = card_with(
            "deck1/card.md",
            &["<img src=\"a.png\" /><audio controls src=\"b.mp3\" title=\"\"></audio>"],
        );
        let references = resolve_media(&mut card);
        let names: Vec<&str> = references.iter().map(|r| r.package_name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.mp3"]);
    }

    #[test]
    fn test_alt_is_stripped_without_src() {
        let mut card = card_with("deck1/card.md", &["<p alt=\"x\">y</p>"]);
        assert!(resolve_media(&mut card).is_empty());
        assert_eq!(card.fields(), ["<p >y</p>"]);
    }
}

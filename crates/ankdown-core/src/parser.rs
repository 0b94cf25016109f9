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

use std::mem::replace;
use std::mem::take;
use std::path::PathBuf;
use std::str::SplitInclusive;

use crate::card::Card;
use crate::error::Fallible;
use crate::field::FieldCompiler;
use crate::field::FieldMode;

/// Ends the current field.
pub const FIELD_SEPARATOR: &str = "%";
/// Ends the current field and the current card.
pub const CARD_SEPARATOR: &str = "---";

enum Line<'a> {
    /// A line that's just `%`.
    FieldSeparator,
    /// A line that's just `---`.
    CardSeparator,
    /// Any other line, including its trailing newline.
    Text(&'a str),
}

impl<'a> Line<'a> {
    fn read(line: &'a str) -> Self {
        match line.trim() {
            FIELD_SEPARATOR => Line::FieldSeparator,
            CARD_SEPARATOR => Line::CardSeparator,
            _ => Line::Text(line),
        }
    }
}

/// Parse a document into cards.
///
/// Cards are produced lazily, one per call to `next`, and every field is
/// compiled as soon as it ends. The iterator stops after the first error.
pub fn parse_document<'a>(
    source_path: PathBuf,
    text: &'a str,
    compiler: &'a FieldCompiler<'a>,
) -> CardParser<'a> {
    CardParser::new(source_path, text, compiler)
}

pub struct CardParser<'a> {
    source_path: PathBuf,
    lines: SplitInclusive<'a, char>,
    compiler: &'a FieldCompiler<'a>,
    /// The card being built.
    card: Card,
    /// Raw text of the field being read.
    buffer: String,
    done: bool,
}

impl<'a> CardParser<'a> {
    pub fn new(source_path: PathBuf, text: &'a str, compiler: &'a FieldCompiler<'a>) -> Self {
        Self {
            card: Card::new(source_path.clone(), 0),
            source_path,
            lines: text.split_inclusive('\n'),
            compiler,
            buffer: String::new(),
            done: false,
        }
    }

    /// Read lines until a card with data is complete, or the input runs out.
    fn advance(&mut self) -> Fallible<Option<Card>> {
        while let Some(line) = self.lines.next() {
            match Line::read(line) {
                Line::FieldSeparator => self.end_field()?,
                Line::CardSeparator => {
                    self.end_field()?;
                    let card = self.start_next_card();
                    if card.has_data() {
                        return Ok(Some(card));
                    }
                }
                Line::Text(text) => self.buffer.push_str(text),
            }
        }
        self.done = true;
        if !self.buffer.is_empty() {
            self.end_field()?;
        }
        let card = self.start_next_card();
        Ok(card.has_data().then_some(card))
    }

    /// Compile the buffered field and add it to the current card. The front
    /// and back are Markdown, anything after that is plain text.
    fn end_field(&mut self) -> Fallible<()> {
        let mode = if self.card.has_front_and_back() {
            FieldMode::Plain
        } else {
            FieldMode::Markdown
        };
        let text = take(&mut self.buffer);
        let field = self.compiler.compile(&text, mode)?;
        self.card.add_field(field);
        Ok(())
    }

    /// Swap in a fresh card with the next index and return the finished one.
    fn start_next_card(&mut self) -> Card {
        let next = Card::new(self.source_path.clone(), self.card.index() + 1);
        replace(&mut self.card, next)
    }
}

impl Iterator for CardParser<'_> {
    type Item = Fallible<Card>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(card)) => Some(Ok(card)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tempfile::tempdir;

    use super::*;
    use crate::field::MediaFetcher;
    use crate::field::REMOTE_DIR;
    use crate::field::tests::CannedFetcher;
    use crate::field::tests::NotFoundFetcher;
    use crate::math::MathMode;

    fn parse_with(fetcher: &dyn MediaFetcher, dir: &TempDir, input: &str) -> Fallible<Vec<Card>> {
        let compiler = FieldCompiler::new(MathMode::Native, false, dir.path(), fetcher);
        parse_document(PathBuf::from("deck1/basic.md"), input, &compiler).collect()
    }

    fn parse(input: &str) -> Fallible<Vec<Card>> {
        let dir = tempdir()?;
        parse_with(&NotFoundFetcher, &dir, input)
    }

    #[test]
    fn test_empty_string() -> Fallible<()> {
        assert!(parse("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_whitespace_string() -> Fallible<()> {
        assert!(parse("\n\n\n")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_basic_card() -> Fallible<()> {
        let input = "Front text\n\n%\n\nBack text\n\n%\n\ntag1, tag2\n\n---\n";
        let cards = parse(input)?;
        assert_eq!(cards.len(), 1);
        let card = &cards[0];
        assert_eq!(card.deck_name(), "deck1");
        assert_eq!(card.index(), 0);
        assert_eq!(
            card.fields(),
            [
                "<p>Front text</p>\n",
                "<p>Back text</p>\n",
                "\ntag1, tag2\n\n",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_no_separators() -> Fallible<()> {
        let cards = parse("Just *one* field\nover two lines\n")?;
        assert_eq!(cards.len(), 1);
        assert_eq!(
            cards[0].fields(),
            ["<p>Just <em>one</em> field\nover two lines</p>\n"]
        );
        Ok(())
    }

    #[test]
    fn test_no_trailing_newline() -> Fallible<()> {
        let cards = parse("Q\n%\nA")?;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].fields(), ["<p>Q</p>\n", "<p>A</p>\n"]);
        Ok(())
    }

    #[test]
    fn test_card_count() -> Fallible<()> {
        let cards = parse("a\n---\nb\n%\nc\n---\nd\n")?;
        assert_eq!(cards.len(), 3);
        let indices: Vec<usize> = cards.iter().map(Card::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_empty_cards_are_dropped_but_keep_their_index() -> Fallible<()> {
        let cards = parse("---\n  \n---\nx\n---\n")?;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].index(), 2);
        Ok(())
    }

    #[test]
    fn test_separators_ignore_surrounding_whitespace() -> Fallible<()> {
        let cards = parse("a\n  %  \nb\n\t---\nc\n")?;
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].fields().len(), 2);
        Ok(())
    }

    #[test]
    fn test_separator_must_be_alone_on_its_line() -> Fallible<()> {
        let cards = parse("100 %\n--- not a separator\n")?;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].fields().len(), 1);
        Ok(())
    }

    #[test]
    fn test_third_and_later_fields_are_plain() -> Fallible<()> {
        let cards = parse("a\n%\nb\n%\n*t*\n%\n*u*\n")?;
        assert_eq!(
            cards[0].fields(),
            ["<p>a</p>\n", "<p>b</p>\n", "*t*\n", "*u*\n"]
        );
        Ok(())
    }

    #[test]
    fn test_error_stops_iteration() -> Fallible<()> {
        let dir = tempdir()?;
        let compiler = FieldCompiler::new(MathMode::Native, false, dir.path(), &NotFoundFetcher);
        let input = "![x](http://example.com/x.png)\n---\nsecond\n";
        let mut parser = parse_document(PathBuf::from("deck1/basic.md"), input, &compiler);
        assert!(matches!(parser.next(), Some(Err(_))));
        assert!(parser.next().is_none());
        Ok(())
    }

    #[test]
    fn test_remote_image_in_front() -> Fallible<()> {
        let dir = tempdir()?;
        let fetcher = CannedFetcher::new(b"GIF");
        let cards = parse_with(&fetcher, &dir, "![x](http://example.com/x.gif)\n%\nback\n")?;
        assert_eq!(cards.len(), 1);
        assert!(cards[0].fields()[0].contains("x.gif"));
        assert!(dir.path().join(REMOTE_DIR).join("x.gif").exists());
        Ok(())
    }
}

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

//! Math delimiter handling for fields rendered as Markdown.
//!
//! MathJax expects `\(...\)` and `\[...\]`. Markdown eats a single backslash
//! before punctuation, so by the time text reaches the renderer every math
//! delimiter has to be written with a doubled backslash. The renderer then
//! recognizes `\\(`/`\\[` spans and emits them untouched.

use serde::Deserialize;

/// How math delimiters are written in the source documents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathMode {
    /// Delimiters are written as `\(`, `\)`, `\[` and `\]`.
    #[default]
    Native,
    /// Delimiters are written as `$...$` (inline) and `$$...$$` (display).
    Dollar,
}

pub const INLINE_OPEN: &str = r"\\(";
pub const INLINE_CLOSE: &str = r"\\)";
pub const DISPLAY_OPEN: &str = r"\\[";
pub const DISPLAY_CLOSE: &str = r"\\]";

/// Rewrite the math delimiters in `text` so they survive Markdown rendering.
pub fn normalize_math(text: &str, mode: MathMode) -> String {
    match mode {
        MathMode::Native => double_escapes(text),
        MathMode::Dollar => {
            let text = wrap_delimited(text, "$$", DISPLAY_OPEN, DISPLAY_CLOSE);
            wrap_delimited(&text, "$", INLINE_OPEN, INLINE_CLOSE)
        }
    }
}

fn double_escapes(text: &str) -> String {
    let mut text = text.to_string();
    for bracket in ["(", ")", "[", "]"] {
        text = text.replace(&format!("\\{bracket}"), &format!("\\\\{bracket}"));
    }
    text
}

/// Split on every unescaped `sep` and wrap every second segment in
/// `open`/`close`.
fn wrap_delimited(text: &str, sep: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, segment) in split_unescaped(text, sep).into_iter().enumerate() {
        if i % 2 == 1 {
            out.push_str(open);
            out.push_str(segment);
            out.push_str(close);
        } else {
            out.push_str(segment);
        }
    }
    out
}

/// Split `text` on occurrences of `sep` that are not preceded by a backslash.
fn split_unescaped<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut search = 0;
    while let Some(offset) = text[search..].find(sep) {
        let at = search + offset;
        if at > 0 && text.as_bytes()[at - 1] == b'\\' {
            // `sep` is ASCII, so skipping one byte stays on a char boundary.
            search = at + 1;
            continue;
        }
        parts.push(&text[start..at]);
        start = at + sep.len();
        search = start;
    }
    parts.push(&text[start..]);
    parts
}

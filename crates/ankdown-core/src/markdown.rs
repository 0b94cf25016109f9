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

use std::sync::LazyLock;

use pulldown_cmark::CodeBlockKind;
use pulldown_cmark::CowStr;
use pulldown_cmark::Event;
use pulldown_cmark::Options;
use pulldown_cmark::Parser;
use pulldown_cmark::Tag;
use pulldown_cmark::TagEnd;
use pulldown_cmark::TextMergeStream;
use pulldown_cmark::html::push_html;
use regex::Captures;
use regex::Regex;
use syntect::html::ClassStyle;
use syntect::html::ClassedHTMLGenerator;
use syntect::html::css_for_theme_with_class_style;
use syntect::highlighting::ThemeSet;
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

use crate::error::ErrorReport;
use crate::error::Fallible;

const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "ogg"];

/// Highlighted code uses prefixed class names so the stylesheet cannot clash
/// with the card model's own CSS.
const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

const HIGHLIGHT_THEME: &str = "InspiredGitHub";

// Math spans are swapped for these placeholders while Markdown is rendered.
const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);

static MATH_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\\\\\((.*?)\\\\\)|\\\\\[(.*?)\\\\\]").expect("valid math regex")
});

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}([0-9]+)\u{E001}").expect("valid placeholder regex"));

fn is_audio_file(url: &str) -> bool {
    if let Some(ext) = url.split('.').next_back() {
        AUDIO_EXTENSIONS.contains(&ext)
    } else {
        false
    }
}

/// Convert Markdown to HTML.
///
/// Math written as `\\(...\\)` or `\\[...\\]` is passed through as
/// `\(...\)`/`\[...\]` without being touched by Markdown. When `highlight`
/// is set, fenced code blocks with a known language are syntax highlighted.
pub fn markdown_to_html(markdown: &str, highlight: bool) -> Fallible<String> {
    let (text, math) = protect_math(markdown);
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    let parser = TextMergeStream::new(Parser::new_ext(&text, options));

    let mut events: Vec<Event<'_>> = Vec::new();
    // Language and contents of the fenced block being collected, if any.
    let mut code_block: Option<(Option<String>, String)> = None;
    for event in parser {
        match event {
            Event::Start(Tag::CodeBlock(kind)) if highlight => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().map(str::to_string)
                    }
                    CodeBlockKind::Indented => None,
                };
                code_block = Some((lang, String::new()));
            }
            Event::End(TagEnd::CodeBlock) if code_block.is_some() => {
                if let Some((lang, code)) = code_block.take() {
                    let code = restore_math(&code, &math);
                    events.extend(highlight_code_block(lang.as_deref(), &code)?);
                }
            }
            Event::Text(text) => match code_block.as_mut() {
                Some((_, code)) => code.push_str(&text),
                None => events.push(Event::Text(restore_math_cow(text, &math))),
            },
            Event::Code(text) => events.push(Event::Code(restore_math_cow(text, &math))),
            Event::Html(html) => events.push(Event::Html(restore_math_cow(html, &math))),
            Event::InlineHtml(html) => {
                events.push(Event::InlineHtml(restore_math_cow(html, &math)))
            }
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) => events.push(Event::Start(Tag::Link {
                link_type,
                dest_url,
                title: restore_math_cow(title, &math),
                id,
            })),
            Event::Start(Tag::Image {
                link_type,
                title,
                dest_url,
                id,
            }) => {
                let title = restore_math_cow(title, &math);
                // Does the URL point to an audio file?
                let ev = if is_audio_file(&dest_url) {
                    // If so, render it as an HTML5 audio element.
                    Event::Html(CowStr::Boxed(
                        format!(
                            r#"<audio controls src="{}" title="{}"></audio>"#,
                            dest_url, title
                        )
                        .into_boxed_str(),
                    ))
                } else {
                    Event::Start(Tag::Image {
                        link_type,
                        title,
                        dest_url,
                        id,
                    })
                };
                events.push(ev);
            }
            other => events.push(other),
        }
    }
    let mut html_output: String = String::new();
    push_html(&mut html_output, events.into_iter());
    Ok(html_output)
}

/// The stylesheet matching the classes emitted for highlighted code.
pub fn highlight_css() -> Fallible<String> {
    let themes = ThemeSet::load_defaults();
    let theme = themes
        .themes
        .get(HIGHLIGHT_THEME)
        .ok_or_else(|| ErrorReport::new(format!("missing highlight theme {HIGHLIGHT_THEME}")))?;
    css_for_theme_with_class_style(theme, CLASS_STYLE)
        .map_err(|err| ErrorReport::new(format!("failed to build highlight CSS: {err}")))
}

/// Replace every math span with a placeholder. Returns the rewritten text and
/// the spans, already converted to single-backslash delimiters.
fn protect_math(text: &str) -> (String, Vec<String>) {
    let mut spans = Vec::new();
    let protected = MATH_SPAN.replace_all(text, |caps: &Captures| {
        let span = match (caps.get(1), caps.get(2)) {
            (Some(inline), _) => format!(r"\({}\)", inline.as_str()),
            (None, Some(display)) => format!(r"\[{}\]", display.as_str()),
            (None, None) => caps[0].to_string(),
        };
        spans.push(span);
        format!("{PLACEHOLDER_OPEN}{}{PLACEHOLDER_CLOSE}", spans.len() - 1)
    });
    (protected.into_owned(), spans)
}

fn restore_math(text: &str, math: &[String]) -> String {
    if !text.contains(PLACEHOLDER_OPEN) {
        return text.to_string();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| math.get(i))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

fn restore_math_cow<'a>(text: CowStr<'a>, math: &[String]) -> CowStr<'a> {
    if text.contains(PLACEHOLDER_OPEN) {
        CowStr::from(restore_math(&text, math))
    } else {
        text
    }
}

fn highlight_code_block<'a>(lang: Option<&str>, code: &str) -> Fallible<Vec<Event<'a>>> {
    let syntax = lang.and_then(|lang| SYNTAX_SET.find_syntax_by_token(lang));
    match syntax {
        Some(syntax) => {
            let mut generator =
                ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAX_SET, CLASS_STYLE);
            for line in LinesWithEndings::from(code) {
                generator
                    .parse_html_for_line_which_includes_newline(line)
                    .map_err(|err| ErrorReport::new(format!("failed to highlight code: {err}")))?;
            }
            let html = format!(
                "<div class=\"highlight\"><pre><code>{}</code></pre></div>\n",
                generator.finalize()
            );
            Ok(vec![Event::Html(CowStr::from(html))])
        }
        // Unknown or missing language: a plain, escaped code block.
        None => Ok(vec![
            Event::Html(CowStr::Borrowed("\n<pre><code>")),
            Event::Text(CowStr::from(code.trim().to_string())),
            Event::Html(CowStr::Borrowed("</code></pre>\n")),
        ]),
    }
}

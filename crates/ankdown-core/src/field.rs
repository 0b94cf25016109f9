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

use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fs::create_dir_all;
use std::fs::write;
use std::ops::Range;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Fallible;
use crate::hash::content_hash;
use crate::markdown::markdown_to_html;
use crate::math::MathMode;
use crate::math::normalize_math;

/// Markdown images pointing at a remote URL. The optional title is dropped
/// when the image is rewritten.
static REMOTE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(!\[[^\]]*\])\((http[^)"]*?)\s*(?:"[^"]*")?\)"#).expect("valid image regex")
});

/// Downloads are kept apart from staged media, whose flat names could
/// otherwise collide with a URL's last segment.
pub const REMOTE_DIR: &str = "remote";

/// How a field is compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldMode {
    /// Math handling, remote images, and Markdown rendering.
    Markdown,
    /// The raw text, unmodified. Used for the tag field.
    Plain,
}

/// Something that can download a remote resource. The build uses an HTTP
/// client; tests use canned responses.
pub trait MediaFetcher {
    fn fetch(&self, url: &str) -> Fallible<Vec<u8>>;
}

/// A remote image could not be downloaded. This aborts the build.
#[derive(Debug, PartialEq)]
pub struct MediaFetchError {
    pub url: String,
    pub field: String,
    pub reason: String,
}

impl Display for MediaFetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to download {} for markdown ({}):\n\n{}",
            self.url, self.reason, self.field
        )
    }
}

impl Error for MediaFetchError {}

/// A remote image reference found in a field.
#[derive(Debug, PartialEq)]
pub struct RemoteImage {
    /// Byte range of the whole `![alt](url)` expression.
    pub range: Range<usize>,
    /// The `![alt]` part, kept verbatim.
    pub alt: String,
    pub url: String,
}

/// Find every remote image in `text`, without touching the network.
pub fn scan_remote_images(text: &str) -> Vec<RemoteImage> {
    REMOTE_IMAGE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(RemoteImage {
                range: whole.range(),
                alt: caps[1].to_string(),
                url: caps[2].to_string(),
            })
        })
        .collect()
}

/// The name a downloaded file is stored under: the last segment of the URL
/// path.
pub fn local_file_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => without_query,
    };
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("remote-{:016x}", content_hash(url)),
    }
}

/// Compiles raw field text into the HTML stored in the package.
pub struct FieldCompiler<'a> {
    math: MathMode,
    highlight: bool,
    /// Where downloaded images are written.
    staging_dir: &'a Path,
    fetcher: &'a dyn MediaFetcher,
}

impl<'a> FieldCompiler<'a> {
    pub fn new(
        math: MathMode,
        highlight: bool,
        staging_dir: &'a Path,
        fetcher: &'a dyn MediaFetcher,
    ) -> Self {
        Self {
            math,
            highlight,
            staging_dir,
            fetcher,
        }
    }

    pub fn compile(&self, text: &str, mode: FieldMode) -> Fallible<String> {
        match mode {
            FieldMode::Plain => Ok(text.to_string()),
            FieldMode::Markdown => {
                let normalized = normalize_math(text, self.math);
                let rendered = self.materialize_remote_images(&normalized, text)?;
                markdown_to_html(&rendered, self.highlight)
            }
        }
    }

    /// Download every remote image into the `remote` directory under the
    /// staging directory and point the image at the local copy. Errors quote
    /// `field`, the text as written in the document.
    fn materialize_remote_images(&self, text: &str, field: &str) -> Fallible<String> {
        let images = scan_remote_images(text);
        if images.is_empty() {
            return Ok(text.to_string());
        }
        let download_dir = self.staging_dir.join(REMOTE_DIR);
        create_dir_all(&download_dir)?;
        let mut local_paths: Vec<PathBuf> = Vec::with_capacity(images.len());
        for image in &images {
            log::debug!("Downloading {}", image.url);
            let bytes = self.fetcher.fetch(&image.url).map_err(|err| MediaFetchError {
                url: image.url.clone(),
                field: field.to_string(),
                reason: err.message().to_string(),
            })?;
            let path = download_dir.join(local_file_name(&image.url));
            write(&path, bytes)?;
            local_paths.push(path);
        }
        let mut rewritten = String::with_capacity(text.len());
        let mut last = 0;
        for (image, path) in images.iter().zip(&local_paths) {
            rewritten.push_str(&text[last..image.range.start]);
            rewritten.push_str(&format!("{}(<{}>)", image.alt, path.display()));
            last = image.range.end;
        }
        rewritten.push_str(&text[last..]);
        Ok(rewritten)
    }
}

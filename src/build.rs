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
use std::fs::read_to_string;
use std::path::Path;
use std::path::PathBuf;

use ankdown_core::DeckAssembler;
use ankdown_core::ErrorReport;
use ankdown_core::Fallible;
use ankdown_core::FieldCompiler;
use ankdown_core::MediaFetcher;
use ankdown_core::VersionLedger;
use ankdown_core::content_hash;
use ankdown_core::parse_document;
use walkdir::WalkDir;

use crate::config::Config;
use crate::package::write_package;

const DOCUMENT_EXTENSIONS: [&str; 2] = ["md", "markdown"];

/// What a build did.
#[derive(Debug, PartialEq)]
pub struct BuildReport {
    pub package: PathBuf,
    pub documents_seen: usize,
    pub documents_processed: usize,
    pub documents_skipped: usize,
    pub cards: usize,
    pub decks: usize,
    pub media: usize,
}

/// A source document could not be read.
#[derive(Debug)]
pub struct DocumentReadError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

impl Display for DocumentReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to read {}: {}", self.path.display(), self.source)
    }
}

impl Error for DocumentReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

impl From<DocumentReadError> for ErrorReport {
    fn from(value: DocumentReadError) -> Self {
        ErrorReport::new(value.to_string())
    }
}

/// Compile every document under `config.recur_dir` into a package.
///
/// The first failure aborts the build. The version log is only written once
/// the package has been written.
pub fn build(config: &Config, fetcher: &dyn MediaFetcher) -> Fallible<BuildReport> {
    let mut ledger = VersionLedger::load(&config.version_log)?;
    let model = config.card_model()?;
    let staging = tempfile::tempdir()?;
    let compiler = FieldCompiler::new(config.math_mode(), config.highlight, staging.path(), fetcher);
    let mut assembler = DeckAssembler::new(staging.path());

    let documents = find_documents(&config.recur_dir)?;
    let mut processed = 0;
    for document in &documents {
        let text = read_to_string(document).map_err(|source| DocumentReadError {
            path: document.clone(),
            source,
        })?;
        let fingerprint = content_hash(&text);
        if !ledger.should_process(document, fingerprint, config.updated_only) {
            log::debug!("Skipping unchanged document {}", document.display());
            continue;
        }
        log::debug!("Processing {}", document.display());
        add_document(&mut assembler, &compiler, document, &text).map_err(|err| {
            err.context(format!("failed to produce cards for {}", document.display()))
        })?;
        ledger.record(document, fingerprint);
        processed += 1;
    }

    let assembly = assembler.finish();
    if assembly.decks.is_empty() {
        log::warn!("no card generated");
    }
    let package = write_package(&config.pkg_arg, &model, &assembly, staging.path())?;
    ledger.save(&config.version_log)?;

    let report = BuildReport {
        package,
        documents_seen: documents.len(),
        documents_processed: processed,
        documents_skipped: documents.len() - processed,
        cards: assembly.card_count,
        decks: assembly.decks.len(),
        media: assembly.media.len(),
    };
    log::info!(
        "Wrote {} cards in {} decks with {} media files to {} ({} of {} documents processed, {} unchanged)",
        report.cards,
        report.decks,
        report.media,
        report.package.display(),
        report.documents_processed,
        report.documents_seen,
        report.documents_skipped,
    );
    Ok(report)
}

fn add_document(
    assembler: &mut DeckAssembler<'_>,
    compiler: &FieldCompiler<'_>,
    document: &Path,
    text: &str,
) -> Fallible<()> {
    for card in parse_document(document.to_path_buf(), text, compiler) {
        assembler.add_card(card?)?;
    }
    Ok(())
}

/// Every Markdown document under `root`, in a stable order.
fn find_documents(root: &Path) -> Fallible<Vec<PathBuf>> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            ErrorReport::new(format!("failed to walk {}: {err}", root.display()))
        })?;
        if entry.file_type().is_file() && is_document(entry.path()) {
            documents.push(entry.into_path());
        }
    }
    Ok(documents)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext))
}

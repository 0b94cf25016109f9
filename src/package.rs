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

//! Writes the `.apkg` container: a zip holding the collection database, the
//! media manifest, and the media files under numeric names.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fs::File;
use std::fs::read;
use std::fs::remove_file;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use ankdown_core::Assembly;
use ankdown_core::CardModel;
use ankdown_core::Deck;
use ankdown_core::ErrorReport;
use ankdown_core::Fallible;
use ankdown_core::Note;
use chrono::DateTime;
use chrono::Utc;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::Transaction;
use rusqlite::params;
use serde_json::Value;
use serde_json::json;
use sha1::Digest;
use sha1::Sha1;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const COLLECTION_FILE: &str = "collection.anki2";
const MEDIA_MANIFEST: &str = "media";
const SCHEMA_VERSION: i64 = 11;
const DEFAULT_DECK_ID: u64 = 1;
const FIELD_SEPARATOR: &str = "\x1f";

const SCHEMA: &str = "
CREATE TABLE col (
    id     integer primary key,
    crt    integer not null,
    mod    integer not null,
    scm    integer not null,
    ver    integer not null,
    dty    integer not null,
    usn    integer not null,
    ls     integer not null,
    conf   text not null,
    models text not null,
    decks  text not null,
    dconf  text not null,
    tags   text not null
);
CREATE TABLE notes (
    id    integer primary key,
    guid  text not null,
    mid   integer not null,
    mod   integer not null,
    usn   integer not null,
    tags  text not null,
    flds  text not null,
    sfld  integer not null,
    csum  integer not null,
    flags integer not null,
    data  text not null
);
CREATE TABLE cards (
    id     integer primary key,
    nid    integer not null,
    did    integer not null,
    ord    integer not null,
    mod    integer not null,
    usn    integer not null,
    type   integer not null,
    queue  integer not null,
    due    integer not null,
    ivl    integer not null,
    factor integer not null,
    reps   integer not null,
    lapses integer not null,
    left   integer not null,
    odue   integer not null,
    odid   integer not null,
    flags  integer not null,
    data   text not null
);
CREATE TABLE revlog (
    id      integer primary key,
    cid     integer not null,
    usn     integer not null,
    ease    integer not null,
    ivl     integer not null,
    lastIvl integer not null,
    factor  integer not null,
    time    integer not null,
    type    integer not null
);
CREATE TABLE graves (
    usn  integer not null,
    oid  integer not null,
    type integer not null
);
CREATE INDEX ix_notes_usn on notes (usn);
CREATE INDEX ix_cards_usn on cards (usn);
CREATE INDEX ix_revlog_usn on revlog (usn);
CREATE INDEX ix_cards_nid on cards (nid);
CREATE INDEX ix_cards_sched on cards (did, queue, due);
CREATE INDEX ix_revlog_cid on revlog (cid);
CREATE INDEX ix_notes_csum on notes (csum);
";

const LATEX_PRE: &str = "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n";
const LATEX_POST: &str = "\\end{document}";

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid HTML tag regex"));

/// The package could not be written.
#[derive(Debug, PartialEq)]
pub struct PackageWriteError {
    pub path: PathBuf,
    pub message: String,
}

impl Display for PackageWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to write package {}: {}", self.path.display(), self.message)
    }
}

impl Error for PackageWriteError {}

impl From<PackageWriteError> for ErrorReport {
    fn from(value: PackageWriteError) -> Self {
        ErrorReport::new(value.to_string())
    }
}

/// Write the assembled decks and the staged media to `output`. The collection
/// database is built in `staging_dir`, next to the media.
pub fn write_package(
    output: &Path,
    model: &CardModel,
    assembly: &Assembly,
    staging_dir: &Path,
) -> Fallible<PathBuf> {
    write_collection(model, assembly, staging_dir)
        .and_then(|collection| write_archive(output, &collection, &assembly.media, staging_dir))
        .map_err(|err| PackageWriteError {
            path: output.to_path_buf(),
            message: err.message().to_string(),
        })?;
    Ok(output.to_path_buf())
}

fn sql(err: rusqlite::Error) -> ErrorReport {
    ErrorReport::new(format!("database error: {err}"))
}

fn archive(err: zip::result::ZipError) -> ErrorReport {
    ErrorReport::new(format!("archive error: {err}"))
}

/// Anki stores IDs as signed 64-bit integers. Ours are hashes masked to 63
/// bits, so the conversion is lossless.
fn sql_id(id: u64) -> i64 {
    id as i64
}

fn write_collection(model: &CardModel, assembly: &Assembly, staging_dir: &Path) -> Fallible<PathBuf> {
    let path = staging_dir.join(COLLECTION_FILE);
    if path.exists() {
        remove_file(&path)?;
    }
    let mut conn = Connection::open(&path).map_err(sql)?;
    conn.execute_batch(SCHEMA).map_err(sql)?;
    let now = Utc::now();
    let tx = conn.transaction().map_err(sql)?;
    insert_col(&tx, model, assembly, &now)?;
    let mut rows = RowIds::starting_at(now.timestamp_millis());
    let mut position = 0;
    for deck in assembly.decks.iter() {
        for note in deck.notes() {
            insert_note(&tx, model, deck, note, &now, &mut rows, position)?;
            position += 1;
        }
    }
    tx.commit().map_err(sql)?;
    conn.close().map_err(|(_, err)| sql(err))?;
    Ok(path)
}

/// Row IDs for notes and cards, counting up from the current millisecond.
struct RowIds {
    next: i64,
}

impl RowIds {
    fn starting_at(next: i64) -> Self {
        Self { next }
    }

    fn take(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

fn insert_col(
    tx: &Transaction<'_>,
    model: &CardModel,
    assembly: &Assembly,
    now: &DateTime<Utc>,
) -> Fallible<()> {
    let secs = now.timestamp();
    let millis = now.timestamp_millis();
    let note_count = assembly.decks.iter().map(|deck| deck.notes().len()).sum::<usize>();
    let mut models = serde_json::Map::new();
    models.insert(model.id().to_string(), model_json(model, secs));
    let mut decks = serde_json::Map::new();
    decks.insert(DEFAULT_DECK_ID.to_string(), deck_json(DEFAULT_DECK_ID, "Default", secs));
    for deck in assembly.decks.iter() {
        decks.insert(deck.id().to_string(), deck_json(deck.id(), deck.name(), secs));
    }
    let conf = json!({
        "activeDecks": [DEFAULT_DECK_ID],
        "curDeck": DEFAULT_DECK_ID,
        "newSpread": 0,
        "collapseTime": 1200,
        "timeLim": 0,
        "estTimes": true,
        "dueCounts": true,
        "curModel": model.id().to_string(),
        "nextPos": note_count + 1,
        "sortType": "noteFld",
        "sortBackwards": false,
        "addToCur": true,
    });
    tx.execute(
        "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags)
         VALUES (1, ?1, ?2, ?3, ?4, 0, 0, 0, ?5, ?6, ?7, ?8, '{}')",
        params![
            secs,
            millis,
            millis,
            SCHEMA_VERSION,
            conf.to_string(),
            Value::Object(models).to_string(),
            Value::Object(decks).to_string(),
            dconf_json().to_string(),
        ],
    )
    .map_err(sql)?;
    Ok(())
}

fn insert_note(
    tx: &Transaction<'_>,
    model: &CardModel,
    deck: &Deck,
    note: &Note,
    now: &DateTime<Utc>,
    rows: &mut RowIds,
    position: i64,
) -> Fallible<()> {
    let secs = now.timestamp();
    let fields = padded_fields(note, model.fields.len());
    let sort_field = strip_html(fields.first().map(String::as_str).unwrap_or(""));
    let note_id = rows.take();
    tx.execute(
        "INSERT INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data)
         VALUES (?1, ?2, ?3, ?4, -1, '', ?5, ?6, ?7, 0, '')",
        params![
            note_id,
            note.guid.to_string(),
            sql_id(model.id()),
            secs,
            fields.join(FIELD_SEPARATOR),
            sort_field,
            field_checksum(&sort_field),
        ],
    )
    .map_err(sql)?;
    for (ord, template) in model.templates.iter().enumerate() {
        let required = model.required_fields(template);
        let generates = required
            .iter()
            .any(|&ord| fields.get(ord).is_some_and(|field| !field.trim().is_empty()));
        if !generates {
            continue;
        }
        tx.execute(
            "INSERT INTO cards (id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, lapses, left, odue, odid, flags, data)
             VALUES (?1, ?2, ?3, ?4, ?5, -1, 0, 0, ?6, 0, 0, 0, 0, 0, 0, 0, 0, '')",
            params![rows.take(), note_id, sql_id(deck.id()), ord as i64, secs, position],
        )
        .map_err(sql)?;
    }
    Ok(())
}

/// The note's fields, padded with empty fields up to the model's field count.
fn padded_fields(note: &Note, count: usize) -> Vec<String> {
    let mut fields = note.fields.clone();
    if fields.len() < count {
        fields.resize(count, String::new());
    }
    fields
}

fn strip_html(html: &str) -> String {
    HTML_TAG.replace_all(html, "").trim().to_string()
}

/// The first 32 bits of the SHA-1 of the sort field, which Anki uses to find
/// duplicates.
fn field_checksum(text: &str) -> i64 {
    let digest = Sha1::digest(text.as_bytes());
    i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

fn model_json(model: &CardModel, secs: i64) -> Value {
    let fields: Vec<Value> = model
        .fields
        .iter()
        .enumerate()
        .map(|(ord, field)| {
            json!({
                "name": field.name,
                "ord": ord,
                "sticky": false,
                "rtl": false,
                "font": "Arial",
                "size": 20,
                "media": [],
            })
        })
        .collect();
    let templates: Vec<Value> = model
        .templates
        .iter()
        .enumerate()
        .map(|(ord, template)| {
            json!({
                "name": template.name,
                "ord": ord,
                "qfmt": template.qfmt,
                "afmt": template.afmt,
                "did": null,
                "bqfmt": "",
                "bafmt": "",
            })
        })
        .collect();
    let requirements: Vec<Value> = model
        .templates
        .iter()
        .enumerate()
        .map(|(ord, template)| json!([ord, "any", model.required_fields(template)]))
        .collect();
    json!({
        "id": model.id(),
        "name": model.name,
        "type": 0,
        "mod": secs,
        "usn": -1,
        "sortf": 0,
        "did": DEFAULT_DECK_ID,
        "tmpls": templates,
        "flds": fields,
        "css": model.css,
        "latexPre": LATEX_PRE,
        "latexPost": LATEX_POST,
        "latexsvg": false,
        "req": requirements,
        "tags": [],
        "vers": [],
    })
}

fn deck_json(id: u64, name: &str, secs: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "mod": secs,
        "usn": -1,
        "desc": "",
        "dyn": 0,
        "conf": 1,
        "collapsed": false,
        "browserCollapsed": false,
        "extendNew": 10,
        "extendRev": 50,
        "newToday": [0, 0],
        "revToday": [0, 0],
        "lrnToday": [0, 0],
        "timeToday": [0, 0],
    })
}

fn dconf_json() -> Value {
    json!({
        "1": {
            "id": 1,
            "name": "Default",
            "mod": 0,
            "usn": 0,
            "maxTaken": 60,
            "autoplay": true,
            "timer": 0,
            "replayq": true,
            "dyn": false,
            "new": {
                "bury": true,
                "delays": [1, 10],
                "initialFactor": 2500,
                "ints": [1, 4, 7],
                "order": 1,
                "perDay": 20,
                "separate": true,
            },
            "lapse": {
                "delays": [10],
                "leechAction": 0,
                "leechFails": 8,
                "minInt": 1,
                "mult": 0,
            },
            "rev": {
                "bury": true,
                "ease4": 1.3,
                "fuzz": 0.05,
                "ivlFct": 1,
                "maxIvl": 36500,
                "minSpace": 1,
                "perDay": 100,
            },
        },
    })
}

fn write_archive(
    output: &Path,
    collection: &Path,
    media: &BTreeSet<String>,
    staging_dir: &Path,
) -> Fallible<()> {
    let file = File::create(output)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(COLLECTION_FILE, options).map_err(archive)?;
    zip.write_all(&read(collection)?)?;
    let mut manifest = BTreeMap::new();
    for (index, name) in media.iter().enumerate() {
        let entry = index.to_string();
        zip.start_file(entry.as_str(), options).map_err(archive)?;
        zip.write_all(&read(staging_dir.join(name))?)?;
        manifest.insert(entry, name.as_str());
    }
    zip.start_file(MEDIA_MANIFEST, options).map_err(archive)?;
    zip.write_all(serde_json::to_string(&manifest)?.as_bytes())?;
    zip.finish().map_err(archive)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs::write;
    use std::io::Read;

    use ankdown_core::DeckAssembler;
    use ankdown_core::card::Card;
    use tempfile::tempdir;
    use zip::ZipArchive;

    use super::*;

    /// Unpack a package into `dir`: returns the open collection and the media
    /// manifest.
    pub(crate) fn open_package(
        package: &Path,
        dir: &Path,
    ) -> Fallible<(Connection, BTreeMap<String, String>)> {
        let mut zip = ZipArchive::new(File::open(package)?).map_err(archive)?;
        let mut db = Vec::new();
        zip.by_name(COLLECTION_FILE)
            .map_err(archive)?
            .read_to_end(&mut db)?;
        let db_path = dir.join("unpacked.anki2");
        write(&db_path, db)?;
        let mut manifest = String::new();
        zip.by_name(MEDIA_MANIFEST)
            .map_err(archive)?
            .read_to_string(&mut manifest)?;
        let manifest = serde_json::from_str(&manifest)?;
        let conn = Connection::open(&db_path).map_err(sql)?;
        Ok((conn, manifest))
    }

    fn card(path: &str, fields: &[&str]) -> Card {
        let mut card = Card::new(PathBuf::from(path), 0);
        for field in fields {
            card.add_field(field.to_string());
        }
        card
    }

    #[test]
    fn test_checksum() {
        // SHA-1 of "abc" is a9993e36...
        assert_eq!(field_checksum("abc"), 0xa9993e36);
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Front <em>text</em></p>\n"), "Front text");
    }

    #[test]
    fn test_padded_fields() {
        let note = Note {
            guid: 1,
            fields: vec!["a".to_string()],
        };
        assert_eq!(padded_fields(&note, 3), vec!["a", "", ""]);
    }

    #[test]
    fn test_write_package() -> Fallible<()> {
        let stage = tempdir()?;
        let out = tempdir()?;
        let mut assembler = DeckAssembler::new(stage.path());
        assembler.add_card(card("/n/deck1/a.md", &["<p>Front</p>\n", "<p>Back</p>\n"]))?;
        assembler.add_card(card("/n/deck2/b.md", &["<p>Only front</p>\n"]))?;
        let assembly = assembler.finish();
        let model = CardModel::default();
        let output = out.path().join("deck.apkg");
        let written = write_package(&output, &model, &assembly, stage.path())?;
        assert_eq!(written, output);

        let (conn, manifest) = open_package(&output, out.path())?;
        assert!(manifest.is_empty());
        let notes: Vec<(String, String, String)> = conn
            .prepare("SELECT guid, flds, sfld FROM notes ORDER BY id")
            .and_then(|mut stmt| {
                stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect()
            })
            .map_err(sql)?;
        assert_eq!(notes.len(), 2);
        let guid = ankdown_core::content_hash("deck1/a.md0").to_string();
        assert_eq!(notes[0].0, guid);
        assert_eq!(notes[0].1, "<p>Front</p>\n\x1f<p>Back</p>\n\x1f");
        assert_eq!(notes[0].2, "Front");
        assert_eq!(notes[1].1, "<p>Only front</p>\n\x1f\x1f");

        let cards: i64 = conn
            .query_row("SELECT count(*) FROM cards", [], |row| row.get(0))
            .map_err(sql)?;
        assert_eq!(cards, 2);
        let deck_ids: Vec<i64> = conn
            .prepare("SELECT did FROM cards ORDER BY id")
            .and_then(|mut stmt| stmt.query_map([], |row| row.get(0))?.collect())
            .map_err(sql)?;
        assert_eq!(
            deck_ids,
            vec![
                sql_id(ankdown_core::content_hash("deck1")),
                sql_id(ankdown_core::content_hash("deck2")),
            ]
        );

        let decks: String = conn
            .query_row("SELECT decks FROM col", [], |row| row.get(0))
            .map_err(sql)?;
        let decks: Value = serde_json::from_str(&decks)?;
        let names: BTreeSet<&str> = decks
            .as_object()
            .map(|decks| decks.values().filter_map(|d| d["name"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(names, BTreeSet::from(["Default", "deck1", "deck2"]));
        Ok(())
    }

    #[test]
    fn test_media_is_packaged() -> Fallible<()> {
        let stage = tempdir()?;
        let out = tempdir()?;
        write(stage.path().join("images%a.png"), b"PNG")?;
        let mut assembly = Assembly::default();
        assembly.media.insert("images%a.png".to_string());
        let output = out.path().join("media.apkg");
        write_package(&output, &CardModel::default(), &assembly, stage.path())?;

        let (_, manifest) = open_package(&output, out.path())?;
        assert_eq!(manifest.get("0").map(String::as_str), Some("images%a.png"));
        let mut zip = ZipArchive::new(File::open(&output)?).map_err(archive)?;
        let mut bytes = Vec::new();
        zip.by_name("0").map_err(archive)?.read_to_end(&mut bytes)?;
        assert_eq!(bytes, b"PNG");
        Ok(())
    }

    #[test]
    fn test_unwritable_output() -> Fallible<()> {
        let stage = tempdir()?;
        let output = stage.path().join("missing").join("deck.apkg");
        let err = write_package(&output, &CardModel::default(), &Assembly::default(), stage.path())
            .expect_err("parent directory does not exist");
        assert!(err.message().starts_with("failed to write package"));
        assert!(err.message().contains("deck.apkg"));
        Ok(())
    }
}

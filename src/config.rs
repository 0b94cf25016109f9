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
use std::path::absolute;

use ankdown_core::CardModel;
use ankdown_core::ErrorReport;
use ankdown_core::Fallible;
use ankdown_core::MathMode;
use ankdown_core::ModelField;
use ankdown_core::ModelTemplate;
use ankdown_core::highlight_css;
use ankdown_core::model::DEFAULT_MODEL_CSS;
use ankdown_core::model::DEFAULT_MODEL_NAME;
use serde::Deserialize;

/// Everything a build needs to know.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Directory searched recursively for documents.
    pub recur_dir: PathBuf,
    /// Where the package is written.
    pub pkg_arg: PathBuf,
    /// Math is delimited with `$` instead of `\(` and `\[`.
    pub dollar: bool,
    pub highlight: bool,
    pub updated_only: bool,
    /// Path of the version log used by `updated_only` builds.
    pub version_log: PathBuf,
    pub card_model_name: String,
    pub card_model_css: String,
    pub card_model_fields: Vec<ModelField>,
    pub card_model_templates: Vec<ModelTemplate>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recur_dir: PathBuf::from("."),
            pkg_arg: PathBuf::from("AnkdownPkg.apkg"),
            dollar: false,
            highlight: false,
            updated_only: false,
            version_log: PathBuf::from(".mdvlog"),
            card_model_name: DEFAULT_MODEL_NAME.to_string(),
            card_model_css: DEFAULT_MODEL_CSS.to_string(),
            card_model_fields: CardModel::default_fields(),
            card_model_templates: CardModel::default_templates(),
        }
    }
}

impl Config {
    /// Overwrite every option the layer sets.
    pub fn apply(&mut self, layer: ConfigLayer) {
        let ConfigLayer {
            recur_dir,
            pkg_arg,
            dollar,
            highlight,
            updated_only,
            version_log,
            card_model_name,
            card_model_css,
            card_model_fields,
            card_model_templates,
        } = layer;
        if let Some(value) = recur_dir {
            self.recur_dir = value;
        }
        if let Some(value) = pkg_arg {
            self.pkg_arg = value;
        }
        if let Some(value) = dollar {
            self.dollar = value;
        }
        if let Some(value) = highlight {
            self.highlight = value;
        }
        if let Some(value) = updated_only {
            self.updated_only = value;
        }
        if let Some(value) = version_log {
            self.version_log = value;
        }
        if let Some(value) = card_model_name {
            self.card_model_name = value;
        }
        if let Some(value) = card_model_css {
            self.card_model_css = value;
        }
        if let Some(value) = card_model_fields {
            self.card_model_fields = value;
        }
        if let Some(value) = card_model_templates {
            self.card_model_templates = value;
        }
    }

    /// Expand `~` and make every path absolute against the working
    /// directory.
    pub fn resolve_paths(mut self) -> Fallible<Self> {
        self.recur_dir = resolve_path(&self.recur_dir)?;
        self.pkg_arg = resolve_path(&self.pkg_arg)?;
        self.version_log = resolve_path(&self.version_log)?;
        Ok(self)
    }

    pub fn math_mode(&self) -> MathMode {
        if self.dollar {
            MathMode::Dollar
        } else {
            MathMode::Native
        }
    }

    /// The note type for this build. Highlighting adds the highlighter's
    /// stylesheet to the model CSS.
    pub fn card_model(&self) -> Fallible<CardModel> {
        let mut css = self.card_model_css.clone();
        if self.highlight {
            css.push_str(&highlight_css()?);
        }
        Ok(CardModel {
            name: self.card_model_name.clone(),
            css,
            fields: self.card_model_fields.clone(),
            templates: self.card_model_templates.clone(),
        })
    }
}

/// One layer of configuration: a YAML document or the command-line flags.
/// Options that are not set leave the layers below untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub recur_dir: Option<PathBuf>,
    pub pkg_arg: Option<PathBuf>,
    pub dollar: Option<bool>,
    pub highlight: Option<bool>,
    pub updated_only: Option<bool>,
    pub version_log: Option<PathBuf>,
    pub card_model_name: Option<String>,
    pub card_model_css: Option<String>,
    pub card_model_fields: Option<Vec<ModelField>>,
    pub card_model_templates: Option<Vec<ModelTemplate>>,
}

impl ConfigLayer {
    pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let path = resolve_path(path).map_err(|err| ConfigLoadError {
            origin: path.display().to_string(),
            message: err.message().to_string(),
        })?;
        let origin = path.display().to_string();
        let text = read_to_string(&path).map_err(|err| ConfigLoadError {
            origin: origin.clone(),
            message: err.to_string(),
        })?;
        Self::from_yaml(&origin, &text)
    }

    /// Parse a YAML mapping. `origin` names where the text came from, for
    /// error messages.
    pub fn from_yaml(origin: &str, text: &str) -> Result<Self, ConfigLoadError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(text).map_err(|err| ConfigLoadError {
            origin: origin.to_string(),
            message: err.to_string(),
        })
    }
}

/// The configuration could not be read or parsed. Nothing has been built
/// when this is raised.
#[derive(Debug, PartialEq)]
pub struct ConfigLoadError {
    pub origin: String,
    pub message: String,
}

impl Display for ConfigLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration in {}: {}", self.origin, self.message)
    }
}

impl Error for ConfigLoadError {}

impl From<ConfigLoadError> for ErrorReport {
    fn from(value: ConfigLoadError) -> Self {
        ErrorReport::new(value.to_string())
    }
}

fn resolve_path(path: &Path) -> Fallible<PathBuf> {
    Ok(absolute(expand_home(path))?)
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) if rest.as_os_str().is_empty() => home,
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

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

use std::path::PathBuf;

use ankdown_core::Fallible;
use clap::Parser;

use crate::build::build;
use crate::config::Config;
use crate::config::ConfigLayer;
use crate::fetch::HttpFetcher;

/// Compile a tree of Markdown files into an Anki package.
///
/// Every `.md` or `.markdown` file under the search directory holds one or
/// more cards. A line containing only `%` ends a field and a line containing
/// only `---` ends a card. The first field is the front, the second the back,
/// and the optional third holds tags. Cards are grouped into decks named
/// after the directory that holds them.
#[derive(Parser)]
#[command(version, about, long_about)]
pub struct Cli {
    /// Directory to search recursively for cards. Defaults to the current directory.
    #[arg(short = 'r', value_name = "DIR")]
    recur_dir: Option<PathBuf>,
    /// Path of the package to write. Defaults to `AnkdownPkg.apkg`.
    #[arg(short = 'p', value_name = "PACKAGE")]
    pkg_arg: Option<PathBuf>,
    /// Syntax-highlight fenced code blocks.
    #[arg(long)]
    highlight: bool,
    /// Only generate cards from files that changed since the last build.
    #[arg(long = "updatedOnly", alias = "updated-only")]
    updated_only: bool,
    /// Configuration as a YAML string.
    #[arg(long = "config", value_name = "CONFIG_STRING")]
    config: Option<String>,
    /// Path to a YAML configuration file.
    #[arg(long = "configFile", alias = "config-file", value_name = "CONFIG_FILE_PATH")]
    config_file: Option<PathBuf>,
}

impl Cli {
    /// The configuration layer set by command-line flags. Boolean flags can
    /// only switch an option on.
    fn flags(&self) -> ConfigLayer {
        ConfigLayer {
            recur_dir: self.recur_dir.clone(),
            pkg_arg: self.pkg_arg.clone(),
            highlight: self.highlight.then_some(true),
            updated_only: self.updated_only.then_some(true),
            ..ConfigLayer::default()
        }
    }

    /// Stack the configuration layers: defaults, then the config file, then
    /// the inline config, then flags.
    fn config(&self) -> Fallible<Config> {
        let mut config = Config::default();
        if let Some(path) = &self.config_file {
            config.apply(ConfigLayer::from_file(path)?);
        }
        if let Some(yaml) = &self.config {
            config.apply(ConfigLayer::from_yaml("--config", yaml)?);
        }
        config.apply(self.flags());
        config.resolve_paths()
    }
}

pub fn entrypoint() -> Fallible<()> {
    let cli = Cli::parse();
    let config = cli.config()?;
    let fetcher = HttpFetcher::new()?;
    build(&config, &fetcher)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("ankdown").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() -> Fallible<()> {
        let config = parse(&[]).config()?;
        assert!(config.recur_dir.is_absolute());
        assert_eq!(config.pkg_arg.file_name(), Some("AnkdownPkg.apkg".as_ref()));
        assert!(!config.highlight);
        assert!(!config.updated_only);
        Ok(())
    }

    #[test]
    fn test_flags() -> Fallible<()> {
        let config = parse(&["-r", "/notes", "-p", "/out/deck.apkg", "--updatedOnly"]).config()?;
        assert_eq!(config.recur_dir, Path::new("/notes"));
        assert_eq!(config.pkg_arg, Path::new("/out/deck.apkg"));
        assert!(config.updated_only);
        assert!(!config.highlight);
        Ok(())
    }

    #[test]
    fn test_flags_override_inline_config() -> Fallible<()> {
        let cli = parse(&["--config", "{recur_dir: /a, dollar: true}", "-r", "/b"]);
        let config = cli.config()?;
        assert_eq!(config.recur_dir, Path::new("/b"));
        assert!(config.dollar);
        Ok(())
    }

    #[test]
    fn test_inline_config_overrides_file() -> Fallible<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ankdown.yaml");
        std::fs::write(&path, "pkg_arg: /from/file.apkg\nhighlight: true\n")?;
        let path_arg = path.display().to_string();
        let cli = parse(&["--configFile", &path_arg, "--config", "pkg_arg: /inline.apkg"]);
        let config = cli.config()?;
        assert_eq!(config.pkg_arg, Path::new("/inline.apkg"));
        assert!(config.highlight);
        Ok(())
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let cli = parse(&["--config", "recurse: /a"]);
        let err = cli.config().expect_err("unknown keys must be rejected");
        assert!(err.message().contains("--config"));
    }
}

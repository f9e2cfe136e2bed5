// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use togo_core::{
    memory::{SCRATCH_ALLOCATOR_SIZE_DEFAULT, SCRATCH_ALLOCATOR_SIZE_MINIMUM},
    threading::NUM_TASKS,
};

use crate::cli::Options;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_ROUNDS: u32 = 10;
const DEFAULT_CHILDREN: u16 = 10;
const DEFAULT_ENTITIES: usize = 4096;

/// The settings file, a JSON object with the same options as the command
/// line, all optional (missing fields are `None`).
///
/// Has enum variants for breaking changes in the format of the settings file,
/// but [`read`] always returns the newest variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "settings_file_version", rename_all = "snake_case")]
pub enum SettingsFile {
    V1 {
        workers: Option<usize>,
        rounds: Option<u32>,
        children: Option<u16>,
        entities: Option<usize>,
        scratch_size: Option<usize>,
    },
}

/// The options of a stress run, after merging the command line, the settings
/// file and the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub workers: usize,
    pub rounds: u32,
    pub children: u16,
    pub entities: usize,
    pub scratch_size: usize,
}

/// Reads the settings file, if there is one.
pub fn read(path: Option<&Path>) -> anyhow::Result<SettingsFile> {
    let Some(path) = path else {
        return Ok(SettingsFile::V1 {
            workers: None,
            rounds: None,
            children: None,
            entities: None,
            scratch_size: None,
        });
    };
    let settings = fs::read_to_string(path)
        .with_context(|| format!("Failed to open the settings file {}", path.display()))?;
    parse(&settings).with_context(|| format!("Failed to parse the settings file {}", path.display()))
}

pub fn parse(settings: &str) -> anyhow::Result<SettingsFile> {
    let settings = serde_json::from_str(settings)?;

    // NOTE: When there's new versions of SettingsFile, convert to the newest
    // here (resolve assumes it)

    Ok(settings)
}

impl SettingsFile {
    /// Fills in the options not given on the command line, and checks that
    /// the result is runnable.
    pub fn resolve(self, options: &Options) -> anyhow::Result<Settings> {
        let SettingsFile::V1 {
            workers,
            rounds,
            children,
            entities,
            scratch_size,
        } = self;
        let settings = Settings {
            workers: options.workers.or(workers).unwrap_or(DEFAULT_WORKERS),
            rounds: options.rounds.or(rounds).unwrap_or(DEFAULT_ROUNDS),
            children: options.children.or(children).unwrap_or(DEFAULT_CHILDREN),
            entities: options.entities.or(entities).unwrap_or(DEFAULT_ENTITIES),
            scratch_size: options
                .scratch_size
                .or(scratch_size)
                .unwrap_or(SCRATCH_ALLOCATOR_SIZE_DEFAULT),
        };

        // The parent takes one task slot.
        ensure!(
            (settings.children as usize) < NUM_TASKS,
            "at most {} children fit in the task manager, got {}",
            NUM_TASKS - 1,
            settings.children,
        );
        ensure!(
            settings.scratch_size >= SCRATCH_ALLOCATOR_SIZE_MINIMUM,
            "the scratch size must be at least {SCRATCH_ALLOCATOR_SIZE_MINIMUM} bytes, got {}",
            settings.scratch_size,
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use crate::cli::Options;

    use super::{parse, read, SettingsFile};

    fn no_flags() -> Options {
        Options {
            verbosity_level: LevelFilter::INFO,
            settings: None,
            workers: None,
            rounds: None,
            children: None,
            entities: None,
            scratch_size: None,
        }
    }

    #[test]
    fn flags_override_the_file_which_overrides_defaults() {
        let file = parse(r#"{ "settings_file_version": "v1", "workers": 2, "rounds": 7 }"#)
            .expect("valid settings should parse");
        let options = Options {
            rounds: Some(3),
            ..no_flags()
        };
        let settings = file.resolve(&options).expect("the settings should be valid");
        assert_eq!(2, settings.workers);
        assert_eq!(3, settings.rounds);
        assert_eq!(10, settings.children);
    }

    #[test]
    fn unknown_versions_are_rejected() {
        assert!(parse(r#"{ "settings_file_version": "v0" }"#).is_err());
        assert!(parse(r#"{ "workers": 2 }"#).is_err());
    }

    #[test]
    fn too_many_children_are_rejected() {
        let options = Options {
            children: Some(128),
            ..no_flags()
        };
        let file = read(None).expect("no settings file is fine");
        assert!(file.clone().resolve(&options).is_err());
        assert_eq!(
            SettingsFile::V1 {
                workers: None,
                rounds: None,
                children: None,
                entities: None,
                scratch_size: None,
            },
            file,
        );
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        assert!(read(Some("definitely/not/a/settings.json".as_ref())).is_err());
    }
}

// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use bpaf::{batteries::verbose_by_slice, construct, long, OptionParser, Parser};
use tracing::level_filters::LevelFilter;

/// The command line options. Unset options fall back to the settings file,
/// and then to the defaults in [`settings`](crate::settings).
#[derive(Debug, Clone)]
pub struct Options {
    pub verbosity_level: LevelFilter,
    pub settings: Option<PathBuf>,
    pub workers: Option<usize>,
    pub rounds: Option<u32>,
    pub children: Option<u16>,
    pub entities: Option<usize>,
    pub scratch_size: Option<usize>,
}

pub fn options() -> OptionParser<Options> {
    let verbosity_level = verbose_by_slice(
        3,
        [
            LevelFilter::OFF,
            LevelFilter::ERROR,
            LevelFilter::WARN,
            LevelFilter::INFO,
            LevelFilter::DEBUG,
            LevelFilter::TRACE,
        ],
    );

    let settings = long("settings")
        .help("Reads defaults for the other options from a JSON settings file")
        .argument::<PathBuf>("FILE")
        .complete_shell(bpaf::ShellComp::File {
            mask: Some("*.json"),
        })
        .optional();

    let workers = long("workers")
        .help("Amount of task manager worker threads")
        .argument::<usize>("N")
        .optional();

    let rounds = long("rounds")
        .help("Amount of parent/children task graphs to run")
        .argument::<u32>("N")
        .optional();

    let children = long("children")
        .help("Amount of child tasks per task graph")
        .argument::<u16>("N")
        .optional();

    let entities = long("entities")
        .help("Amount of entities created per entity churn wave")
        .argument::<usize>("N")
        .optional();

    let scratch_size = long("scratch-size")
        .help("Size of the global scratch allocator")
        .argument::<usize>("BYTES")
        .optional();

    construct!(Options {
        verbosity_level,
        settings,
        workers,
        rounds,
        children,
        entities,
        scratch_size,
    })
    .to_options()
    .descr("Exercises the togo allocators, task manager and entity manager")
}

#[cfg(test)]
mod tests {
    use super::options;

    #[test]
    fn check_bpaf_invariants() {
        options().check_invariants(true);
    }

    #[test]
    fn flags_are_optional() {
        let parsed = options()
            .run_inner(&["--workers", "3", "-vv"])
            .expect("the arguments should parse");
        assert_eq!(Some(3), parsed.workers);
        assert_eq!(None, parsed.rounds);
        assert_eq!(tracing::level_filters::LevelFilter::TRACE, parsed.verbosity_level);
    }
}

// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;
mod scenarios;
mod settings;

use togo_core::memory;
use tracing::info;

use crate::settings::Settings;

fn main() -> anyhow::Result<()> {
    let options = cli::options().run();

    tracing_subscriber::fmt()
        .with_max_level(options.verbosity_level)
        .with_writer(std::io::stderr)
        .init();

    let settings = settings::read(options.settings.as_deref())?.resolve(&options)?;
    info!(?settings, "starting stress run");

    memory::init(settings.scratch_size);
    let result = run(&settings);
    memory::shutdown();
    result
}

fn run(settings: &Settings) -> anyhow::Result<()> {
    let report = scenarios::task_graph(settings.workers, settings.rounds, settings.children)?;
    info!(
        rounds = settings.rounds,
        tasks = report.tasks,
        elapsed = ?report.elapsed,
        "task graphs complete"
    );

    let report = scenarios::entity_churn(settings.entities)?;
    info!(
        waves = scenarios::ENTITY_WAVES,
        created = report.created,
        destroyed = report.destroyed,
        peak_alive = report.peak_alive,
        "entity churn complete"
    );

    Ok(())
}

// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use anyhow::{bail, ensure};
use togo_core::{
    collections::Array,
    memory::{self, TempAllocator},
    threading::{TaskId, TaskManager, TaskWork},
};
use togo_game::entity::{EntityId, EntityManager};
use tracing::debug;

/// How many create/destroy waves [`entity_churn`] runs.
pub const ENTITY_WAVES: u32 = 8;

static CHILDREN_RUN: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
pub struct TaskGraphReport {
    pub tasks: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct EntityReport {
    pub created: usize,
    pub destroyed: usize,
    pub peak_alive: usize,
}

fn run_child(_: TaskId, counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Runs `rounds` task graphs: a held empty parent with `children` children
/// of descending priority, released and waited on from this thread. Fails
/// if the parent ever completes before all of its children.
pub fn task_graph(workers: usize, rounds: u32, children: u16) -> anyhow::Result<TaskGraphReport> {
    let tm = TaskManager::new(workers, memory::default_allocator());
    let start = Instant::now();
    let mut tasks = 0;

    for round in 0..rounds {
        CHILDREN_RUN.store(0, Ordering::Relaxed);
        let parent = tm.add_hold_empty(0);
        for i in 0..children {
            let work = TaskWork::from_static(&CHILDREN_RUN, run_child);
            let child = tm.add_hold(work, children - i);
            tm.set_parent(child, parent);
            tm.end_hold(child);
        }
        tm.end_hold(parent);
        tm.wait(parent);

        let run = CHILDREN_RUN.load(Ordering::Relaxed);
        ensure!(
            run == children as usize,
            "round {round}: {run} of {children} children had run when the parent completed",
        );
        tasks += children as usize + 1;
        debug!(round, children, "task graph round complete");
    }

    Ok(TaskGraphReport {
        tasks,
        elapsed: start.elapsed(),
    })
}

/// Creates `entities` entities per wave, destroys about half of the live
/// ones, and checks that exactly the surviving ids are alive. Everything is
/// destroyed at the end.
pub fn entity_churn(entities: usize) -> anyhow::Result<EntityReport> {
    let mut em = EntityManager::new(memory::default_allocator());
    let temp = TempAllocator::<4096>::new();
    let mut live = Array::<EntityId>::new(&temp);
    let mut dead = Array::<EntityId>::new(&temp);
    let mut report = EntityReport {
        created: 0,
        destroyed: 0,
        peak_alive: 0,
    };

    for wave in 0..ENTITY_WAVES {
        for _ in 0..entities {
            live.push_back(em.create());
        }
        report.created += entities;
        report.peak_alive = report.peak_alive.max(em.num_alive());

        dead.clear();
        let mut i = 0;
        while i < live.len() {
            let id = live[i];
            em.destroy(id);
            dead.push_back(id);
            // Moves the last id here, which is skipped and survives the wave.
            live.remove_over(i);
            i += 1;
        }
        report.destroyed += dead.len();

        if let Some(id) = live.iter().find(|id| !em.alive(**id)) {
            bail!("wave {wave}: {id:?} should be alive");
        }
        if let Some(id) = dead.iter().find(|id| em.alive(**id)) {
            bail!("wave {wave}: {id:?} was destroyed but is still alive");
        }
        debug!(wave, alive = em.num_alive(), "entity wave complete");
    }

    for id in live.iter() {
        em.destroy(*id);
    }
    report.destroyed += live.len();
    live.clear();
    ensure!(
        em.num_alive() == 0,
        "{} entities alive after destroying all of them",
        em.num_alive(),
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use togo_core::{memory, test_support::expect_clean_exit};

    use super::{entity_churn, task_graph, ENTITY_WAVES};

    #[test]
    fn scenarios_pass() {
        expect_clean_exit(module_path!(), "scenarios_pass", || {
            memory::init_default();
            let report = task_graph(3, 5, 20).expect("task graphs should complete in order");
            assert_eq!(5 * 21, report.tasks);

            let report = entity_churn(1500).expect("entity liveness should be consistent");
            assert_eq!(1500 * ENTITY_WAVES as usize, report.created);
            assert_eq!(report.created, report.destroyed);
            memory::shutdown();
        });
    }

    #[test]
    fn task_graphs_run_without_workers() {
        expect_clean_exit(module_path!(), "task_graphs_run_without_workers", || {
            memory::init_default();
            task_graph(0, 2, 127).expect("the waiting thread should run every task");
            memory::shutdown();
        });
    }
}

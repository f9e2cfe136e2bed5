// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Task scheduling over a pool of worker threads.

mod task_manager;

pub use task_manager::{TaskId, TaskManager, TaskWork, NUM_TASKS};

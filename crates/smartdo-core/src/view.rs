//! Sorted, searched projections over the latest task snapshot, and the
//! view model that keeps one fed from a live subscription.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::{debug, instrument};

use crate::datetime::day_bounds;
use crate::error::GatewayError;
use crate::gateway::{Snapshot, Subscription, TaskGateway, TaskScope};
use crate::task::{Category, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    DueDate,
    Priority,
    #[default]
    CreatedDate,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::DueDate => "due",
            SortMode::Priority => "priority",
            SortMode::CreatedDate => "created",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "due" | "duedate" | "due_date" => Ok(SortMode::DueDate),
            "priority" | "pri" => Ok(SortMode::Priority),
            "created" | "createddate" | "created_date" | "date" => Ok(SortMode::CreatedDate),
            other => Err(anyhow!(
                "unknown sort mode: {other} (expected due, priority or created)"
            )),
        }
    }
}

/// Stable in-place sort.
pub fn sort_tasks(tasks: &mut [Task], mode: SortMode) {
    match mode {
        SortMode::DueDate => tasks.sort_by(|a, b| match (a.due_date, b.due_date) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }),
        SortMode::Priority => tasks.sort_by_key(|task| task.priority.rank()),
        SortMode::CreatedDate => tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}

/// Case-insensitive substring match on title or description. A blank
/// query keeps everything.
pub fn search_tasks(tasks: &[Task], query: &str) -> Vec<Task> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return tasks.to_vec();
    }
    tasks
        .iter()
        .filter(|task| task.mentions(&needle))
        .cloned()
        .collect()
}

/// Tasks due anywhere within `date` in the project timezone, bounds
/// inclusive.
pub fn tasks_due_on(tasks: &[Task], date: NaiveDate) -> anyhow::Result<Vec<Task>> {
    let (start, end) = day_bounds(date)?;
    Ok(tasks
        .iter()
        .filter(|task| task.is_due_within(start, end))
        .cloned()
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn scope(self) -> TaskScope {
        match self {
            CategoryFilter::All => TaskScope::All,
            CategoryFilter::Only(category) => TaskScope::Category(category),
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(CategoryFilter::All)
        } else {
            s.parse().map(CategoryFilter::Only)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatus {
    Loading,
    Empty,
    Ready(usize),
    Failed(String),
}

/// Latest snapshot plus the inputs that shape what is shown. The projection
/// is recomputed whenever any of them changes.
#[derive(Debug, Clone, Default)]
pub struct TaskView {
    snapshot: Snapshot,
    sort_mode: SortMode,
    search: String,
    projection: Vec<Task>,
}

impl TaskView {
    pub fn new(sort_mode: SortMode) -> Self {
        Self {
            sort_mode,
            ..Self::default()
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
        self.recompute();
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
        self.recompute();
    }

    pub fn set_search(&mut self, query: &str) {
        self.search = query.to_string();
        self.recompute();
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn projection(&self) -> &[Task] {
        &self.projection
    }

    pub fn status(&self) -> ViewStatus {
        match &self.snapshot {
            Snapshot::Loading => ViewStatus::Loading,
            Snapshot::Failed(message) => ViewStatus::Failed(message.clone()),
            Snapshot::Ready(_) if self.projection.is_empty() => ViewStatus::Empty,
            Snapshot::Ready(_) => ViewStatus::Ready(self.projection.len()),
        }
    }

    fn recompute(&mut self) {
        let mut projection = search_tasks(self.snapshot.tasks(), &self.search);
        sort_tasks(&mut projection, self.sort_mode);
        self.projection = projection;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Reopened,
    Completed,
    CompletedAndArchived,
}

/// Flips completion. Only the incomplete to complete direction consults
/// `confirm_archive`; accepting archives the task as well.
#[instrument(skip(gateway, task, confirm_archive), fields(id = %task.id))]
pub fn toggle_completion<F>(
    gateway: &TaskGateway,
    task: &Task,
    confirm_archive: F,
) -> Result<ToggleOutcome, GatewayError>
where
    F: FnOnce(&Task) -> bool,
{
    if task.is_completed {
        gateway.set_completed(&task.id, false)?;
        return Ok(ToggleOutcome::Reopened);
    }

    gateway.set_completed(&task.id, true)?;
    if confirm_archive(task) {
        gateway.archive(&task.id)?;
        Ok(ToggleOutcome::CompletedAndArchived)
    } else {
        Ok(ToggleOutcome::Completed)
    }
}

/// Owns one live subscription and the view it feeds.
pub struct TaskViewModel {
    gateway: Arc<TaskGateway>,
    state: Arc<Mutex<TaskView>>,
    scope: TaskScope,
    subscription: Option<Subscription>,
}

impl TaskViewModel {
    pub fn attach(gateway: Arc<TaskGateway>, scope: TaskScope, sort_mode: SortMode) -> Self {
        let mut model = Self {
            gateway,
            state: Arc::new(Mutex::new(TaskView::new(sort_mode))),
            scope: scope.clone(),
            subscription: None,
        };
        model.resubscribe(scope);
        model
    }

    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    /// Swaps the live query to the category's scope. The previous
    /// subscription is removed before the new one delivers.
    pub fn select_category(&mut self, filter: CategoryFilter) {
        self.resubscribe(filter.scope());
    }

    pub fn set_sort_mode(&self, mode: SortMode) {
        self.view().set_sort_mode(mode);
    }

    pub fn set_search(&self, query: &str) {
        self.view().set_search(query);
    }

    pub fn projection(&self) -> Vec<Task> {
        self.view().projection().to_vec()
    }

    pub fn status(&self) -> ViewStatus {
        self.view().status()
    }

    pub fn toggle_completion<F>(&self, task: &Task, confirm_archive: F) -> Result<ToggleOutcome, GatewayError>
    where
        F: FnOnce(&Task) -> bool,
    {
        toggle_completion(&self.gateway, task, confirm_archive)
    }

    fn resubscribe(&mut self, scope: TaskScope) {
        if let Some(previous) = self.subscription.take() {
            previous.cancel();
        }
        self.view().apply_snapshot(Snapshot::Loading);
        self.scope = scope.clone();

        let state = Arc::clone(&self.state);
        self.subscription = Some(self.gateway.subscribe(scope, move |snapshot| {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply_snapshot(snapshot);
        }));
        debug!(scope = ?self.scope, "view model subscribed");
    }

    fn view(&self) -> MutexGuard<'_, TaskView> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

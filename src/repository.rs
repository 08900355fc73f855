//! In-memory task repository shared by every connection handler

use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::task::{Task, TaskDraft, TaskId};

struct RepoState {
    tasks: BTreeMap<TaskId, Task>,
    // Always strictly greater than every id ever handed out
    next_id: TaskId,
}

/// Authoritative store of all tasks. Every operation runs under one lock, so
/// concurrent creates, deletes and updates never interleave.
pub struct TaskRepository {
    state: Mutex<RepoState>,
}

impl Default for TaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RepoState {
                tasks: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Returns the current counter value and advances it.
    pub fn next_id(&self) -> TaskId {
        let mut st = self.state.lock();
        let id = st.next_id;
        st.next_id += 1;
        id
    }

    pub fn insert(&self, task: Task) {
        let mut st = self.state.lock();
        if task.id >= st.next_id {
            st.next_id = task.id + 1;
        }
        st.tasks.insert(task.id, task);
    }

    /// Mint an id and insert the task in a single critical section.
    pub fn create(&self, draft: TaskDraft) -> Task {
        let mut st = self.state.lock();
        let id = st.next_id;
        st.next_id += 1;
        let task = Task::from_draft(id, draft);
        st.tasks.insert(id, task.clone());
        task
    }

    /// No-op when the id is absent.
    pub fn remove(&self, id: TaskId) -> bool {
        self.state.lock().tasks.remove(&id).is_some()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.state.lock().tasks.get(&id).cloned()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.state.lock().tasks.contains_key(&id)
    }

    /// Replace an existing record. Unknown ids are ignored: update never inserts.
    pub fn update(&self, task: Task) -> bool {
        let mut st = self.state.lock();
        match st.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    pub fn set_completed(&self, id: TaskId, completed: bool) -> bool {
        let mut st = self.state.lock();
        match st.tasks.get_mut(&id) {
            Some(task) => {
                task.completed = completed;
                true
            }
            None => false,
        }
    }

    pub fn mark_attachment(&self, id: TaskId) -> bool {
        let mut st = self.state.lock();
        match st.tasks.get_mut(&id) {
            Some(task) => {
                task.has_attachment = true;
                true
            }
            None => false,
        }
    }

    /// Independent copy of every task, in ascending id order.
    pub fn snapshot(&self) -> Vec<Task> {
        self.state.lock().tasks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extraction status
///
/// Stages a book goes through in the pipeline
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ExtractionStatus {
    /// Waiting for a worker
    Pending,
    /// Claimed by a worker, waiting for a blocking thread
    Reading,
    /// Reading page text, recognising identifiers and scoring
    Recognising,
    /// Appending the CSV row
    Writing,
    /// Done
    Completed,
    /// Failed, with the reason
    Failed(String),
}

/// Extraction task
///
/// One book file waiting for or going through extraction
#[derive(Clone, Debug)]
pub struct ExtractionTask {
    /// Position in the run, used as the task key
    pub task_id: usize,
    /// Book file
    pub file_path: PathBuf,
    /// Current status
    pub status: ExtractionStatus,
    /// Progress, 0.0 - 1.0
    pub progress: f32,
    /// When the task was queued
    pub created_at: DateTime<Utc>,
}

impl ExtractionTask {
    pub fn new(task_id: usize, file_path: PathBuf) -> Self {
        Self {
            task_id,
            file_path,
            status: ExtractionStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
        }
    }
}

/// Extraction queue
///
/// Pending tasks plus the tasks currently being worked on, with a cap on
/// how many may be active at once.
pub struct ExtractionQueue {
    /// Pending tasks
    tasks: Arc<Mutex<VecDeque<ExtractionTask>>>,
    /// Active tasks (task_id -> task)
    active_tasks: Arc<Mutex<HashMap<usize, ExtractionTask>>>,
    /// Maximum active tasks
    max_concurrent: usize,
}

impl ExtractionQueue {
    /// Create a queue
    ///
    /// # Arguments
    /// - `max_concurrent`: maximum active tasks; at least 1
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(VecDeque::new())),
            active_tasks: Arc::new(Mutex::new(HashMap::new())),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Add a task to the back of the queue
    pub fn enqueue(&self, task: ExtractionTask) -> Result<(), String> {
        let mut tasks = self.tasks.lock()
            .map_err(|e| format!("Failed to lock task queue: {}", e))?;
        tasks.push_back(task);
        Ok(())
    }

    /// Take the next task
    ///
    /// # Returns
    /// - Ok(Some(task)): a task to start
    /// - Ok(None): queue empty or at the concurrency cap
    /// - Err(msg): lock poisoned
    pub fn dequeue(&self) -> Result<Option<ExtractionTask>, String> {
        let mut tasks = self.tasks.lock()
            .map_err(|e| format!("Failed to lock task queue: {}", e))?;
        let active = self.active_tasks.lock()
            .map_err(|e| format!("Failed to lock active tasks: {}", e))?;

        if active.len() >= self.max_concurrent {
            return Ok(None);
        }

        Ok(tasks.pop_front())
    }

    /// Record a task as active
    pub fn mark_active(&self, mut task: ExtractionTask) -> Result<(), String> {
        let mut active = self.active_tasks.lock()
            .map_err(|e| format!("Failed to lock active tasks: {}", e))?;
        task.status = ExtractionStatus::Reading;
        active.insert(task.task_id, task);
        Ok(())
    }

    /// Remove a finished task from the active set
    pub fn mark_completed(&self, task_id: usize) -> Result<(), String> {
        let mut active = self.active_tasks.lock()
            .map_err(|e| format!("Failed to lock active tasks: {}", e))?;
        active.remove(&task_id);
        Ok(())
    }

    /// Snapshot of an active task
    pub fn get_status(&self, task_id: usize) -> Option<ExtractionTask> {
        let active = self.active_tasks.lock().ok()?;
        active.get(&task_id).cloned()
    }

    /// Update progress and status of an active task
    pub fn update_progress(&self, task_id: usize, progress: f32, status: ExtractionStatus) -> Result<(), String> {
        let mut active = self.active_tasks.lock()
            .map_err(|e| format!("Failed to lock active tasks: {}", e))?;

        if let Some(task) = active.get_mut(&task_id) {
            task.progress = progress;
            task.status = status;
        }

        Ok(())
    }

    /// Drop every pending task
    pub fn clear(&self) -> Result<usize, String> {
        let mut tasks = self.tasks.lock()
            .map_err(|e| format!("Failed to lock task queue: {}", e))?;
        let dropped = tasks.len();
        tasks.clear();
        Ok(dropped)
    }

    pub fn queue_size(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.active_tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_concurrent
    }

    /// Nothing pending and nothing active
    pub fn is_idle(&self) -> bool {
        self.queue_size() == 0 && self.active_count() == 0
    }
}

impl Default for ExtractionQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_task(task_id: usize) -> ExtractionTask {
        ExtractionTask::new(task_id, PathBuf::from(format!("/books/book{}.pdf", task_id)))
    }

    #[test]
    fn test_queue_creation() {
        let queue = ExtractionQueue::new(3);
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.active_count(), 0);
        assert!(queue.has_capacity());
        assert!(queue.is_idle());
    }

    #[test]
    fn test_zero_concurrency_is_raised_to_one() {
        let queue = ExtractionQueue::new(0);
        queue.enqueue(create_test_task(1)).unwrap();
        assert!(queue.dequeue().unwrap().is_some());
    }

    #[test]
    fn test_enqueue_dequeue() {
        let queue = ExtractionQueue::new(3);
        queue.enqueue(create_test_task(1)).unwrap();
        assert_eq!(queue.queue_size(), 1);

        let dequeued = queue.dequeue().unwrap().unwrap();
        assert_eq!(dequeued.task_id, 1);
        assert_eq!(dequeued.status, ExtractionStatus::Pending);
        assert_eq!(queue.queue_size(), 0);
    }

    #[test]
    fn test_concurrent_limit() {
        let queue = ExtractionQueue::new(2);
        for i in 1..=3 {
            queue.enqueue(create_test_task(i)).unwrap();
        }

        let task1 = queue.dequeue().unwrap().unwrap();
        queue.mark_active(task1).unwrap();
        let task2 = queue.dequeue().unwrap().unwrap();
        queue.mark_active(task2).unwrap();
        assert_eq!(queue.active_count(), 2);

        // At the cap: the third task stays queued
        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(queue.queue_size(), 1);
        assert!(!queue.is_idle());
    }

    #[test]
    fn test_mark_active_and_completed() {
        let queue = ExtractionQueue::new(3);
        queue.enqueue(create_test_task(1)).unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        queue.mark_active(task).unwrap();

        let status = queue.get_status(1).unwrap();
        assert_eq!(status.status, ExtractionStatus::Reading);
        assert!(queue.get_status(999).is_none());

        queue.mark_completed(1).unwrap();
        assert_eq!(queue.active_count(), 0);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_update_progress() {
        let queue = ExtractionQueue::new(3);
        queue.enqueue(create_test_task(1)).unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        queue.mark_active(task).unwrap();

        queue.update_progress(1, 0.5, ExtractionStatus::Recognising).unwrap();
        let status = queue.get_status(1).unwrap();
        assert_eq!(status.progress, 0.5);
        assert_eq!(status.status, ExtractionStatus::Recognising);

        // Unknown ids are ignored
        assert!(queue.update_progress(42, 1.0, ExtractionStatus::Completed).is_ok());
    }

    #[test]
    fn test_status_equality() {
        assert_ne!(ExtractionStatus::Pending, ExtractionStatus::Reading);
        assert_eq!(
            ExtractionStatus::Failed("timeout".to_string()),
            ExtractionStatus::Failed("timeout".to_string())
        );
    }

    #[test]
    fn test_has_capacity() {
        let queue = ExtractionQueue::new(2);
        for i in 1..=2 {
            queue.enqueue(create_test_task(i)).unwrap();
            let task = queue.dequeue().unwrap().unwrap();
            queue.mark_active(task).unwrap();
        }
        assert!(!queue.has_capacity());

        queue.mark_completed(1).unwrap();
        assert!(queue.has_capacity());
    }

    #[test]
    fn test_fifo_order_and_clear() {
        let queue = ExtractionQueue::new(3);
        for i in 1..=5 {
            queue.enqueue(create_test_task(i)).unwrap();
        }
        for i in 1..=2 {
            assert_eq!(queue.dequeue().unwrap().unwrap().task_id, i);
        }
        assert_eq!(queue.clear().unwrap(), 3);
        assert_eq!(queue.queue_size(), 0);
    }
}

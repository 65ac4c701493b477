use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::models::job::AnalysisJob;

/// In-memory FIFO task queue feeding the single drain loop.
///
/// `enqueue` never blocks; the drain loop is the only consumer, which is
/// what guarantees at most one in-flight analysis call. The mutex guards
/// bookkeeping only and is never held across an await point. Jobs are
/// not persisted; whatever is queued at process exit is lost.
pub struct TaskQueue {
    jobs: Mutex<VecDeque<AnalysisJob>>,
    wake: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
        }
    }

    /// Append a job and wake the drain loop if it is idle. Returns the
    /// job's 1-based queue position, for submitter feedback.
    pub fn enqueue(&self, job: AnalysisJob) -> usize {
        let position = {
            let mut jobs = self.jobs.lock().expect("queue mutex poisoned");
            jobs.push_back(job);
            jobs.len()
        };
        metrics::gauge!("diagnosis_queue_depth").set(position as f64);
        self.wake.notify_one();
        position
    }

    /// Take the oldest pending job, if any.
    pub fn pop(&self) -> Option<AnalysisJob> {
        let mut jobs = self.jobs.lock().expect("queue mutex poisoned");
        let job = jobs.pop_front();
        metrics::gauge!("diagnosis_queue_depth").set(jobs.len() as f64);
        job
    }

    /// Number of jobs waiting (excludes the job currently being processed).
    pub fn depth(&self) -> usize {
        self.jobs.lock().expect("queue mutex poisoned").len()
    }

    /// Wait until `enqueue` signals new work. A notification arriving
    /// between a failed `pop` and this call is not lost; `Notify` stores
    /// the permit.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::ChatRef;

    fn job(chat: i64, image_ref: &str) -> AnalysisJob {
        AnalysisJob::new(ChatRef(chat), image_ref)
    }

    #[test]
    fn enqueue_reports_one_based_position() {
        let queue = TaskQueue::new();
        assert_eq!(queue.enqueue(job(1, "a")), 1);
        assert_eq!(queue.enqueue(job(2, "b")), 2);
        assert_eq!(queue.enqueue(job(3, "c")), 3);
        assert_eq!(queue.depth(), 3);
    }

    #[test]
    fn pop_is_strict_fifo() {
        let queue = TaskQueue::new();
        for i in 0..5 {
            queue.enqueue(job(i, &format!("img-{i}")));
        }
        for i in 0..5 {
            assert_eq!(queue.pop().unwrap().image_ref, format!("img-{i}"));
        }
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn enqueue_wakes_an_idle_waiter() {
        let queue = std::sync::Arc::new(TaskQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.notified().await;
                queue.pop()
            })
        };
        tokio::task::yield_now().await;
        queue.enqueue(job(9, "late"));
        let popped = waiter.await.unwrap();
        assert_eq!(popped.unwrap().chat_ref, ChatRef(9));
    }

    #[tokio::test]
    async fn notification_between_pop_and_wait_is_not_lost() {
        let queue = TaskQueue::new();
        assert!(queue.pop().is_none());
        queue.enqueue(job(1, "a"));
        // Permit was stored; this must return immediately.
        queue.notified().await;
        assert!(queue.pop().is_some());
    }
}

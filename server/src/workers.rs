//! Worker thread management utilities.

use std::io;
use std::thread::{self, JoinHandle};

/// Handle to a spawned worker thread.
pub struct WorkerHandle<R> {
    pub handle: JoinHandle<R>,
    /// The worker ID (0-indexed)
    pub worker_id: usize,
}

/// Spawn `num_workers` named threads running `worker_fn(worker_id)`.
///
/// Threads are named `{name_prefix}-{id}`.
pub fn spawn_workers<F, R>(
    num_workers: usize,
    name_prefix: &str,
    worker_fn: F,
) -> io::Result<Vec<WorkerHandle<R>>>
where
    F: Fn(usize) -> R + Send + Clone + 'static,
    R: Send + 'static,
{
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let worker_fn = worker_fn.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", name_prefix, worker_id))
            .spawn(move || worker_fn(worker_id))?;

        handles.push(WorkerHandle { handle, worker_id });
    }

    Ok(handles)
}

/// Wait for all worker threads to complete.
///
/// A worker that panicked is reported as `None`.
pub fn join_workers<R>(handles: Vec<WorkerHandle<R>>) -> Vec<Option<R>> {
    handles
        .into_iter()
        .map(|h| match h.handle.join() {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::error!(worker = h.worker_id, "worker thread panicked");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_join() {
        let handles = spawn_workers(3, "test", |id| {
            (id, thread::current().name().map(str::to_owned))
        })
        .unwrap();

        let results = join_workers(handles);
        assert_eq!(results.len(), 3);
        for (id, result) in results.into_iter().enumerate() {
            let (worker_id, name) = result.unwrap();
            assert_eq!(worker_id, id);
            assert_eq!(name, Some(format!("test-{}", id)));
        }
    }
}

//! A queue for running work on the game's main execution context.
//!
//! Background threads must not touch the book UI or the content cache directly. Instead they
//! enqueue a closure here, and the queue is drained from our detour on the game's per-frame tick
//! function, which always runs on the main context.

use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::call_original;

type Task = Box<dyn FnOnce() + Send>;

static QUEUE: Lazy<Mutex<Vec<Task>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Queues `task` to run on the main context during the next game tick. Safe to call from any
/// thread.
pub fn enqueue(task: impl FnOnce() + Send + 'static) {
    QUEUE.lock().unwrap().push(Box::new(task));
}

fn process_pending() {
    // Take the tasks out under the lock, but run them after releasing it so a task can enqueue
    // more work without deadlocking.
    let tasks: Vec<Task> = std::mem::take(&mut *QUEUE.lock().unwrap());

    for task in tasks {
        task();
    }
}

fn game_tick() {
    process_pending();
    call_original!(crate::targets::game_tick);
}

pub fn init() {
    crate::targets::game_tick::install(game_tick);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The queue is global, so these tests must not interleave.
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn tasks_run_in_order_and_once() {
        let _serial = SERIAL.lock().unwrap();
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            enqueue(move || log.lock().unwrap().push(i));
        }

        process_pending();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);

        process_pending();
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn tasks_can_enqueue_tasks() {
        let _serial = SERIAL.lock().unwrap();
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));

        {
            let log = log.clone();
            enqueue(move || {
                let inner = log.clone();
                log.lock().unwrap().push("outer");
                enqueue(move || inner.lock().unwrap().push("inner"));
            });
        }

        process_pending();
        process_pending();

        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }
}

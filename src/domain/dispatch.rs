//! Background execution of node logic for asynchronous runs.
//!
//! Jobs run on a private rayon pool. A finished job parks its result in a
//! completion slot keyed by node id; the state machine collects it on the
//! node's next visit. The slots are the only state written off the driver
//! thread.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::error::{EvalError, TradeflowError};
use crate::domain::node::{LogicOutcome, NodeId};

pub type LogicResult = Result<LogicOutcome, EvalError>;

#[derive(Default)]
struct Slots {
    in_flight: HashSet<NodeId>,
    finished: HashMap<NodeId, LogicResult>,
}

#[derive(Default)]
struct Shared {
    slots: Mutex<Slots>,
    idle: Condvar,
}

pub struct AsyncDispatcher {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
}

impl AsyncDispatcher {
    pub fn new(workers: usize) -> Result<Self, TradeflowError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tradeflow-logic-{}", i))
            .build()
            .map_err(|e| TradeflowError::ConfigInvalid {
                section: "run".into(),
                key: "async_workers".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pool,
            shared: Arc::new(Shared::default()),
        })
    }

    /// Returns false without spawning when `node_id` already has a job in
    /// flight or an uncollected result.
    pub fn dispatch<F>(&self, node_id: NodeId, job: F) -> bool
    where
        F: FnOnce() -> LogicResult + Send + 'static,
    {
        {
            let mut slots = self.shared.slots.lock();
            if slots.in_flight.contains(&node_id) || slots.finished.contains_key(&node_id) {
                warn!(node_id = %node_id, "logic already in flight, not dispatched");
                return false;
            }
            slots.in_flight.insert(node_id.clone());
        }

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || {
            let result = run_guarded(&node_id, job);
            debug!(node_id = %node_id, ok = result.is_ok(), "background logic finished");
            let mut slots = shared.slots.lock();
            slots.in_flight.remove(&node_id);
            slots.finished.insert(node_id, result);
            if slots.in_flight.is_empty() {
                shared.idle.notify_all();
            }
        });
        true
    }

    /// Removes and returns the finished result for `node_id`, if any.
    pub fn take(&self, node_id: &NodeId) -> Option<LogicResult> {
        self.shared.slots.lock().finished.remove(node_id)
    }

    pub fn is_in_flight(&self, node_id: &NodeId) -> bool {
        self.shared.slots.lock().in_flight.contains(node_id)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.slots.lock().in_flight.len()
    }

    /// Blocks until no job is running. Finished results stay parked.
    pub fn wait_idle(&self) {
        let mut slots = self.shared.slots.lock();
        while !slots.in_flight.is_empty() {
            self.shared.idle.wait(&mut slots);
        }
    }
}

/// Runs node logic, converting a panic into an [`EvalError`].
pub fn run_guarded<F>(node_id: &NodeId, job: F) -> LogicResult
where
    F: FnOnce() -> LogicResult,
{
    catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(EvalError::LogicPanicked {
            node_id: node_id.clone(),
            reason,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn completion_is_parked_until_taken() {
        let dispatcher = AsyncDispatcher::new(2).unwrap();
        let node = NodeId::from("entry");
        assert!(dispatcher.dispatch(node.clone(), || Ok(LogicOutcome::completed())));
        dispatcher.wait_idle();
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(dispatcher.take(&node), Some(Ok(LogicOutcome::completed())));
        assert_eq!(dispatcher.take(&node), None);
    }

    #[test]
    fn second_dispatch_for_same_node_is_refused() {
        let dispatcher = AsyncDispatcher::new(1).unwrap();
        let node = NodeId::from("exit");
        let (release_tx, release_rx) = mpsc::channel::<()>();

        assert!(dispatcher.dispatch(node.clone(), move || {
            release_rx.recv_timeout(Duration::from_secs(5)).ok();
            Ok(LogicOutcome::not_completed())
        }));
        assert!(dispatcher.is_in_flight(&node));
        assert!(!dispatcher.dispatch(node.clone(), || Ok(LogicOutcome::completed())));

        release_tx.send(()).unwrap();
        dispatcher.wait_idle();
        // Uncollected result still blocks a new dispatch.
        assert!(!dispatcher.dispatch(node.clone(), || Ok(LogicOutcome::completed())));
        assert_eq!(dispatcher.take(&node), Some(Ok(LogicOutcome::not_completed())));
        assert!(dispatcher.dispatch(node, || Ok(LogicOutcome::completed())));
        dispatcher.wait_idle();
    }

    #[test]
    fn panics_become_errors() {
        let node = NodeId::from("boom");
        let result = run_guarded(&node, || panic!("bad state"));
        assert_eq!(
            result,
            Err(EvalError::LogicPanicked {
                node_id: node,
                reason: "bad state".into(),
            })
        );
    }
}

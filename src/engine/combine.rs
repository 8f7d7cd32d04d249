//! A small combine-latest adapter over `watch::Receiver<Event>`
//! sources (design note §9(b)): holds the most recent value seen from
//! each source and hands back a full snapshot whenever any one of them
//! changes.
//!
//! Grounded directly on the teacher's own fan-in idiom in
//! `orchestrator/orchestrator.rs`'s `JobTask::perform_receive`, which
//! holds a `HashMap<Uuid, Vec<Artifact>>` of what has arrived so far
//! and keeps receiving until every dependency is present. This adapter
//! generalizes that "keep a slot per source, update on arrival" shape
//! to hold an `Event` per source instead of a terminal artifact, so a
//! later `RETRY` can still flow through the same slot.

use tokio::sync::{mpsc, watch};

use crate::event::Event;

/// Forwards every change from a set of `watch` subjects into one
/// ordered snapshot, analogous to RxJS's `combineLatest`.
pub struct CombineLatest {
    latest: Vec<Event>,
    rx: mpsc::Receiver<(usize, Event)>,
    _forwarders: Vec<tokio::task::JoinHandle<()>>,
}

impl CombineLatest {
    /// Spawn one forwarder task per source; each copies the source's
    /// current value into a shared channel whenever it changes.
    /// `capacity` sizes the internal `mpsc` fan-in (see
    /// [`crate::config::EngineConfig::combine_channel_capacity`]).
    pub fn spawn(sources: Vec<watch::Receiver<Event>>, capacity: usize) -> Self {
        let latest: Vec<Event> = sources.iter().map(|s| s.borrow().clone()).collect();
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let mut forwarders = Vec::with_capacity(sources.len());
        for (idx, mut source) in sources.into_iter().enumerate() {
            let tx = tx.clone();
            forwarders.push(tokio::spawn(async move {
                loop {
                    match source.changed().await {
                        Ok(()) => {
                            let event = source.borrow_and_update().clone();
                            if tx.send((idx, event)).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            }));
        }
        drop(tx);

        CombineLatest { latest, rx, _forwarders: forwarders }
    }

    /// The current snapshot, one entry per source, in source order.
    pub fn latest(&self) -> &[Event] {
        &self.latest
    }

    /// Wait for the next change from any source, fold it into the
    /// snapshot, and return the updated snapshot. Returns `None` once
    /// every source's sender has been dropped (the upstream/parent
    /// node has torn down).
    pub async fn next(&mut self) -> Option<&[Event]> {
        match self.rx.recv().await {
            Some((idx, event)) => {
                self.latest[idx] = event;
                Some(&self.latest)
            }
            None => None,
        }
    }
}

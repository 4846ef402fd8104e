use std::collections::{HashMap, HashSet, VecDeque};

use super::RequestId;
use crate::record::RecordId;

/// Per-identity lanes of mutating requests.
///
/// A request may go out once it heads the lane of every identity it
/// touches. Releasing it lets the next request in each lane through.
#[derive(Debug, Default)]
pub struct IdentityQueue {
    lanes: HashMap<RecordId, VecDeque<RequestId>>,
    claims: HashMap<RequestId, Vec<RecordId>>,
    ready: HashSet<RequestId>,
}

impl IdentityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `request` behind any request already holding one of `ids`.
    /// Returns true when it may be sent right away.
    pub fn enqueue(&mut self, request: RequestId, ids: &[RecordId]) -> bool {
        for id in ids {
            self.lanes.entry(id.clone()).or_default().push_back(request);
        }
        self.claims.insert(request, ids.to_vec());

        if self.heads_all_lanes(request) {
            self.ready.insert(request);
            true
        } else {
            false
        }
    }

    /// Drop `request` from its lanes, whether it was sent or still waiting.
    /// Returns the requests that became ready, in lane order.
    pub fn release(&mut self, request: RequestId) -> Vec<RequestId> {
        self.ready.remove(&request);
        let Some(ids) = self.claims.remove(&request) else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for id in &ids {
            if let Some(lane) = self.lanes.get_mut(id) {
                lane.retain(|queued| *queued != request);
                match lane.front() {
                    Some(next) => candidates.push(*next),
                    None => {
                        self.lanes.remove(id);
                    }
                }
            }
        }

        let mut unblocked = Vec::new();
        for candidate in candidates {
            if !self.ready.contains(&candidate) && self.heads_all_lanes(candidate) {
                self.ready.insert(candidate);
                unblocked.push(candidate);
            }
        }
        unblocked
    }

    /// Move the lane of `from` onto `to` once the record behind it has been
    /// keyed by the server. Moved requests keep their order and go ahead of
    /// any already queued on `to`.
    pub fn rename(&mut self, from: &RecordId, to: &RecordId) {
        let Some(moved) = self.lanes.remove(from) else {
            return;
        };
        for request in &moved {
            if let Some(ids) = self.claims.get_mut(request) {
                for id in ids.iter_mut().filter(|id| **id == *from) {
                    *id = to.clone();
                }
            }
        }
        let lane = self.lanes.entry(to.clone()).or_default();
        for request in moved.into_iter().rev() {
            lane.push_front(request);
        }
    }

    /// The request currently allowed to touch `id`.
    pub fn holder(&self, id: &RecordId) -> Option<RequestId> {
        self.lanes.get(id).and_then(|lane| lane.front().copied())
    }

    pub fn is_waiting(&self, request: RequestId) -> bool {
        self.claims.contains_key(&request) && !self.ready.contains(&request)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    fn heads_all_lanes(&self, request: RequestId) -> bool {
        self.claims.get(&request).is_some_and(|ids| {
            ids.iter()
                .all(|id| self.holder(id).map_or(true, |front| front == request))
        })
    }
}

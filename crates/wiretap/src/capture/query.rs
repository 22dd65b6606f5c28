//! The single active capture query.

use crate::exchange::Exchange;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Why a waiter was released before its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseReason {
    Satisfied,
    Replaced,
    Reset,
}

impl ReleaseReason {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Satisfied => "satisfied",
            ReleaseReason::Replaced => "replaced",
            ReleaseReason::Reset => "reset",
        }
    }
}

#[derive(Debug)]
pub(crate) struct Release {
    pub results: Vec<Arc<Exchange>>,
    pub reason: ReleaseReason,
}

/// Match criteria of a wait.
#[derive(Debug, Clone)]
pub(crate) struct Criteria {
    /// `base_url + path`, compared verbatim.
    pub url: String,
    pub method: String,
    pub since: DateTime<Utc>,
    pub required: usize,
}

impl Criteria {
    pub fn accepts(&self, exchange: &Exchange) -> bool {
        exchange.matches(&self.url, &self.method, self.since)
    }

    /// Walk the log head to tail, stopping at `required` matches or at the first
    /// exchange that started before `since`.
    pub fn prescan(&self, log: &VecDeque<Arc<Exchange>>) -> Vec<Arc<Exchange>> {
        let mut found = Vec::new();
        for exchange in log {
            if found.len() >= self.required || exchange.start_time() < self.since {
                break;
            }
            if self.accepts(exchange) {
                found.push(Arc::clone(exchange));
            }
        }
        found
    }
}

pub(crate) struct ActiveQuery {
    pub generation: u64,
    pub criteria: Criteria,
    /// Most recent match first.
    pub results: Vec<Arc<Exchange>>,
    waiter: oneshot::Sender<Release>,
}

impl ActiveQuery {
    pub fn new(
        generation: u64,
        criteria: Criteria,
        seed: Vec<Arc<Exchange>>,
        waiter: oneshot::Sender<Release>,
    ) -> Self {
        Self {
            generation,
            criteria,
            results: seed,
            waiter,
        }
    }

    /// Offer a freshly appended exchange. Returns true once the query holds
    /// `required` results.
    pub fn offer(&mut self, exchange: &Arc<Exchange>) -> bool {
        if self.is_satisfied() {
            return true;
        }
        if self.criteria.accepts(exchange) {
            self.results.insert(0, Arc::clone(exchange));
        }
        self.is_satisfied()
    }

    pub fn is_satisfied(&self) -> bool {
        self.results.len() >= self.criteria.required
    }

    /// Wake the waiter with the accumulated results.
    pub fn release(self, reason: ReleaseReason) {
        let _ = self.waiter.send(Release {
            results: self.results,
            reason,
        });
    }
}

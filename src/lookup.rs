//! Iterative lookup.
//!
//! A lookup runs in rounds. Each round sends the lookup's request to every candidate, at most
//! `alpha` at a time, then merges the replies into the candidate set for the next round: peers
//! that failed are dropped, the returned peers are added, and the result is sorted by distance to
//! the target and cut down to the `k` closest. The lookup ends when a round leaves the candidate
//! set unchanged, or as soon as any peer returns the value being looked for.

use crate::{
    config::Config,
    id::NodeId,
    routing::node::{self, NodeHandle},
    rpc::{FindValueReply, Rpc, RpcError},
};
use futures_util::{stream::FuturesUnordered, StreamExt};
use std::collections::HashSet;
use tokio::sync::Semaphore;

/// Remote procedure a lookup sends to each candidate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum QueryKind {
    FindNode,
    FindValue,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RoundOutcome {
    /// Candidates for the next round.
    Candidates(Vec<NodeHandle>),
    /// A peer returned the value. The remaining requests of the round were cancelled.
    ValueFound(Vec<u8>),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LookupOutcome {
    /// No round improved on the previous one. Holds the closest nodes found.
    Converged(Vec<NodeHandle>),
    ValueFound(Vec<u8>),
}

pub(crate) struct Lookup<'a, R: ?Sized> {
    rpc: &'a R,
    this_node_id: NodeId,
    target: NodeId,
    kind: QueryKind,
    k: usize,
    max_rounds: usize,
    // Shared by all rounds of this lookup only.
    permits: Semaphore,
}

impl<'a, R: Rpc + ?Sized> Lookup<'a, R> {
    pub fn new(rpc: &'a R, config: &Config, target: NodeId, kind: QueryKind) -> Self {
        Self {
            rpc,
            this_node_id: config.node_id,
            target,
            kind,
            k: config.k,
            max_rounds: config.max_lookup_rounds,
            permits: Semaphore::new(config.alpha),
        }
    }

    /// Run rounds starting from `candidates` until the candidate set stops changing or the value
    /// is found.
    pub async fn run(&self, mut candidates: Vec<NodeHandle>) -> LookupOutcome {
        for round in 1..=self.max_rounds {
            let next = match self.round(&candidates).await {
                RoundOutcome::ValueFound(value) => {
                    log::debug!(
                        "{:?} lookup for {:?} found the value in round {}",
                        self.kind,
                        self.target,
                        round
                    );
                    return LookupOutcome::ValueFound(value);
                }
                RoundOutcome::Candidates(next) => next,
            };

            if next == candidates {
                log::debug!(
                    "{:?} lookup for {:?} converged after {} rounds with {} nodes",
                    self.kind,
                    self.target,
                    round,
                    next.len()
                );
                return LookupOutcome::Converged(next);
            }

            candidates = next;
        }

        log::warn!(
            "{:?} lookup for {:?} did not converge within {} rounds",
            self.kind,
            self.target,
            self.max_rounds
        );

        LookupOutcome::Converged(candidates)
    }

    /// Query every candidate once and merge the replies.
    pub async fn round(&self, candidates: &[NodeHandle]) -> RoundOutcome {
        let mut queries: FuturesUnordered<_> =
            candidates.iter().map(|node| self.query(node)).collect();

        let mut next = candidates.to_vec();
        let mut unreachable = HashSet::new();

        while let Some((node, reply)) = queries.next().await {
            match reply {
                // Returning drops `queries`, which cancels the requests still in flight.
                Ok(FindValueReply::Value(value)) => return RoundOutcome::ValueFound(value),
                Ok(FindValueReply::Nodes(nodes)) => next.extend(nodes),
                Err(error) => {
                    log::debug!("{:?} request to {:?} failed: {}", self.kind, node, error);
                    unreachable.insert(node.id);
                }
            }
        }

        next.retain(|node| node.id != self.this_node_id && !unreachable.contains(&node.id));
        // Equal ids are equally distant, so duplicates end up adjacent. The sort is stable and
        // the first copy (with the address we already knew) is kept.
        node::sort_by_distance(&mut next, self.target);
        next.dedup();
        next.truncate(self.k);

        RoundOutcome::Candidates(next)
    }

    async fn query(&self, node: &NodeHandle) -> (NodeHandle, Result<FindValueReply, RpcError>) {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return (*node, Err(RpcError::Shutdown)),
        };

        let reply = match self.kind {
            QueryKind::FindNode => self
                .rpc
                .find_node(node, self.target)
                .await
                .map(FindValueReply::Nodes),
            QueryKind::FindValue => self.rpc.find_value(node, self.target).await,
        };

        (*node, reply)
    }
}

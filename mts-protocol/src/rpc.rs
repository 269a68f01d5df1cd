//! RPC-id allocation and request building.

use crate::message::{Envelope, NodeId, Route};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};

/// Lifetime of the correlation counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcIdScope {
    /// One counter for the lifetime of the engine.
    #[default]
    Engine,
    /// Counter restarts at 1 on every new connection.
    Connection,
}

/// Monotonic correlation-id sequence.
///
/// Ids start at 1 and wrap from `i32::MAX` back to 1. OPL requests always
/// get id 0 and never advance the counter.
#[derive(Debug, Default)]
pub struct RpcIdAllocator {
    last: AtomicI32,
}

impl RpcIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the sequence so that the next id is `last + 1`.
    pub fn starting_after(last: i32) -> Self {
        Self {
            last: AtomicI32::new(last),
        }
    }

    /// Returns the id for the next request on `route`.
    pub fn next_for(&self, route: Route) -> i32 {
        if route == Route::Opl {
            return 0;
        }
        self.next()
    }

    fn next(&self) -> i32 {
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(if last == i32::MAX { 1 } else { last + 1 })
            })
            .unwrap_or_else(|prev| prev);
        if prev == i32::MAX {
            1
        } else {
            prev + 1
        }
    }

    /// Last id handed out (0 before the first request).
    pub fn last(&self) -> i32 {
        self.last.load(Ordering::SeqCst)
    }

    /// Restarts the sequence at 1.
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }

    /// Builds a request envelope with the next id for `route`.
    pub fn build_request(
        &self,
        route: Route,
        src_id: NodeId,
        dst_id: NodeId,
        data: Vec<u8>,
    ) -> Envelope {
        Envelope::request(route, src_id, dst_id, self.next_for(route), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sequence_starts_at_one() {
        let ids = RpcIdAllocator::new();
        assert_eq!(ids.last(), 0);
        assert_eq!(ids.next_for(Route::Login), 1);
        assert_eq!(ids.next_for(Route::RmsPing), 2);
        assert_eq!(ids.next_for(Route::Firmware), 3);
        assert_eq!(ids.last(), 3);
    }

    #[test]
    fn test_opl_always_zero() {
        let ids = RpcIdAllocator::new();
        assert_eq!(ids.next_for(Route::Login), 1);
        assert_eq!(ids.next_for(Route::Opl), 0);
        assert_eq!(ids.next_for(Route::Opl), 0);
        assert_eq!(ids.next_for(Route::Login), 2);
    }

    #[test]
    fn test_wraps_to_one() {
        let ids = RpcIdAllocator::starting_after(i32::MAX - 1);
        assert_eq!(ids.next_for(Route::Login), i32::MAX);
        assert_eq!(ids.next_for(Route::Login), 1);
        assert_eq!(ids.next_for(Route::Login), 2);
    }

    #[test]
    fn test_reset() {
        let ids = RpcIdAllocator::new();
        ids.next_for(Route::Login);
        ids.next_for(Route::Login);
        ids.reset();
        assert_eq!(ids.next_for(Route::Login), 1);
    }

    #[test]
    fn test_build_request() {
        let ids = RpcIdAllocator::new();
        let env = ids.build_request(Route::Login, 2, 1, b"{}".to_vec());
        assert_eq!(env.rpc_id, 1);
        assert!(!env.reply);
        assert!(!env.is_error);
        assert_eq!((env.src_id, env.dst_id), (2, 1));

        let opl = ids.build_request(Route::Opl, 2, 1, vec![]);
        assert_eq!(opl.rpc_id, 0);
        assert_eq!(ids.last(), 1);
    }

    #[test]
    fn test_scope_serde() {
        assert_eq!(
            serde_json::to_string(&RpcIdScope::Connection).unwrap(),
            "\"connection\""
        );
        assert_eq!(RpcIdScope::default(), RpcIdScope::Engine);
    }

    proptest! {
        #[test]
        fn prop_ids_are_sequential(routes in proptest::collection::vec(0i32..15, 1..200)) {
            let ids = RpcIdAllocator::new();
            let mut expected = 0;
            for code in routes {
                let route = Route::from(code);
                let id = ids.next_for(route);
                if route == Route::Opl {
                    prop_assert_eq!(id, 0);
                } else {
                    expected += 1;
                    prop_assert_eq!(id, expected);
                }
            }
        }
    }
}

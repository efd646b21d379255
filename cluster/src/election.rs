//! Deterministic leader election.
//!
//! The leader is a pure function of the membership view: the lexicographic
//! minimum over all known node ids, self included. Any two nodes with the
//! same view compute the same leader without exchanging a single election
//! message. A dropped heartbeat can delay convergence of the view, but can
//! never leave two agreeing views with different leaders.

use crate::peer::NodeId;

/// Compute the leader for the view {local} ∪ peers.
///
/// Total order is lexicographic on the id; the minimum wins. The policy must
/// be byte-identical on every node, so callers must not normalize ids.
pub fn compute_leader<'a, I>(local_id: &'a NodeId, peers: I) -> &'a NodeId
where
    I: IntoIterator<Item = &'a NodeId>,
{
    peers
        .into_iter()
        .fold(local_id, |best, id| if id < best { id } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<NodeId> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_alone_means_leader() {
        let local = "solo".to_string();
        assert_eq!(compute_leader(&local, []), "solo");
    }

    #[test]
    fn test_minimum_wins() {
        let local = "charlie".to_string();
        let peers = ids(&["delta", "alpha", "bravo"]);
        assert_eq!(compute_leader(&local, peers.iter()), "alpha");
    }

    #[test]
    fn test_self_can_win() {
        let local = "aardvark".to_string();
        let peers = ids(&["bravo", "charlie"]);
        assert_eq!(compute_leader(&local, peers.iter()), "aardvark");
    }

    #[test]
    fn test_identical_views_agree() {
        // Every node computes the same leader from the same member set,
        // regardless of which member it is.
        let members = ids(&["n-04", "n-01", "n-09", "n-02"]);
        for local in &members {
            let peers: Vec<&NodeId> = members.iter().filter(|m| *m != local).collect();
            assert_eq!(compute_leader(local, peers.into_iter()), "n-01");
        }
    }

    #[test]
    fn test_order_of_peers_is_irrelevant() {
        let local = "x".to_string();
        let forward = ids(&["c", "a", "b"]);
        let reverse = ids(&["b", "a", "c"]);
        assert_eq!(
            compute_leader(&local, forward.iter()),
            compute_leader(&local, reverse.iter()),
        );
    }
}

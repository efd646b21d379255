//! Leader-side partition planning.
//!
//! Planning is a pure function of the membership snapshot so the leader can
//! rebuild the same plan from the same view at any time. Delivery is the
//! caller's problem.

use crate::errors::{ClusterError, Result};
use crate::peer::NodeId;
use serde::{Deserialize, Serialize};

/// One cluster member as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub node_id: NodeId,
    /// Declared memory capacity. `None` when the node never declared one.
    pub memory_bytes: Option<u64>,
}

impl Member {
    pub fn new(node_id: impl Into<NodeId>, memory_bytes: Option<u64>) -> Self {
        Self {
            node_id: node_id.into(),
            memory_bytes,
        }
    }
}

/// One slice of the model workload, assigned to a single member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    /// Zero-based index of this slice within the plan
    pub partition_id: usize,
    /// How many slices the plan contains in total
    pub total_partitions: usize,
    /// Fraction of the workload this slice covers, in (0, 1]
    pub size_share: f64,
    /// Node id the slice is assigned to
    pub assigned_to: NodeId,
}

/// Build a partition plan for the given members.
///
/// Members are ordered by node id before assignment, so a given member set
/// always yields the same plan. Shares are proportional to declared memory
/// when every member declares a nonzero capacity; any missing or zero
/// declaration drops the whole plan back to an equal split, since weighting
/// some members and guessing at others would starve the undeclared ones.
pub fn plan_partitions(members: &[Member]) -> Result<Vec<Partition>> {
    if members.is_empty() {
        return Err(ClusterError::EmptyMemberSet);
    }

    let mut ordered: Vec<&Member> = members.iter().collect();
    ordered.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    let total = ordered.len();
    let all_declared = ordered
        .iter()
        .all(|m| m.memory_bytes.map_or(false, |b| b > 0));

    let plan = if all_declared {
        let total_memory: u64 = ordered.iter().map(|m| m.memory_bytes.unwrap_or(0)).sum();
        ordered
            .iter()
            .enumerate()
            .map(|(i, m)| Partition {
                partition_id: i,
                total_partitions: total,
                size_share: m.memory_bytes.unwrap_or(0) as f64 / total_memory as f64,
                assigned_to: m.node_id.clone(),
            })
            .collect()
    } else {
        let share = 1.0 / total as f64;
        ordered
            .iter()
            .enumerate()
            .map(|(i, m)| Partition {
                partition_id: i,
                total_partitions: total,
                size_share: share,
                assigned_to: m.node_id.clone(),
            })
            .collect()
    };

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares_sum(plan: &[Partition]) -> f64 {
        plan.iter().map(|p| p.size_share).sum()
    }

    #[test]
    fn test_empty_member_set_rejected() {
        assert!(matches!(
            plan_partitions(&[]),
            Err(ClusterError::EmptyMemberSet)
        ));
    }

    #[test]
    fn test_single_member_owns_everything() {
        let plan = plan_partitions(&[Member::new("only", None)]).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].partition_id, 0);
        assert_eq!(plan[0].total_partitions, 1);
        assert_eq!(plan[0].size_share, 1.0);
        assert_eq!(plan[0].assigned_to, "only");
    }

    #[test]
    fn test_equal_split_without_capacity() {
        let members = vec![
            Member::new("a", None),
            Member::new("b", None),
            Member::new("c", None),
            Member::new("d", None),
        ];
        let plan = plan_partitions(&members).unwrap();
        assert_eq!(plan.len(), 4);
        for p in &plan {
            assert_eq!(p.size_share, 0.25);
            assert_eq!(p.total_partitions, 4);
        }
        assert!((shares_sum(&plan) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_proportional_split_with_full_capacity() {
        let members = vec![
            Member::new("a", Some(8_000_000_000)),
            Member::new("b", Some(16_000_000_000)),
            Member::new("c", Some(8_000_000_000)),
        ];
        let plan = plan_partitions(&members).unwrap();
        assert_eq!(plan[0].size_share, 0.25);
        assert_eq!(plan[1].size_share, 0.5);
        assert_eq!(plan[2].size_share, 0.25);
        assert!((shares_sum(&plan) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_capacity_falls_back_to_equal() {
        let members = vec![
            Member::new("a", Some(32_000_000_000)),
            Member::new("b", None),
        ];
        let plan = plan_partitions(&members).unwrap();
        assert_eq!(plan[0].size_share, 0.5);
        assert_eq!(plan[1].size_share, 0.5);
    }

    #[test]
    fn test_zero_capacity_treated_as_undeclared() {
        let members = vec![
            Member::new("a", Some(8_000_000_000)),
            Member::new("b", Some(0)),
        ];
        let plan = plan_partitions(&members).unwrap();
        assert_eq!(plan[0].size_share, 0.5);
        assert_eq!(plan[1].size_share, 0.5);
    }

    #[test]
    fn test_plan_is_ordered_by_node_id() {
        let members = vec![
            Member::new("zulu", None),
            Member::new("alpha", None),
            Member::new("mike", None),
        ];
        let plan = plan_partitions(&members).unwrap();
        assert_eq!(plan[0].assigned_to, "alpha");
        assert_eq!(plan[1].assigned_to, "mike");
        assert_eq!(plan[2].assigned_to, "zulu");
    }

    #[test]
    fn test_same_members_same_plan() {
        let forward = vec![
            Member::new("a", Some(4_000_000_000)),
            Member::new("b", Some(12_000_000_000)),
        ];
        let reverse: Vec<Member> = forward.iter().rev().cloned().collect();
        assert_eq!(
            plan_partitions(&forward).unwrap(),
            plan_partitions(&reverse).unwrap()
        );
    }

    #[test]
    fn test_partition_wire_shape() {
        let plan = plan_partitions(&[Member::new("n1", None), Member::new("n2", None)]).unwrap();
        let json = serde_json::to_value(&plan[1]).unwrap();
        assert_eq!(json["partitionId"], 1);
        assert_eq!(json["totalPartitions"], 2);
        assert_eq!(json["sizeShare"], 0.5);
        assert_eq!(json["assignedTo"], "n2");
    }
}

//! Partition assignment strategies chosen by the group's agreed protocol
//! (spec §4.6: "range, round-robin, or sticky").

use lumadb_common::PartitionId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStrategy {
    Range,
    RoundRobin,
    /// Round-robin that keeps each member's previously-owned partitions
    /// where possible, to minimize churn across rebalances.
    Sticky,
}

impl AssignmentStrategy {
    #[must_use]
    pub fn from_protocol_name(name: &str) -> Self {
        match name {
            "range" => Self::Range,
            "sticky" => Self::Sticky,
            _ => Self::RoundRobin,
        }
    }
}

/// One member's subscription and (for sticky) its prior assignment.
pub struct MemberSpec {
    pub member_id: String,
    pub subscription: Vec<String>,
    pub previous_assignment: Vec<(String, PartitionId)>,
}

/// Compute the new assignment: member_id -> [(topic, partition)].
/// `partitions_per_topic` gives the partition count for every subscribed
/// topic.
pub fn assign(
    strategy: AssignmentStrategy,
    members: &[MemberSpec],
    partitions_per_topic: &HashMap<String, u32>,
) -> HashMap<String, Vec<(String, PartitionId)>> {
    match strategy {
        AssignmentStrategy::Range => assign_range(members, partitions_per_topic),
        AssignmentStrategy::RoundRobin => assign_round_robin(members, partitions_per_topic, false),
        AssignmentStrategy::Sticky => assign_round_robin(members, partitions_per_topic, true),
    }
}

fn assign_range(
    members: &[MemberSpec],
    partitions_per_topic: &HashMap<String, u32>,
) -> HashMap<String, Vec<(String, PartitionId)>> {
    let mut result: HashMap<String, Vec<(String, PartitionId)>> =
        members.iter().map(|m| (m.member_id.clone(), Vec::new())).collect();

    let topics = subscribed_topics(members);
    for topic in topics {
        let Some(&count) = partitions_per_topic.get(&topic) else {
            continue;
        };
        let mut subscribers: Vec<&MemberSpec> = members
            .iter()
            .filter(|m| m.subscription.iter().any(|t| t == &topic))
            .collect();
        subscribers.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        if subscribers.is_empty() {
            continue;
        }

        let n = subscribers.len() as u32;
        let per_member = count / n;
        let extra = count % n;

        let mut partition = 0i32;
        for (i, member) in subscribers.iter().enumerate() {
            let take = per_member + u32::from((i as u32) < extra);
            let entry = result.entry(member.member_id.clone()).or_default();
            for _ in 0..take {
                entry.push((topic.clone(), partition));
                partition += 1;
            }
        }
    }
    result
}

fn assign_round_robin(
    members: &[MemberSpec],
    partitions_per_topic: &HashMap<String, u32>,
    sticky: bool,
) -> HashMap<String, Vec<(String, PartitionId)>> {
    let mut result: HashMap<String, Vec<(String, PartitionId)>> =
        members.iter().map(|m| (m.member_id.clone(), Vec::new())).collect();

    let mut all_partitions: Vec<(String, PartitionId)> = Vec::new();
    for topic in subscribed_topics(members) {
        if let Some(&count) = partitions_per_topic.get(&topic) {
            for p in 0..count as i32 {
                all_partitions.push((topic.clone(), p));
            }
        }
    }

    if sticky {
        for member in members {
            for tp in &member.previous_assignment {
                if let Some(pos) = all_partitions.iter().position(|x| x == tp) {
                    all_partitions.remove(pos);
                    result.entry(member.member_id.clone()).or_default().push(tp.clone());
                }
            }
        }
    }

    let mut member_ids: Vec<&String> = members.iter().map(|m| &m.member_id).collect();
    member_ids.sort();
    if member_ids.is_empty() {
        return result;
    }

    for (i, tp) in all_partitions.into_iter().enumerate() {
        let member_id = member_ids[i % member_ids.len()];
        result.entry(member_id.clone()).or_default().push(tp);
    }
    result
}

fn subscribed_topics(members: &[MemberSpec]) -> Vec<String> {
    let mut topics: Vec<String> = members
        .iter()
        .flat_map(|m| m.subscription.iter().cloned())
        .collect();
    topics.sort();
    topics.dedup();
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, topics: &[&str]) -> MemberSpec {
        MemberSpec {
            member_id: id.to_string(),
            subscription: topics.iter().map(|t| t.to_string()).collect(),
            previous_assignment: Vec::new(),
        }
    }

    #[test]
    fn range_splits_evenly() {
        let members = vec![spec("a", &["orders"]), spec("b", &["orders"])];
        let mut partitions = HashMap::new();
        partitions.insert("orders".to_string(), 4);
        let assignment = assign(AssignmentStrategy::Range, &members, &partitions);
        assert_eq!(assignment["a"].len(), 2);
        assert_eq!(assignment["b"].len(), 2);
    }

    #[test]
    fn round_robin_covers_all_partitions() {
        let members = vec![spec("a", &["orders"]), spec("b", &["orders"]), spec("c", &["orders"])];
        let mut partitions = HashMap::new();
        partitions.insert("orders".to_string(), 5);
        let assignment = assign(AssignmentStrategy::RoundRobin, &members, &partitions);
        let total: usize = assignment.values().map(Vec::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn sticky_keeps_previous_ownership() {
        let mut a = spec("a", &["orders"]);
        a.previous_assignment = vec![("orders".to_string(), 2)];
        let members = vec![a, spec("b", &["orders"])];
        let mut partitions = HashMap::new();
        partitions.insert("orders".to_string(), 4);
        let assignment = assign(AssignmentStrategy::Sticky, &members, &partitions);
        assert!(assignment["a"].contains(&("orders".to_string(), 2)));
    }
}

use crate::source::Entity;
use authz_relationships::RelationshipUpdate;

/// Default number of backend updates per write call
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Smallest chunk that still fits a member's role pair
pub const MIN_CHUNK_SIZE: usize = 2;

/// Pack the updates of `entities` into write calls of at most `chunk_size`
/// updates, keeping enumeration order. An entity's updates never straddle two
/// calls, so a role switch stays atomic.
pub fn pack(entities: &[Entity], chunk_size: usize) -> Vec<Vec<RelationshipUpdate>> {
    let mut chunks = Vec::new();
    let mut current: Vec<RelationshipUpdate> = Vec::with_capacity(chunk_size);

    for entity in entities {
        let updates = entity.updates();
        if !current.is_empty() && current.len() + updates.len() > chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
        current.extend(updates);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Member, OffDay, Role};
    use authz_relationships::Operation;

    fn off_days(n: usize) -> Vec<Entity> {
        (0..n)
            .map(|i| Entity::OffDay(OffDay::new(&format!("o{i}"), "rift")))
            .collect()
    }

    fn members(n: usize) -> Vec<Entity> {
        (0..n)
            .map(|i| Entity::Member(Member::new(&format!("m{i}"), "rift", Role::Sdr)))
            .collect()
    }

    fn sizes(chunks: &[Vec<RelationshipUpdate>]) -> Vec<usize> {
        chunks.iter().map(Vec::len).collect()
    }

    #[test]
    fn test_chunk_boundaries() {
        assert!(pack(&[], 1000).is_empty());
        assert_eq!(sizes(&pack(&off_days(1), 1000)), vec![1]);
        assert_eq!(sizes(&pack(&off_days(1000), 1000)), vec![1000]);
        assert_eq!(sizes(&pack(&off_days(1001), 1000)), vec![1000, 1]);
    }

    #[test]
    fn test_role_pairs_are_never_split() {
        let chunks = pack(&members(3), 5);
        assert_eq!(sizes(&chunks), vec![4, 2]);
        for chunk in &chunks {
            assert_eq!(chunk[0].operation, Operation::Delete);
            assert_eq!(chunk[chunk.len() - 1].operation, Operation::Touch);
        }

        assert_eq!(sizes(&pack(&members(500), 1000)), vec![1000]);
        assert_eq!(sizes(&pack(&members(501), 1000)), vec![1000, 2]);
    }

    #[test]
    fn test_order_is_preserved() {
        let chunks = pack(&off_days(5), 2);
        let ids: Vec<String> = chunks
            .iter()
            .flatten()
            .map(|u| u.relationship.resource.object_id.clone())
            .collect();
        assert_eq!(ids, vec!["o0", "o1", "o2", "o3", "o4"]);
    }
}

//! In-memory index of managed sequences, dense per domain.

use std::collections::BTreeMap;

use crate::core::uid::Uid;
use crate::seq::managed::ManagedSequence;

#[derive(Debug, Default)]
pub struct SequenceIndex {
    domains: BTreeMap<char, Vec<Option<ManagedSequence>>>,
}

impl SequenceIndex {
    pub fn new() -> Self {
        SequenceIndex::default()
    }

    pub fn exists(&self, uid: Uid) -> bool {
        self.get(uid).is_some()
    }

    pub fn get(&self, uid: Uid) -> Option<&ManagedSequence> {
        self.domains
            .get(&uid.domain())
            .and_then(|seqs| seqs.get(uid.number() as usize))
            .and_then(|slot| slot.as_ref())
            .filter(|s| s.id == uid)
    }

    pub fn get_mut(&mut self, uid: Uid) -> Option<&mut ManagedSequence> {
        self.domains
            .get_mut(&uid.domain())
            .and_then(|seqs| seqs.get_mut(uid.number() as usize))
            .and_then(|slot| slot.as_mut())
            .filter(|s| s.id == uid)
    }

    pub fn add(&mut self, seq: ManagedSequence) {
        let seqs = self.domains.entry(seq.id.domain()).or_default();
        let index = seq.id.number() as usize;
        if index >= seqs.len() {
            seqs.resize(index * 3 / 2 + 1, None);
        }
        seqs[index] = Some(seq);
    }

    pub fn len(&self) -> usize {
        self.domains
            .values()
            .map(|seqs| seqs.iter().filter(|s| s.is_some()).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate in `(domain, number)` order.
    pub fn iter(&self) -> impl Iterator<Item = &ManagedSequence> {
        self.domains
            .values()
            .flat_map(|seqs| seqs.iter().filter_map(|s| s.as_ref()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ManagedSequence> {
        self.domains
            .values_mut()
            .flat_map(|seqs| seqs.iter_mut().filter_map(|s| s.as_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sequence::Sequence;

    fn seq(id: &str) -> ManagedSequence {
        ManagedSequence::new(
            id.parse().expect("valid uid"),
            id,
            Sequence::from_i64(&[1, 2, 3]),
        )
    }

    #[test]
    fn add_get_iterate() {
        let mut index = SequenceIndex::new();
        index.add(seq("A000010"));
        index.add(seq("A000002"));
        index.add(seq("U000005"));
        assert_eq!(index.len(), 3);
        assert!(index.exists("A000010".parse().expect("valid")));
        assert!(!index.exists("A000003".parse().expect("valid")));
        let order: Vec<String> = index.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(order, ["A000002", "A000010", "U000005"]);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut index = SequenceIndex::new();
        index.add(seq("A000001"));
        index
            .get_mut("A000001".parse().expect("valid"))
            .expect("exists")
            .offset = 4;
        assert_eq!(index.get("A000001".parse().expect("valid")).expect("exists").offset, 4);
    }
}

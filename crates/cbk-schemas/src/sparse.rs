//! Union/merge helpers for sparse material maps.
//!
//! Consumption and discrepancy are both "iterate the union of several
//! sparse maps with an implicit zero default" calculations; this module is
//! the single implementation of that pattern.

use std::collections::BTreeSet;

use crate::{MaterialId, MaterialMap};

/// Value for `id`, defaulting to zero when absent.
pub fn qty(map: &MaterialMap, id: MaterialId) -> f64 {
    map.get(&id).copied().unwrap_or(0.0)
}

/// Deterministically ordered union of the key sets of several maps.
pub fn key_union(maps: &[&MaterialMap]) -> BTreeSet<MaterialId> {
    let mut keys = BTreeSet::new();
    for m in maps {
        keys.extend(m.keys().copied());
    }
    keys
}

/// Add `amount` to `map[id]`, creating the entry if needed.
pub fn add(map: &mut MaterialMap, id: MaterialId, amount: f64) {
    *map.entry(id).or_insert(0.0) += amount;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pairs: &[(u32, f64)]) -> MaterialMap {
        pairs.iter().map(|&(id, v)| (MaterialId(id), v)).collect()
    }

    #[test]
    fn union_covers_all_keys_once() {
        let a = m(&[(1, 1.0), (2, 2.0)]);
        let b = m(&[(2, 5.0), (3, 3.0)]);
        let keys: Vec<u32> = key_union(&[&a, &b]).into_iter().map(|k| k.0).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn qty_defaults_to_zero() {
        let a = m(&[(1, 1.5)]);
        assert_eq!(qty(&a, MaterialId(1)), 1.5);
        assert_eq!(qty(&a, MaterialId(99)), 0.0);
    }

    #[test]
    fn add_accumulates() {
        let mut a = MaterialMap::new();
        add(&mut a, MaterialId(7), 1.0);
        add(&mut a, MaterialId(7), 0.5);
        assert_eq!(qty(&a, MaterialId(7)), 1.5);
    }
}

//! Cycle detection over resolver dependencies.
//!
//! An edge `key -> dep` exists when the resolver registered under `key` declares a parameter
//! resolved from `dep`. Static values have no outgoing edges and unregistered keys (forward
//! references) end the search, so a cycle is reported by the registration that closes it.

use std::collections::{HashMap, HashSet};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::key::Key;

/// Reject registering `key` with `deps` if it would close a cycle in `registry`.
pub(crate) fn check_acyclic(registry: &HashMap<Key, Entry>, key: &Key, deps: &[Key]) -> Result<()> {
    let mut visited = HashSet::new();
    for dep in deps {
        let mut path = vec![key.clone()];
        if find_path(registry, dep, key, &mut path, &mut visited) {
            return Err(Error::CircularDependency { chain: path });
        }
    }
    Ok(())
}

/// Depth-first search for `target`, leaving the path in `path` when found
fn find_path(
    registry: &HashMap<Key, Entry>,
    node: &Key,
    target: &Key,
    path: &mut Vec<Key>,
    visited: &mut HashSet<Key>,
) -> bool {
    path.push(node.clone());
    if node == target {
        return true;
    }
    if visited.insert(node.clone()) {
        if let Some(entry) = registry.get(node) {
            for next in entry.dependencies() {
                if find_path(registry, next, target, path, visited) {
                    return true;
                }
            }
        }
    }
    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Resolver;
    use crate::signature::Value;
    use std::sync::Arc;

    fn resolver(key: &str, deps: &[&'static str]) -> (Key, Entry) {
        let key = Key::from(key.to_string());
        let r = deps
            .iter()
            .fold(Resolver::new(|_| Ok(())), |r, d| r.inject(*d, *d));
        let entry = Entry::resolver(&key, r).unwrap();
        (key, entry)
    }

    fn registry(entries: &[(&str, &[&'static str])]) -> HashMap<Key, Entry> {
        entries.iter().map(|(k, d)| resolver(k, d)).collect()
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let reg = HashMap::new();
        let err = check_acyclic(&reg, &Key::from("a"), &[Key::from("a")]).unwrap_err();
        match err {
            Error::CircularDependency { chain } => {
                assert_eq!(chain, vec![Key::from("a"), Key::from("a")]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn reports_the_full_chain() {
        let reg = registry(&[("a", &["b"]), ("b", &["c"])]);
        let err = check_acyclic(&reg, &Key::from("c"), &[Key::from("a")]).unwrap_err();
        match err {
            Error::CircularDependency { chain } => {
                let names: Vec<String> = chain.iter().map(ToString::to_string).collect();
                assert_eq!(names, ["c", "a", "b", "c"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn values_and_forward_references_end_the_search() {
        let mut reg = registry(&[("a", &["missing", "v"])]);
        let value: Value = Arc::new(1u8);
        reg.insert(Key::from("v"), Entry::Value(value));
        assert!(check_acyclic(&reg, &Key::from("c"), &[Key::from("a")]).is_ok());
    }

    #[test]
    fn diamonds_are_not_cycles() {
        let reg = registry(&[("base", &[]), ("left", &["base"]), ("right", &["base"])]);
        assert!(check_acyclic(&reg, &Key::from("top"), &[Key::from("left"), Key::from("right")]).is_ok());
    }
}

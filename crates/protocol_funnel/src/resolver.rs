//! Dependency ordering of protocols.
//!
//! Depth-first traversal from each root with an active-stack set and a
//! finished-position map. Reaching a node that is still on the active stack is a
//! cycle; reaching a finished node is a no-op, so shared dependencies (diamonds)
//! get exactly one position. A node is assigned the next post-order position once
//! all its dependencies have finished, which makes the finished list a valid
//! dependency-first order.

use crate::error::FunnelError;
use crate::protocol::{ProtocolKey, ProtocolRef};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Dependency-first order of every reachable protocol and its exact mirror.
#[derive(Clone)]
pub struct Resolution {
    /// No protocol precedes one it depends on
    pub direct: Vec<ProtocolRef>,
    /// `reverse[i] == direct[direct.len() - 1 - i]`
    pub reverse: Vec<ProtocolRef>,
}

impl Resolution {
    pub fn len(&self) -> usize {
        self.direct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty()
    }

    /// Names in direct order, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        self.direct.iter().map(|p| p.name().to_string()).collect()
    }
}

/// Resolves `roots` and everything they transitively depend on.
///
/// Empty input yields empty sequences. Any cycle, including a protocol that
/// lists itself, fails with [`FunnelError::CircularDependency`] and yields no
/// partial ordering.
pub fn resolve(roots: &[ProtocolRef]) -> Result<Resolution, FunnelError> {
    let mut walk = Walk::default();
    for root in roots {
        walk.visit(root)?;
    }

    let direct = walk.finished;
    let count = direct.len();
    let reverse = (0..count).map(|i| direct[count - 1 - i].clone()).collect();

    let resolution = Resolution { direct, reverse };
    debug!("Resolved protocol order: {:?}", resolution.names());
    Ok(resolution)
}

#[derive(Default)]
struct Walk {
    /// Nodes on the current recursion path
    active: HashSet<ProtocolKey>,
    /// Post-order position of every finished node
    positions: HashMap<ProtocolKey, usize>,
    /// Finished nodes, indexed by position
    finished: Vec<ProtocolRef>,
}

impl Walk {
    fn visit(&mut self, protocol: &ProtocolRef) -> Result<(), FunnelError> {
        let key = ProtocolKey::of(protocol);
        if self.active.contains(&key) {
            return Err(FunnelError::CircularDependency);
        }
        if self.positions.contains_key(&key) {
            return Ok(());
        }

        self.active.insert(key);
        for dependency in protocol.dependencies() {
            self.visit(&dependency)?;
        }
        self.active.remove(&key);

        self.positions.insert(key, self.finished.len());
        self.finished.push(protocol.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;
    use std::sync::{Arc, Mutex, Weak};

    /// Protocol whose dependency list can be wired after construction, so
    /// tests can build cycles.
    struct Node {
        name: &'static str,
        deps: Mutex<Vec<Weak<Node>>>,
    }

    impl Node {
        fn new(name: &'static str) -> Arc<Node> {
            Arc::new(Node {
                name,
                deps: Mutex::new(Vec::new()),
            })
        }

        fn depends_on(&self, other: &Arc<Node>) {
            self.deps.lock().unwrap().push(Arc::downgrade(other));
        }
    }

    impl Protocol for Node {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> Vec<ProtocolRef> {
            self.deps
                .lock()
                .unwrap()
                .iter()
                .filter_map(Weak::upgrade)
                .map(|node| node as ProtocolRef)
                .collect()
        }
    }

    fn erased(node: &Arc<Node>) -> ProtocolRef {
        node.clone()
    }

    fn position(resolution: &Resolution, name: &str) -> usize {
        resolution
            .direct
            .iter()
            .position(|p| p.name() == name)
            .unwrap_or_else(|| panic!("{} missing from order", name))
    }

    #[test]
    fn test_empty_roots() {
        let resolution = resolve(&[]).unwrap();
        assert!(resolution.is_empty());
        assert!(resolution.reverse.is_empty());
    }

    #[test]
    fn test_chain_is_dependency_first() {
        let a = Node::new("a");
        let b = Node::new("b");
        let c = Node::new("c");
        a.depends_on(&b);
        b.depends_on(&c);

        let resolution = resolve(&[erased(&a)]).unwrap();
        assert_eq!(resolution.names(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_diamond_places_shared_dependency_once() {
        let a = Node::new("a");
        let b = Node::new("b");
        let c = Node::new("c");
        let d = Node::new("d");
        a.depends_on(&b);
        a.depends_on(&c);
        b.depends_on(&d);
        c.depends_on(&d);

        let resolution = resolve(&[erased(&a)]).unwrap();
        assert_eq!(resolution.len(), 4);
        let (pa, pb, pc, pd) = (
            position(&resolution, "a"),
            position(&resolution, "b"),
            position(&resolution, "c"),
            position(&resolution, "d"),
        );
        assert!(pd < pb && pd < pc);
        assert!(pb < pa && pc < pa);
    }

    #[test]
    fn test_reverse_mirrors_direct() {
        let a = Node::new("a");
        let b = Node::new("b");
        let c = Node::new("c");
        let d = Node::new("d");
        a.depends_on(&b);
        c.depends_on(&d);

        let resolution = resolve(&[erased(&a), erased(&c)]).unwrap();
        let n = resolution.len();
        for i in 0..n {
            assert!(Arc::ptr_eq(&resolution.reverse[i], &resolution.direct[n - 1 - i]));
        }
    }

    #[test]
    fn test_transitive_dependencies_are_pulled_in() {
        let chat = Node::new("chat");
        let auth = Node::new("auth");
        chat.depends_on(&auth);

        let resolution = resolve(&[erased(&chat)]).unwrap();
        assert_eq!(resolution.names(), vec!["auth", "chat"]);
    }

    #[test]
    fn test_duplicate_roots_placed_once() {
        let chat = Node::new("chat");
        let auth = Node::new("auth");
        chat.depends_on(&auth);

        let resolution = resolve(&[erased(&chat), erased(&auth), erased(&chat)]).unwrap();
        assert_eq!(resolution.names(), vec!["auth", "chat"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let a = Node::new("a");
        a.depends_on(&a);

        assert!(matches!(
            resolve(&[erased(&a)]),
            Err(FunnelError::CircularDependency)
        ));
    }

    #[test]
    fn test_longer_cycle_detected_from_any_root() {
        let a = Node::new("a");
        let b = Node::new("b");
        let c = Node::new("c");
        a.depends_on(&b);
        b.depends_on(&c);
        c.depends_on(&a);

        for root in [&a, &b, &c] {
            assert!(matches!(
                resolve(&[erased(root)]),
                Err(FunnelError::CircularDependency)
            ));
        }
    }

    #[test]
    fn test_cycle_behind_acyclic_root() {
        let ok = Node::new("ok");
        let x = Node::new("x");
        let y = Node::new("y");
        x.depends_on(&y);
        y.depends_on(&x);

        assert!(matches!(
            resolve(&[erased(&ok), erased(&x)]),
            Err(FunnelError::CircularDependency)
        ));
    }
}

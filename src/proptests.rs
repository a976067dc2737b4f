use super::*;

use proptest::prelude::*;
use proptest::sample::Index;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Reference model: parent of every live node.
type Model = BTreeMap<NodeId, NodeId>;

fn validate_tree(t: &Tree) {
    assert_eq!(t.treedata[0], Slot::EMPTY, "slot 0 must stay empty");
    assert_eq!(
        t.subtree_sizes[t.root_id as usize] as usize,
        t.tree_size(),
        "root block must cover the whole array"
    );
    assert_eq!(t.treedata[ROOT_COORD].id(), Some(t.root_id), "root must be first");

    let mut child_sizes: BTreeMap<NodeId, u64> = BTreeMap::new();
    for (pos, slot) in t.treedata.iter().enumerate().skip(1) {
        let Some(id) = slot.id() else {
            continue;
        };
        let idx = id as usize;
        assert_eq!(t.coords[idx] as usize, pos, "coordinate of {id}");
        assert!(t.subtree_sizes[idx] >= 1, "empty block for {id}");
        assert!(
            pos + t.subtree_sizes[idx] as usize <= t.treedata.len(),
            "block of {id} runs past the end"
        );
        if id == t.root_id {
            continue;
        }
        let parent = t.parents[idx];
        assert!(t.is_live(parent), "parent {parent} of {id} must be live");
        let pc = t.coords[parent as usize];
        let pend = pc + t.subtree_sizes[parent as usize];
        assert!(
            pc < pos as u64 && pos as u64 + t.subtree_sizes[idx] <= pend,
            "block of {id} must nest inside the block of {parent}"
        );
        *child_sizes.entry(parent).or_default() += t.subtree_sizes[idx];
    }
    for (parent, sum) in child_sizes {
        assert!(
            1 + sum <= t.subtree_sizes[parent as usize],
            "children of {parent} overflow its block"
        );
    }
}

fn is_descendant(model: &Model, mut node: NodeId, ancestor: NodeId) -> bool {
    loop {
        if node == ancestor {
            return true;
        }
        match model.get(&node) {
            Some(&p) if p != node => node = p,
            _ => return false,
        }
    }
}

fn assert_matches_model(t: &Tree, model: &Model) {
    let live: BTreeSet<NodeId> = t.treedata.iter().filter_map(|s| s.id()).collect();
    let expected: BTreeSet<NodeId> = model.keys().copied().collect();
    assert_eq!(live, expected, "live node sets differ");

    for (&node, &parent) in model {
        assert_eq!(t.parents[node as usize], parent, "parent of {node}");
        let got: BTreeSet<NodeId> = t.subtree_ids(node).unwrap().into_iter().collect();
        let want: BTreeSet<NodeId> = model
            .keys()
            .copied()
            .filter(|&v| is_descendant(model, v, node))
            .collect();
        assert_eq!(got, want, "subtree of {node}");
    }
}

/// A random tree over ids `1..=n` rooted at 1, each node hanging from an
/// earlier one.
fn tree_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<(NodeId, NodeId)>> {
    prop::collection::vec(any::<Index>(), 0..max_nodes).prop_map(|picks| {
        let mut pairs = vec![(1, 1)];
        for (i, pick) in picks.into_iter().enumerate() {
            let node = i as NodeId + 2;
            let parent = pick.index(node as usize - 1) as NodeId + 1;
            pairs.push((node, parent));
        }
        pairs
    })
}

#[derive(Clone, Debug)]
enum Op {
    Insert(Index),
    Move(Index, Index),
    Delete(Index),
    /// Re-add a deleted id under a live parent.
    Readd(Index, Index),
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        40 => any::<Index>().prop_map(Op::Insert),
        30 => (any::<Index>(), any::<Index>()).prop_map(|(a, b)| Op::Move(a, b)),
        20 => any::<Index>().prop_map(Op::Delete),
        10 => (any::<Index>(), any::<Index>()).prop_map(|(a, b)| Op::Readd(a, b)),
    ];
    prop::collection::vec(op, 0..=60)
}

/// A tree under random edits, next to its model.
struct Run {
    t: Tree,
    model: Model,
    next_id: NodeId,
    /// Ids that were deleted at least once, live again or not.
    ever_deleted: BTreeSet<NodeId>,
}

impl Run {
    fn new(pairs: Vec<(NodeId, NodeId)>) -> Self {
        let t = Tree::construct(pairs.clone()).unwrap();
        let next_id = t.max_id() + 1;
        Self {
            t,
            model: pairs.into_iter().collect(),
            next_id,
            ever_deleted: BTreeSet::new(),
        }
    }

    /// Applies `op` to both the tree and the model and checks that they
    /// agree on whether it was allowed.
    fn apply(&mut self, op: &Op) {
        let Run { t, model, next_id, ever_deleted } = self;
        let live: Vec<NodeId> = model.keys().copied().collect();
        match *op {
            Op::Insert(parent) => {
                let parent = live[parent.index(live.len())];
                let node = *next_id;
                *next_id += 1;
                t.insert_node(node, parent).unwrap();
                model.insert(node, parent);
            }
            Op::Move(node, parent) => {
                let node = live[node.index(live.len())];
                let parent = live[parent.index(live.len())];
                let result = t.move_subtree(node, parent);
                if node == t.root_id || is_descendant(model, parent, node) {
                    assert!(result.is_err(), "move of {node} under {parent} must fail");
                } else {
                    result.unwrap();
                    model.insert(node, parent);
                }
            }
            Op::Delete(node) => {
                let node = live[node.index(live.len())];
                let result = t.delete_subtree(node);
                if node == t.root_id {
                    assert!(result.is_err(), "the root must not be deletable");
                } else {
                    let summary = result.unwrap();
                    let gone: BTreeSet<NodeId> = model
                        .keys()
                        .copied()
                        .filter(|&v| is_descendant(model, v, node))
                        .collect();
                    assert_eq!(summary.deleted.iter().copied().collect::<BTreeSet<_>>(), gone);
                    model.retain(|v, _| !gone.contains(v));
                    ever_deleted.extend(gone);
                }
            }
            Op::Readd(node, parent) => {
                let dead: Vec<NodeId> = ever_deleted
                    .iter()
                    .copied()
                    .filter(|v| !model.contains_key(v))
                    .collect();
                if dead.is_empty() {
                    return;
                }
                let node = dead[node.index(dead.len())];
                let parent = live[parent.index(live.len())];
                assert!(matches!(
                    t.insert_node(node, parent),
                    Err(Error::DeletedNode(n)) if n == node
                ));
                let options = AddOptions { allow_deleted: true };
                let summary = t.add_nodes([(node, parent)], &options).unwrap();
                assert_eq!(summary.added, vec![node]);
                model.insert(node, parent);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_construct_matches_model(pairs in tree_strategy(200), workers in 1usize..4) {
        let options = BuildOptions { workers, validate: true };
        let t = Tree::construct_with(pairs.clone(), &options).unwrap();
        let model: Model = pairs.into_iter().collect();
        validate_tree(&t);
        assert_matches_model(&t, &model);
    }

    #[test]
    fn prop_edits_match_model(pairs in tree_strategy(40), ops in ops_strategy()) {
        let mut run = Run::new(pairs);
        for op in &ops {
            run.apply(op);
            validate_tree(&run.t);
        }
        assert_matches_model(&run.t, &run.model);
    }

    #[test]
    fn prop_update_reaches_listing(
        before in tree_strategy(30),
        after in tree_strategy(30),
    ) {
        let mut t = Tree::construct(before).unwrap();
        let summary = t.update(after.clone()).unwrap();
        let model: Model = after.into_iter().collect();
        validate_tree(&t);
        assert_matches_model(&t, &model);
        prop_assert_eq!(summary.moved.iter().collect::<BTreeSet<_>>().len(), summary.moved.len());
    }

    #[test]
    fn prop_update_after_edits(
        before in tree_strategy(30),
        ops in ops_strategy(),
        after in tree_strategy(30),
    ) {
        // The tree being reconciled carries tombstones, re-added ids and
        // moved blocks.
        let mut run = Run::new(before);
        for op in &ops {
            run.apply(op);
        }
        let Run { mut t, model: edited, .. } = run;

        let summary = t.update(after.clone()).unwrap();
        let model: Model = after.into_iter().collect();
        validate_tree(&t);
        assert_matches_model(&t, &model);

        let deleted: BTreeSet<NodeId> = summary.deleted.iter().copied().collect();
        let dropped: BTreeSet<NodeId> = edited.keys().copied().filter(|id| !model.contains_key(id)).collect();
        prop_assert_eq!(deleted, dropped);
        for id in &summary.added {
            prop_assert!(!edited.contains_key(id), "{} was live and must not be re-added", id);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_file_roundtrip(pairs in tree_strategy(60), ops in ops_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree");
        let mut run = Run::new(pairs);
        for op in &ops {
            run.apply(op);
        }
        let t = &mut run.t;

        t.to_file(&path).unwrap();
        let loaded = Tree::from_file(&path).unwrap();
        prop_assert_eq!(&loaded.parents, &t.parents);
        prop_assert_eq!(&loaded.coords, &t.coords);
        prop_assert_eq!(&loaded.subtree_sizes, &t.subtree_sizes);
        prop_assert_eq!(&loaded.treedata, &t.treedata);
        prop_assert_eq!(loaded.root_id(), t.root_id());
    }

    #[test]
    fn prop_attributes_follow_edits(pairs in tree_strategy(30), ops in ops_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        // Every original node carries its own id as value.
        let values: AttributeValues = pairs.iter().map(|&(id, _)| (id, vec![json!(id)])).collect();
        let mut run = Run::new(pairs);
        run.t.to_file(dir.path().join("tree")).unwrap();
        run.t.create_attribute("id", &values, false).unwrap();

        for op in &ops {
            run.apply(op);
        }

        let loaded = run.t.load_attribute_values("id").unwrap();
        for (id, v) in &loaded {
            prop_assert_eq!(v, &vec![json!(*id)]);
        }
        // Re-added ids start over without a value.
        let expected: BTreeSet<NodeId> = run
            .model
            .keys()
            .copied()
            .filter(|id| values.contains_key(id) && !run.ever_deleted.contains(id))
            .collect();
        prop_assert_eq!(loaded.keys().copied().collect::<BTreeSet<_>>(), expected);
    }
}

#[test]
fn exhaustive_moves_on_small_tree() {
    // Every single move on a 6-node tree either fails cleanly or keeps the
    // index valid.
    let pairs = [(1, 1), (2, 1), (3, 1), (4, 2), (5, 2), (6, 4)];
    for node in 1..=6 {
        for parent in 1..=6 {
            let mut t = Tree::construct(pairs).unwrap();
            let mut model: Model = pairs.into_iter().collect();
            let expect_ok = node != 1 && !is_descendant(&model, parent, node);
            match t.move_subtree(node, parent) {
                Ok(_) => {
                    assert!(expect_ok, "move {node} -> {parent} should fail");
                    model.insert(node, parent);
                }
                Err(e) => assert!(!expect_ok, "move {node} -> {parent}: {e}"),
            }
            validate_tree(&t);
            assert_matches_model(&t, &model);
        }
    }
}

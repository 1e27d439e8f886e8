use canvas_tree::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn segment() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "work", "home"]).prop_map(str::to_string)
}

fn tree_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..4).prop_map(|segs| format!("/{}", segs.join("/")))
}

fn ids() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..500, 0..40)
}

fn mapping(tree: &Tree) -> BTreeMap<String, Vec<LayerId>> {
    tree.tree_index()
        .list_all()
        .unwrap()
        .into_iter()
        .map(|node| (node.path, node.layer_ids))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_insert_is_idempotent(paths in prop::collection::vec(tree_path(), 1..6)) {
        let tree = Tree::in_memory().unwrap();
        for p in &paths {
            tree.insert_path(p, None, true).unwrap();
        }
        let before = mapping(&tree);
        for p in &paths {
            tree.insert_path(p, None, true).unwrap();
        }
        prop_assert_eq!(mapping(&tree), before);
    }

    #[test]
    fn prop_merge_layer_is_idempotent(src in ids(), dst in ids()) {
        let tree = Tree::in_memory().unwrap();
        let l = tree.create_layer(LayerSpec::new("L")).unwrap();
        let t = tree.create_layer(LayerSpec::new("T")).unwrap();
        tree.add_documents(l.id(), src, &Actor::Anonymous).unwrap();
        tree.add_documents(t.id(), dst, &Actor::Anonymous).unwrap();
        let targets = [t.id().clone()];

        tree.merge_layer(l.id(), &targets, &Actor::Anonymous).unwrap();
        let once = tree.get_layer_by_id(t.id()).unwrap().unwrap().documents().clone();
        tree.merge_layer(l.id(), &targets, &Actor::Anonymous).unwrap();
        let twice = tree.get_layer_by_id(t.id()).unwrap().unwrap().documents().clone();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_subtract_after_merge_removes_exactly_source(src in ids(), dst in ids()) {
        let tree = Tree::in_memory().unwrap();
        let l = tree.create_layer(LayerSpec::new("L")).unwrap();
        let t = tree.create_layer(LayerSpec::new("T")).unwrap();
        tree.add_documents(l.id(), src.iter().copied(), &Actor::Anonymous).unwrap();
        tree.add_documents(t.id(), dst.iter().copied(), &Actor::Anonymous).unwrap();
        let targets = [t.id().clone()];

        tree.merge_layer(l.id(), &targets, &Actor::Anonymous).unwrap();
        tree.subtract_layer(l.id(), &targets, &Actor::Anonymous).unwrap();

        let expected = document_set(dst) - document_set(src);
        let actual = tree.get_layer_by_id(t.id()).unwrap().unwrap().documents().clone();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_move_roundtrip_restores_mapping(
        paths in prop::collection::vec(tree_path(), 1..6),
        subtree in segment(),
    ) {
        let tree = Tree::in_memory().unwrap();
        let from = format!("/{subtree}");
        tree.insert_path(&from, None, true).unwrap();
        for p in &paths {
            tree.insert_path(&format!("{from}{p}"), None, true).unwrap();
        }
        let before = mapping(&tree);

        let moved = tree.move_path(&from, "/moved", true).unwrap();
        prop_assert!(!tree.path_exists(&from).unwrap());
        let back = tree.move_path("/moved", &from, true).unwrap();
        prop_assert_eq!(moved, back);

        prop_assert_eq!(mapping(&tree), before);
    }

    #[test]
    fn prop_merge_up_ancestors_contain_source(path in tree_path(), docs in ids()) {
        let tree = Tree::in_memory().unwrap();
        tree.insert_path(&path, None, true).unwrap();
        let leaf = tree.layers_at(&path).unwrap()[0].id().clone();
        tree.add_documents(&leaf, docs.iter().copied(), &Actor::Anonymous).unwrap();

        tree.merge_up(&path, &Actor::Anonymous).unwrap();
        let source = tree.effective_bitmap(&path).unwrap();
        for ancestor in canvas_tree::path::ancestors(&path) {
            let bits = tree.effective_bitmap(&ancestor).unwrap();
            prop_assert!(source.is_subset(&bits));
        }
    }

    #[test]
    fn prop_feature_lookup_ignores_path_segments(
        feature in segment(),
        paths in prop::collection::vec(tree_path(), 0..6),
        docs in ids(),
    ) {
        let tree = Arc::new(Tree::in_memory().unwrap());
        let ws = Workspace::new("ws", "Universe", Arc::clone(&tree));
        ws.insert_documents("/", &[feature.as_str()], &docs, &Actor::Anonymous).unwrap();
        for p in &paths {
            tree.insert_path(p, None, true).unwrap();
        }

        let found = ws.find_documents("/", &[feature.as_str()]).unwrap();
        prop_assert_eq!(found, document_set(docs.iter().copied()));
    }
}

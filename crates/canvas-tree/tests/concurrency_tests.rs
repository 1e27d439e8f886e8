use canvas_tree::*;
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_writers_lose_no_updates() {
    let tree = Arc::new(Tree::in_memory().unwrap());
    let shared = tree.create_layer(LayerSpec::new("shared")).unwrap();
    let id = shared.id().clone();

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            let id = id.clone();
            thread::spawn(move || {
                for i in 0..50u64 {
                    tree.add_documents(&id, [t * 1000 + i], &Actor::Anonymous)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let layer = tree.get_layer_by_id(&id).unwrap().unwrap();
    assert_eq!(layer.documents().len(), 400);
    assert_eq!(layer.version(), 400);
}

#[test]
fn test_concurrent_inserts_create_each_node_once() {
    let tree = Arc::new(Tree::in_memory().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                tree.insert_path("/work/project/sub", None, true).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(tree.paths().unwrap().len(), 4);
    assert_eq!(tree.list_all_layers().unwrap().len(), 4);
}

#[test]
fn test_concurrent_propagation_and_writes() {
    let tree = Arc::new(Tree::in_memory().unwrap());
    tree.insert_path("/a/b", None, true).unwrap();
    let leaf = tree.layers_at("/a/b").unwrap()[0].id().clone();
    let parent = tree.layers_at("/a").unwrap()[0].id().clone();
    tree.add_documents(&leaf, 0..100, &Actor::Anonymous).unwrap();

    let writer = {
        let tree = Arc::clone(&tree);
        let parent = parent.clone();
        thread::spawn(move || {
            for i in 1000..1100u64 {
                tree.add_documents(&parent, [i], &Actor::Anonymous).unwrap();
            }
        })
    };
    let merger = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for _ in 0..20 {
                tree.merge_up("/a/b", &Actor::Anonymous).unwrap();
            }
        })
    };
    writer.join().unwrap();
    merger.join().unwrap();

    let bits = tree.get_layer_by_id(&parent).unwrap().unwrap().documents().clone();
    assert_eq!(bits.len(), 200);
}

#![allow(missing_docs)]

use pagelists::storage::{
    list_headers, FixedWidth, NodeIdCodec, NodeIdCompression, PropertyLists, StorageManager,
    StorageOptions, StringCodec,
};
use pagelists::types::{NodeId, Result, StorageError};
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

const ENTITIES: u64 = 10_000;
const THRESHOLD: u32 = 40;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn expected(entity: u64) -> Vec<Option<u64>> {
    (0..entity % 50).map(|k| Some(entity + k)).collect()
}

/// Entity `i` gets `i % 50` values. Rows are interleaved across entities so
/// the builder has to regroup them.
fn rows() -> Vec<(u64, u64)> {
    let mut rows = Vec::new();
    for k in 0..50 {
        for entity in 0..ENTITIES {
            if k < entity % 50 {
                rows.push((entity, entity + k));
            }
        }
    }
    rows
}

fn build(storage: &StorageManager, name: &str) -> Result<PropertyLists<u64>> {
    let (lists, summary) = storage
        .lists_builder(name, FixedWidth::<u64>::new(), ENTITIES)
        .threads(4)
        .large_list_threshold(THRESHOLD)
        .build(&rows())?;
    assert_eq!(summary.num_entities, ENTITIES);
    assert_eq!(summary.large_list_threshold, THRESHOLD);
    assert_eq!(summary.num_large_lists, ENTITIES / 50 * 10);
    Ok(lists)
}

#[test]
fn bulk_load_reads_back_every_list() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage, "knows")?;
    let txn = storage.begin_read_only();

    assert_eq!(lists.num_entities(txn.kind()), ENTITIES);
    for entity in 0..ENTITIES {
        let info = lists.list_info(&txn, entity)?;
        assert_eq!(info.is_large, entity % 50 >= u64::from(THRESHOLD), "entity {entity}");
        assert_eq!(info.len, entity % 50);
        assert_eq!(lists.read_list(&txn, entity)?, expected(entity), "entity {entity}");
    }

    let stats = lists.stats(&txn)?;
    assert_eq!(stats.num_entities, ENTITIES);
    assert_eq!(stats.num_chunks, 20);
    assert_eq!(stats.total_elements, rows().len() as u64);
    Ok(())
}

#[test]
fn scans_report_their_length_up_front() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage, "scan")?;
    let txn = storage.begin_read_only();

    let scan = lists.scan_list(&txn, 49)?;
    assert_eq!(scan.len(), 49);
    assert!(scan.is_large());
    assert_eq!(scan.size_hint(), (49, Some(49)));
    let empty = lists.scan_list(&txn, 100)?;
    assert!(empty.is_empty());
    assert_eq!(empty.count(), 0);
    Ok(())
}

#[test]
fn out_of_range_access_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage, "bounds")?;
    let reader = storage.begin_read_only();

    assert!(matches!(
        lists.read_list(&reader, ENTITIES),
        Err(StorageError::OutOfBounds { .. })
    ));
    assert!(matches!(
        lists.set_element(&reader, 3, 0, Some(&1)),
        Err(StorageError::Invalid(_))
    ));

    let writer = storage.begin_write()?;
    assert!(matches!(
        lists.set_element(&writer, 3, 3, Some(&1)),
        Err(StorageError::OutOfBounds { .. })
    ));
    storage.rollback(&writer, &[&lists])?;
    Ok(())
}

#[test]
fn mutations_survive_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    {
        let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
        let lists = build(&storage, "edits")?;
        let txn = storage.begin_write()?;

        lists.set_element(&txn, 7, 0, Some(&999))?;
        lists.set_element(&txn, 8, 1, None)?;
        // Small list grows past its CSR slot and moves to its own pages.
        assert_eq!(lists.append_to_list(&txn, 3, Some(&77))?, 3);
        assert!(lists.list_info(&txn, 3)?.is_large);
        // A large list grows onto a second page.
        for k in 0..600u64 {
            assert_eq!(lists.append_to_list(&txn, 45, Some(&k))?, 45 + k);
        }
        let fresh = lists.add_entity(&txn)?;
        assert_eq!(fresh, ENTITIES);
        lists.append_to_list(&txn, fresh, Some(&5))?;

        storage.commit(&txn, &[&lists])?;
    }

    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = storage.open_lists("edits", FixedWidth::<u64>::new())?;
    let txn = storage.begin_read_only();

    assert_eq!(lists.num_entities(txn.kind()), ENTITIES + 1);
    let mut seven = expected(7);
    seven[0] = Some(999);
    assert_eq!(lists.read_list(&txn, 7)?, seven);
    assert_eq!(lists.read_list(&txn, 8)?[1], None);

    let mut three = expected(3);
    three.push(Some(77));
    assert_eq!(lists.read_list(&txn, 3)?, three);
    // Neighbours in the same chunk keep their values.
    assert_eq!(lists.read_list(&txn, 2)?, expected(2));
    assert_eq!(lists.read_list(&txn, 4)?, expected(4));

    let mut forty_five = expected(45);
    forty_five.extend((0..600u64).map(Some));
    assert_eq!(lists.read_list(&txn, 45)?, forty_five);
    assert_eq!(lists.read_list(&txn, ENTITIES)?, vec![Some(5)]);
    Ok(())
}

#[test]
fn string_lists_spill_to_overflow() -> Result<()> {
    let dir = tempdir()?;
    let name_of = |entity: u64, k: u64| {
        if (entity + k) % 3 == 0 {
            format!("{}-{entity}-{k}", "long".repeat(8))
        } else {
            format!("n{entity}.{k}")
        }
    };
    let mut rows = Vec::new();
    for entity in 0..2_000u64 {
        for k in 0..entity % 7 {
            rows.push((entity, name_of(entity, k)));
        }
    }

    {
        let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
        let overflow = storage.create_overflow("names")?;
        let (lists, summary) = storage
            .lists_builder("names", StringCodec::new(overflow.clone()), 2_000)
            .threads(3)
            .build(&rows)?;
        assert_eq!(summary.num_elements, rows.len() as u64);
        assert!(!overflow.is_empty());

        let txn = storage.begin_write()?;
        lists.append_to_list(&txn, 6, Some(&"z".repeat(100)))?;
        storage.commit(&txn, &[&lists])?;
    }

    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let overflow = storage.open_overflow("names")?;
    let lists = storage.open_lists("names", StringCodec::new(overflow))?;
    let txn = storage.begin_read_only();
    for entity in 0..2_000u64 {
        let mut want: Vec<Option<String>> =
            (0..entity % 7).map(|k| Some(name_of(entity, k))).collect();
        if entity == 6 {
            want.push(Some("z".repeat(100)));
        }
        assert_eq!(lists.read_list(&txn, entity)?, want, "entity {entity}");
    }
    Ok(())
}

#[test]
fn adjacency_lists_with_homogeneous_ids() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let codec = NodeIdCodec::new(NodeIdCompression::for_tables(&[4]));
    let rows: Vec<(u64, NodeId)> = (0..1_000u64)
        .flat_map(|src| (0..src % 4).map(move |k| (src, NodeId::new(4, (src * 7 + k) % 1_000))))
        .collect();
    let (adj, _) = storage.lists_builder("follows", codec, 1_000).build(&rows)?;

    let txn = storage.begin_read_only();
    assert_eq!(
        adj.neighbors(&txn, 3)?,
        vec![NodeId::new(4, 21), NodeId::new(4, 22), NodeId::new(4, 23)]
    );
    assert!(adj.neighbors(&txn, 4)?.is_empty());

    let writer = storage.begin_write()?;
    assert!(adj.set_element(&writer, 3, 0, None).is_err());
    assert!(adj
        .append_to_list(&writer, 3, Some(&NodeId::new(9, 1)))
        .is_err());
    adj.append_to_list(&writer, 3, Some(&NodeId::new(4, 900)))?;
    storage.commit(&writer, &[&adj])?;

    let txn = storage.begin_read_only();
    assert_eq!(adj.neighbors(&txn, 3)?.last(), Some(&NodeId::new(4, 900)));
    assert_eq!(adj.num_elements(&txn, 3)?, 4);
    Ok(())
}

#[test]
fn rebuilding_replaces_the_structure() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let first = build(&storage, "again")?;
    drop(first);
    let (second, _) = storage
        .lists_builder("again", FixedWidth::<u64>::new(), 3)
        .build(&[(1, 10), (1, 11)])?;
    let txn = storage.begin_read_only();
    assert_eq!(second.num_entities(txn.kind()), 3);
    assert_eq!(second.read_list(&txn, 1)?, vec![Some(10), Some(11)]);
    assert!(second.read_list(&txn, 0)?.is_empty());
    Ok(())
}

#[test]
fn default_threshold_is_one_page_of_elements() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lengths = [503u64, 504, 505];
    let rows: Vec<(u64, u64)> = lengths
        .iter()
        .enumerate()
        .flat_map(|(entity, &len)| (0..len).map(move |v| (entity as u64, v)))
        .collect();
    let (lists, summary) = storage
        .lists_builder("natural", FixedWidth::<u64>::new(), lengths.len() as u64)
        .build(&rows)?;
    assert_eq!(lists.layout().elements_per_page(), 504);
    assert_eq!(summary.large_list_threshold, lists.layout().elements_per_page());
    assert_eq!(summary.num_large_lists, 2);

    let txn = storage.begin_read_only();
    for (entity, (&len, large)) in lengths.iter().zip([false, true, true]).enumerate() {
        let info = lists.list_info(&txn, entity as u64)?;
        assert_eq!(info.len, len);
        assert_eq!(info.is_large, large, "length {len}");
        assert_eq!(list_headers::is_large(info.header), large, "length {len}");
        let want: Vec<Option<u64>> = (0..len).map(Some).collect();
        drop(info);
        assert_eq!(lists.read_list(&txn, entity as u64)?, want);
    }
    Ok(())
}

#![allow(missing_docs)]

use pagelists::storage::{
    FixedWidth, NodeIdCodec, NodeIdCompression, PropertyLists, StorageManager, StorageOptions,
};
use pagelists::types::{NodeId, Result, StorageError};
use tempfile::tempdir;

const ENTITIES: u64 = 600;
const LONG: u64 = 1_100;

/// Entity 0 holds `0..LONG` (a large list over three pages), every other
/// entity `e` holds `e*10 .. e*10 + 4`.
fn build(storage: &StorageManager) -> Result<PropertyLists<u64>> {
    let mut rows: Vec<(u64, u64)> = (0..LONG).map(|v| (0, v)).collect();
    for entity in 1..ENTITIES {
        rows.extend((0..4).map(|k| (entity, entity * 10 + k)));
    }
    let (lists, summary) = storage
        .lists_builder("weights", FixedWidth::<u64>::new(), ENTITIES)
        .build(&rows)?;
    assert_eq!(summary.num_large_lists, 1);
    Ok(lists)
}

fn small(entity: u64) -> Vec<Option<u64>> {
    (0..4).map(|k| Some(entity * 10 + k)).collect()
}

#[test]
fn small_lists_compact_in_place() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;
    let reader = storage.begin_read_only();
    let before = lists.stats(&reader)?;

    let writer = storage.begin_write()?;
    assert_eq!(lists.remove_from_list(&writer, 7, 1)?, Some(71));
    assert_eq!(lists.read_list(&writer, 7)?, vec![Some(70), Some(72), Some(73)]);
    assert!(!lists.list_info(&writer, 7)?.is_large);
    // Neighbours in the same chunk keep their slots.
    assert_eq!(lists.read_list(&writer, 6)?, small(6));
    assert_eq!(lists.read_list(&writer, 8)?, small(8));
    assert_eq!(lists.read_list(&reader, 7)?, small(7));

    assert_eq!(lists.remove_from_list(&writer, 7, 2)?, Some(73));
    assert_eq!(lists.remove_from_list(&writer, 7, 0)?, Some(70));
    assert_eq!(lists.remove_from_list(&writer, 7, 0)?, Some(72));
    assert!(matches!(
        lists.remove_from_list(&writer, 7, 0),
        Err(StorageError::OutOfBounds { .. })
    ));
    storage.commit(&writer, &[&lists])?;

    assert!(lists.read_list(&reader, 7)?.is_empty());
    assert_eq!(lists.read_list(&reader, 8)?, small(8));
    let after = lists.stats(&reader)?;
    assert_eq!(after.num_large_lists, before.num_large_lists);
    assert_eq!(after.total_elements, before.total_elements - 4);
    Ok(())
}

#[test]
fn nulls_shift_with_their_elements() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;

    let writer = storage.begin_write()?;
    lists.set_element(&writer, 3, 2, None)?;
    assert_eq!(lists.remove_from_list(&writer, 3, 0)?, Some(30));
    assert_eq!(lists.read_list(&writer, 3)?, vec![Some(31), None, Some(33)]);
    assert_eq!(lists.remove_from_list(&writer, 3, 1)?, None);
    assert_eq!(lists.read_list(&writer, 3)?, vec![Some(31), Some(33)]);
    storage.commit(&writer, &[&lists])?;

    let reader = storage.begin_read_only();
    assert_eq!(lists.read_list(&reader, 3)?, vec![Some(31), Some(33)]);
    Ok(())
}

#[test]
fn large_lists_shift_across_pages_and_reuse_them() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;
    let reader = storage.begin_read_only();
    let pages_before = lists.stats(&reader)?.data_pages;

    let writer = storage.begin_write()?;
    assert_eq!(lists.remove_from_list(&writer, 0, 100)?, Some(100));
    let mut want: Vec<Option<u64>> = (0..LONG).filter(|&v| v != 100).map(Some).collect();
    assert_eq!(lists.read_list(&writer, 0)?, want);

    // Drop below two pages' worth, then grow back into the third page.
    while want.len() > 1_000 {
        let last = want.len() as u64 - 1;
        assert_eq!(lists.remove_from_list(&writer, 0, last)?, want.pop().flatten());
    }
    for v in 0..20u64 {
        lists.append_to_list(&writer, 0, Some(&(5_000 + v)))?;
        want.push(Some(5_000 + v));
    }
    assert_eq!(lists.read_list(&writer, 0)?, want);
    storage.commit(&writer, &[&lists])?;

    assert_eq!(lists.read_list(&reader, 0)?, want);
    assert_eq!(lists.stats(&reader)?.data_pages, pages_before);
    Ok(())
}

#[test]
fn rollback_restores_removed_elements() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;
    let reader = storage.begin_read_only();
    let before = lists.stats(&reader)?;

    let writer = storage.begin_write()?;
    lists.remove_from_list(&writer, 0, 0)?;
    lists.remove_from_list(&writer, 0, 600)?;
    lists.remove_from_list(&writer, 42, 3)?;
    storage.rollback(&writer, &[&lists])?;

    assert_eq!(lists.stats(&reader)?, before);
    let long: Vec<Option<u64>> = (0..LONG).map(Some).collect();
    assert_eq!(lists.read_list(&reader, 0)?, long);
    assert_eq!(lists.read_list(&reader, 42)?, small(42));

    let writer = storage.begin_write()?;
    assert_eq!(lists.read_list(&writer, 0)?, long);
    assert_eq!(lists.read_list(&writer, 42)?, small(42));
    storage.rollback(&writer, &[&lists])?;
    Ok(())
}

#[test]
fn removals_need_a_write_transaction() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;
    let reader = storage.begin_read_only();
    assert!(matches!(
        lists.remove_from_list(&reader, 1, 0),
        Err(StorageError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn edges_can_be_removed_and_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let codec = || NodeIdCodec::new(NodeIdCompression::for_tables(&[0]));
    let edges: Vec<(u64, NodeId)> = (0..50u64)
        .flat_map(|src| (1..=3).map(move |d| (src, NodeId::new(0, (src + d) % 50))))
        .collect();
    {
        let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
        let (adj, _) = storage.lists_builder("fwd", codec(), 50).build(&edges)?;
        let writer = storage.begin_write()?;
        assert_eq!(
            adj.remove_from_list(&writer, 10, 1)?,
            Some(NodeId::new(0, 12))
        );
        storage.commit(&writer, &[&adj])?;
    }
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let adj = storage.open_lists("fwd", codec())?;
    let reader = storage.begin_read_only();
    assert_eq!(
        adj.neighbors(&reader, 10)?,
        vec![NodeId::new(0, 11), NodeId::new(0, 13)]
    );
    assert_eq!(adj.neighbors(&reader, 11)?.len(), 3);
    Ok(())
}

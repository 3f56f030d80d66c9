#![allow(missing_docs)]

use pagelists::storage::{FixedWidth, PropertyLists, StorageManager, StorageOptions};
use pagelists::types::{Result, StorageError};
use tempfile::tempdir;

const ENTITIES: u64 = 1_200;

fn build(storage: &StorageManager) -> Result<PropertyLists<u64>> {
    let rows: Vec<(u64, u64)> = (0..ENTITIES)
        .flat_map(|entity| (0..entity % 5).map(move |k| (entity, entity * 10 + k)))
        .collect();
    let (lists, _) = storage
        .lists_builder("ages", FixedWidth::<u64>::new(), ENTITIES)
        .build(&rows)?;
    Ok(lists)
}

fn original(entity: u64) -> Vec<Option<u64>> {
    (0..entity % 5).map(|k| Some(entity * 10 + k)).collect()
}

#[test]
fn readers_do_not_see_uncommitted_writes() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;

    let writer = storage.begin_write()?;
    lists.set_element(&writer, 4, 2, Some(&1))?;
    lists.append_to_list(&writer, 9, Some(&2))?;
    let added = lists.add_entity(&writer)?;

    let reader = storage.begin_read_only();
    assert_eq!(lists.read_list(&reader, 4)?, original(4));
    assert_eq!(lists.read_list(&reader, 9)?, original(9));
    assert_eq!(lists.num_entities(reader.kind()), ENTITIES);
    assert!(matches!(
        lists.read_list(&reader, added),
        Err(StorageError::OutOfBounds { .. })
    ));

    assert_eq!(lists.read_list(&writer, 4)?[2], Some(1));
    assert_eq!(lists.num_elements(&writer, 9)?, 5);
    assert_eq!(lists.num_entities(writer.kind()), ENTITIES + 1);

    storage.commit(&writer, &[&lists])?;
    assert_eq!(lists.read_list(&reader, 4)?[2], Some(1));
    assert_eq!(lists.num_entities(reader.kind()), ENTITIES + 1);
    assert_eq!(storage.wal().num_shadow_pages(), 0);
    Ok(())
}

#[test]
fn rollback_restores_lists_and_page_counts() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;
    let reader = storage.begin_read_only();
    let before = lists.stats(&reader)?;

    let writer = storage.begin_write()?;
    lists.set_element(&writer, 3, 0, None)?;
    for entity in [1, 2, 3, 4, 513, 1_199] {
        lists.append_to_list(&writer, entity, Some(&7))?;
    }
    for _ in 0..600 {
        lists.add_entity(&writer)?;
    }
    assert!(storage.wal().num_shadow_pages() > 0);
    storage.rollback(&writer, &[&lists])?;

    let after = lists.stats(&reader)?;
    assert_eq!(after, before);
    assert_eq!(storage.wal().num_shadow_pages(), 0);
    for entity in 0..ENTITIES {
        assert_eq!(lists.read_list(&reader, entity)?, original(entity));
    }

    // The structure is still writable after the abort.
    let writer = storage.begin_write()?;
    assert_eq!(lists.append_to_list(&writer, 1, Some(&8))?, 1);
    storage.commit(&writer, &[&lists])?;
    assert_eq!(lists.read_list(&reader, 1)?, vec![Some(10), Some(8)]);
    Ok(())
}

#[test]
fn committed_wal_is_replayed_after_a_crash() -> Result<()> {
    let dir = tempdir()?;
    {
        let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
        let lists = build(&storage)?;
        let writer = storage.begin_write()?;
        lists.set_element(&writer, 4, 0, Some(&4_000))?;
        lists.append_to_list(&writer, 8, Some(&8_000))?;
        // Durable in the log but never copied onto the data files.
        storage.wal().commit(writer.id())?;
    }

    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = storage.open_lists("ages", FixedWidth::<u64>::new())?;
    let reader = storage.begin_read_only();
    let mut four = original(4);
    four[0] = Some(4_000);
    assert_eq!(lists.read_list(&reader, 4)?, four);
    let mut eight = original(8);
    eight.push(Some(8_000));
    assert_eq!(lists.read_list(&reader, 8)?, eight);
    assert_eq!(lists.read_list(&reader, 7)?, original(7));
    Ok(())
}

#[test]
fn uncommitted_writes_vanish_after_a_crash() -> Result<()> {
    let dir = tempdir()?;
    {
        let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
        let lists = build(&storage)?;
        let writer = storage.begin_write()?;
        lists.set_element(&writer, 4, 0, Some(&4_000))?;
        lists.add_entity(&writer)?;
    }

    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = storage.open_lists("ages", FixedWidth::<u64>::new())?;
    let reader = storage.begin_read_only();
    assert_eq!(lists.num_entities(reader.kind()), ENTITIES);
    assert_eq!(lists.read_list(&reader, 4)?, original(4));
    Ok(())
}

#[test]
fn only_one_writer_at_a_time() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let lists = build(&storage)?;
    let writer = storage.begin_write()?;
    assert!(storage.begin_write().is_err());
    storage.commit(&writer, &[&lists])?;
    let writer = storage.begin_write()?;
    storage.rollback(&writer, &[&lists])?;
    Ok(())
}

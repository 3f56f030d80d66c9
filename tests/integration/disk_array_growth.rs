#![allow(missing_docs)]

use std::path::Path;

use pagelists::storage::disk_array::{DiskArray, DiskArrayBuilder, PIP_SLOTS};
use pagelists::storage::{StorageManager, StorageOptions, StorageStructure};
use pagelists::types::Result;
use tempfile::tempdir;

const U64_PER_PAGE: u64 = 512;

fn open_array(storage: &StorageManager, path: &Path) -> Result<DiskArray<u64>> {
    let bm = storage.buffer_manager();
    let structure = StorageStructure::new(
        bm.open_file(path)?,
        bm.clone(),
        storage.wal().clone(),
        storage.obs().child("offsets"),
    );
    DiskArray::open(structure, 0)
}

fn create_array(storage: &StorageManager, path: &Path, len: u64) -> Result<()> {
    let bm = storage.buffer_manager();
    let file = bm.create_file(path)?;
    let mut builder = DiskArrayBuilder::<u64>::new(file.clone(), 0, len)?;
    for i in 0..len {
        builder.set(i, i ^ 0xa5a5)?;
    }
    builder.save_to_disk(bm)?;
    bm.flush_file(&file)?;
    bm.discard_file(&file);
    Ok(())
}

#[test]
fn appends_cross_page_and_pip_boundaries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("offsets.array");
    let first_pip_full = PIP_SLOTS as u64 * U64_PER_PAGE;
    {
        let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
        create_array(&storage, &path, first_pip_full - 3)?;
        let array = open_array(&storage, &path)?;
        let reader = storage.begin_read_only();
        assert_eq!(array.num_pips(reader.kind()), 1);

        let writer = storage.begin_write()?;
        for k in 0..10 {
            array.push_back(&writer, 1_000_000 + k)?;
        }
        assert_eq!(array.num_pips(writer.kind()), 2);
        storage.rollback(&writer, &[&array])?;
        assert_eq!(array.num_elements(reader.kind()), first_pip_full - 3);
        assert_eq!(array.num_pips(reader.kind()), 1);

        let writer = storage.begin_write()?;
        for k in 0..10 {
            assert_eq!(array.push_back(&writer, 2_000_000 + k)?, first_pip_full - 3 + k);
        }
        array.update(&writer, 0, 42)?;
        storage.commit(&writer, &[&array])?;
        assert_eq!(array.get(&reader, first_pip_full)?, 2_000_003);
    }

    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let array = open_array(&storage, &path)?;
    let reader = storage.begin_read_only();
    assert_eq!(array.num_elements(reader.kind()), first_pip_full + 7);
    assert_eq!(array.num_pips(reader.kind()), 2);
    assert_eq!(array.get(&reader, 0)?, 42);
    assert_eq!(array.get(&reader, 1)?, 1 ^ 0xa5a5);
    assert_eq!(array.get(&reader, first_pip_full - 4)?, (first_pip_full - 4) ^ 0xa5a5);
    for k in 0..10 {
        assert_eq!(array.get(&reader, first_pip_full - 3 + k)?, 2_000_000 + k);
    }
    Ok(())
}

#[test]
fn empty_array_grows_in_place() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("offsets.array");
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    create_array(&storage, &path, 0)?;
    let array = open_array(&storage, &path)?;
    let reader = storage.begin_read_only();
    assert_eq!(array.num_array_pages(reader.kind()), 0);

    let writer = storage.begin_write()?;
    for i in 0..3 * U64_PER_PAGE {
        array.push_back(&writer, i * 2)?;
    }
    {
        let mut slot = array.get_mut(&writer, 10)?;
        assert_eq!(slot.get(), 20);
        slot.set(11);
    }
    storage.commit(&writer, &[&array])?;

    assert_eq!(array.num_array_pages(reader.kind()), 3);
    assert_eq!(array.get(&reader, 10)?, 11);
    assert_eq!(array.get(&reader, 3 * U64_PER_PAGE - 1)?, (3 * U64_PER_PAGE - 1) * 2);
    assert!(array.get(&reader, 3 * U64_PER_PAGE).is_err());
    Ok(())
}

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use pagelists::storage::{FixedWidth, StorageManager, StorageOptions};
use pagelists::types::Result;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

const ENTITIES: u64 = 5_000;

/// Skewed random lists: most are short, a few exceed a page.
fn random_rows(seed: u64) -> Vec<(u64, u32)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::new();
    for entity in 0..ENTITIES {
        let len = if rng.gen_ratio(1, 200) {
            rng.gen_range(1_000..3_000)
        } else {
            rng.gen_range(0..12)
        };
        for _ in 0..len {
            rows.push((entity, rng.gen::<u32>()));
        }
    }
    // Interleave entities the way an edge import would.
    rows.shuffle(&mut rng);
    rows
}

fn build_into(dir: &Path, rows: &[(u64, u32)], threads: usize) -> Result<()> {
    let storage = StorageManager::open(dir, StorageOptions::small())?;
    storage
        .lists_builder("weights", FixedWidth::<u32>::new(), ENTITIES)
        .threads(threads)
        .large_list_threshold(64)
        .build(rows)?;
    Ok(())
}

#[test]
fn thread_count_does_not_change_the_files() -> Result<()> {
    let rows = random_rows(7);
    let single = tempdir()?;
    let parallel = tempdir()?;
    build_into(single.path(), &rows, 1)?;
    build_into(parallel.path(), &rows, 4)?;

    for suffix in ["lists", "lists.headers", "lists.metadata"] {
        let file = format!("weights.{suffix}");
        let a = fs::read(single.path().join(&file))?;
        let b = fs::read(parallel.path().join(&file))?;
        assert_eq!(a.len(), b.len(), "{file} length");
        assert!(a == b, "{file} differs between 1 and 4 threads");
    }
    Ok(())
}

#[test]
fn per_entity_order_follows_the_input() -> Result<()> {
    let rows = random_rows(11);
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let (lists, summary) = storage
        .lists_builder("weights", FixedWidth::<u32>::new(), ENTITIES)
        .threads(3)
        .build(&rows)?;
    assert!(summary.num_large_lists > 0);

    let mut want: Vec<Vec<Option<u32>>> = vec![Vec::new(); ENTITIES as usize];
    for &(entity, value) in &rows {
        want[entity as usize].push(Some(value));
    }
    let txn = storage.begin_read_only();
    for entity in 0..ENTITIES {
        assert_eq!(lists.read_list(&txn, entity)?, want[entity as usize]);
    }
    Ok(())
}

#[test]
fn entities_beyond_the_declared_count_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let storage = StorageManager::open(dir.path(), StorageOptions::small())?;
    let result = storage
        .lists_builder("weights", FixedWidth::<u32>::new(), 10)
        .build(&[(3, 1), (10, 2)]);
    assert!(result.is_err());
    Ok(())
}

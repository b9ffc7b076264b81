use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sstlite::env::RandomAccessFile;
use sstlite::filter::BloomFilterPolicy;
use sstlite::ioutils::BufWriterWithPos;
use sstlite::iterator::Iter;
use sstlite::sstable::merging_iter::new_merging_iterator;
use sstlite::sstable::table::{Table, TableIter};
use sstlite::sstable::table_builder::TableBuilder;
use sstlite::{CompressionType, Options, ReadOptions, Result};
use tempfile::TempDir;

fn build_table(
    path: &Path,
    options: Arc<Options>,
    entries: &[(Vec<u8>, Vec<u8>)],
) -> Result<Arc<Table>> {
    let file = File::create(path)?;
    let mut builder = TableBuilder::new(options.clone(), BufWriterWithPos::new(file)?);
    for (key, value) in entries {
        builder.add(key, value)?;
    }
    builder.finish()?;
    assert_eq!(builder.num_entries() as usize, entries.len());
    let size = builder.file_size();

    let file = File::open(path)?;
    let table = Table::open(options, Box::new(file), size)?;
    Ok(Arc::new(table))
}

fn random_entries(seed: u64, n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut map = BTreeMap::new();
    while map.len() < n {
        let len = rng.gen_range(4..24);
        let key: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect();
        let value: Vec<u8> = format!("value-{}", map.len()).into_bytes();
        map.insert(key, value);
    }
    map.into_iter().collect()
}

#[test]
fn test_reopen_scan_and_point_lookups() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let path = temp_dir.path().join("big.sst");

    let mut options = Options::default();
    options.block_size = 512;
    options.filter_policy = Some(Arc::new(BloomFilterPolicy::default()));
    let options = Arc::new(options);

    let entries = random_entries(0xdb47, 1000);
    let table = build_table(&path, options.clone(), &entries)?;
    let read_options = ReadOptions::default();

    // Every inserted key resolves to its value.
    for (key, value) in &entries {
        let (found_key, found_value) = table
            .get(&read_options, key)?
            .unwrap_or_else(|| panic!("key {:?} missing", String::from_utf8_lossy(key)));
        assert_eq!(&found_key, key);
        assert_eq!(&found_value, value);
    }

    // Full forward scan returns the corpus in order.
    let mut iter = TableIter::new(table.clone(), read_options.clone());
    iter.seek_to_first();
    for (key, value) in &entries {
        assert!(iter.valid());
        assert_eq!(iter.key(), key.as_slice());
        assert_eq!(iter.value(), value.as_slice());
        iter.next();
    }
    assert!(!iter.valid());
    iter.status()?;

    // And backward in reverse order.
    iter.seek_to_last();
    for (key, _) in entries.iter().rev() {
        assert!(iter.valid());
        assert_eq!(iter.key(), key.as_slice());
        iter.prev();
    }
    assert!(!iter.valid());

    // Probes for absent keys never report a wrong hit.
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..500 {
        let len = rng.gen_range(4..24);
        let probe: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect();
        if entries.binary_search_by(|(k, _)| k.as_slice().cmp(&probe)).is_ok() {
            continue;
        }
        match table.get(&read_options, &probe)? {
            None => {}
            Some((key, _)) => assert!(key > probe),
        }
    }
    Ok(())
}

#[test]
fn test_reopen_with_checksum_verification() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let path = temp_dir.path().join("verified.sst");

    let mut options = Options::default();
    options.block_size = 256;
    options.compression = CompressionType::None;
    let options = Arc::new(options);

    let entries = random_entries(7, 300);
    let table = build_table(&path, options, &entries)?;

    let read_options = ReadOptions {
        verify_checksums: true,
        fill_cache: true,
    };
    let mut iter = TableIter::new(table.clone(), read_options);
    iter.seek_to_first();
    let mut count = 0;
    while iter.valid() {
        count += 1;
        iter.next();
    }
    iter.status()?;
    assert_eq!(count, entries.len());
    Ok(())
}

#[test]
fn test_merge_two_tables() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");

    let mut options = Options::default();
    options.block_size = 128;
    let options = Arc::new(options);

    let all = random_entries(42, 400);
    let even: Vec<_> = all.iter().step_by(2).cloned().collect();
    let odd: Vec<_> = all.iter().skip(1).step_by(2).cloned().collect();

    let left = build_table(&temp_dir.path().join("even.sst"), options.clone(), &even)?;
    let right = build_table(&temp_dir.path().join("odd.sst"), options.clone(), &odd)?;

    let mut iter = new_merging_iterator(
        options.comparator.clone(),
        vec![
            Box::new(TableIter::new(left.clone(), ReadOptions::default())),
            Box::new(TableIter::new(right.clone(), ReadOptions::default())),
        ],
    );

    iter.seek_to_first();
    for (key, value) in &all {
        assert!(iter.valid());
        assert_eq!(iter.key(), key.as_slice());
        assert_eq!(iter.value(), value.as_slice());
        iter.next();
    }
    assert!(!iter.valid());
    iter.status()?;

    // Seek into the middle, then walk both directions across sources.
    let (mid_key, _) = &all[all.len() / 2];
    iter.seek(mid_key);
    assert_eq!(iter.key(), mid_key.as_slice());
    iter.prev();
    assert_eq!(iter.key(), all[all.len() / 2 - 1].0.as_slice());
    iter.next();
    assert_eq!(iter.key(), mid_key.as_slice());
    Ok(())
}

#[test]
fn test_shared_cache_across_tables() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");

    let mut options = Options::default();
    options.block_size = 128;
    options.compression = CompressionType::None;
    let options = Arc::new(options);

    let entries = random_entries(3, 200);
    let a = build_table(&temp_dir.path().join("a.sst"), options.clone(), &entries)?;
    let b = build_table(&temp_dir.path().join("b.sst"), options.clone(), &entries)?;

    let read_options = ReadOptions::default();
    for table in [&a, &b] {
        let mut iter = TableIter::new(table.clone(), read_options.clone());
        iter.seek_to_first();
        while iter.valid() {
            iter.next();
        }
    }
    // Both tables parked blocks in the one shared cache under distinct
    // cache ids.
    assert!(options.block_cache.total_charge() > 0);

    for (key, value) in entries.iter().take(50) {
        assert_eq!(&a.get(&read_options, key)?.unwrap().1, value);
        assert_eq!(&b.get(&read_options, key)?.unwrap().1, value);
    }
    Ok(())
}

#[test]
fn test_table_survives_file_reread() -> Result<()> {
    // Opening the same bytes through a second handle yields the same
    // table; nothing in the reader depends on writer-side state.
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let path = temp_dir.path().join("twice.sst");

    let options = Arc::new(Options::default());
    let entries = random_entries(11, 100);
    let first = build_table(&path, options.clone(), &entries)?;
    drop(first);

    let file = File::open(&path)?;
    let size = file.metadata()?.len();
    let mut probe = vec![0u8; 8];
    file.read_exact_at(size - 8, &mut probe)?;

    let table = Arc::new(Table::open(options, Box::new(file), size)?);
    let read_options = ReadOptions::default();
    for (key, value) in &entries {
        assert_eq!(&table.get(&read_options, key)?.unwrap().1, value);
    }
    Ok(())
}

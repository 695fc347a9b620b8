use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use chain_hash::FrozenMap;
use chain_hash::HashTable;
use chain_hash::hash_table::Entry;
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Percentage of entries removed and replaced after the initial fill.
    #[arg(short = 'r', long = "churn_percent", default_value_t = 25)]
    churn_percent: usize,
}

fn hash_u64(value: u64) -> i32 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    let hash = hasher.finish();
    (hash ^ (hash >> 32)) as i32
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashTable with target capacity: {}",
        args.target_capacity
    );

    let mut table: HashTable<u64, u64> = HashTable::with_capacity(args.target_capacity);

    println!("Actual capacity: {}", table.capacity());
    println!("Filling table with u64 values...");

    let mut num_failures = 0;
    let num_values = table.capacity() + table.capacity() / 10;
    for i in 0..num_values {
        let value = i as u64;
        let hash = hash_u64(value);

        match table.entry(hash, |&v| v == value) {
            Entry::Vacant(entry) => {
                if let Err(err) = entry.try_insert(value, value * 2) {
                    num_failures += 1;
                    let (key, value) = err.into_inner();
                    table.entry(hash, |&v| v == key).or_insert(key, value);
                }
            }
            Entry::Occupied(_) => {
                panic!("Value already exists in table: {}", value);
            }
        }
    }

    println!("Inserted {} values into table", table.len());
    println!(
        "Inserts that needed growth: {} ({:.02}%)",
        num_failures,
        num_failures as f64 / num_values as f64 * 100.0
    );
    table.debug_stats().print();

    let churn = table.len() * args.churn_percent / 100;
    println!("Removing and replacing {} entries...", churn);
    for i in 0..churn {
        let value = i as u64;
        table.remove(hash_u64(value), |&v| v == value);
    }
    let used_before = table.used_slots();
    for i in 0..churn {
        let value = (num_values + i) as u64;
        let hash = hash_u64(value);
        table.entry(hash, |&v| v == value).or_insert(value, value * 2);
    }
    println!(
        "Slot high-water mark before/after refill: {}/{}",
        used_before,
        table.used_slots()
    );
    table.debug_stats().print();

    println!("Chain length histogram:");
    for (length, buckets) in table.chain_length_histogram().iter().enumerate() {
        if *buckets > 0 {
            println!("  {:>3}: {}", length, buckets);
        }
    }

    let frozen: FrozenMap<u64, u64> = table.into_iter().collect();
    println!("Froze {} entries", frozen.len());
    if let Some(stats) = frozen.frozen_stats() {
        stats.print();
    }
}

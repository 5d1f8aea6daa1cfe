//! `mweave kb` -- knowledge store maintenance.

use std::collections::BTreeMap;

use comfy_table::{Table, presets::UTF8_FULL};

use mathweave_core::knowledge::KnowledgeStore;
use mathweave_core::knowledge::seeds::seed_store;
use mathweave_types::knowledge::{KnowledgeEntry, KnowledgeQuery, Provenance};

use super::{GlobalOpts, Paths, open_store, resolve_config};

/// Add the curated entries. Entries already present are skipped.
pub async fn kb_seed(opts: &GlobalOpts) -> anyhow::Result<()> {
    let paths = Paths::discover();
    let config = resolve_config(opts, &paths)?;
    let store = open_store(&paths, &config).await?;
    let added = seed_store(store.as_ref(), &config.knowledge).await?;
    println!("Added {added} seed entries ({} total).", store.len().await);
    Ok(())
}

pub async fn kb_search(opts: &GlobalOpts, query: &str, limit: usize) -> anyhow::Result<()> {
    let paths = Paths::discover();
    let config = resolve_config(opts, &paths)?;
    let store = open_store(&paths, &config).await?;

    let results = store
        .search(&KnowledgeQuery {
            text: query.to_string(),
            category: None,
            k: limit,
        })
        .await?;
    if results.is_empty() {
        println!("No matching entries.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["SCORE", "CATEGORY", "STATEMENT", "SOLUTION"]);
    for scored in &results {
        let entry = &scored.entry;
        table.add_row([
            format!("{:.3}", scored.score),
            category_label(entry),
            truncate(&entry.statement, 50),
            truncate(&entry.canonical_solution, 60),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn kb_stats(opts: &GlobalOpts) -> anyhow::Result<()> {
    let paths = Paths::discover();
    let config = resolve_config(opts, &paths)?;
    let store = open_store(&paths, &config).await?;
    let entries = store.entries().await;

    let counts = tally(&entries);
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["CATEGORY", "SEEDED", "LEARNED"]);
    for (category, (seeded, learned)) in &counts {
        table.add_row([category.clone(), seeded.to_string(), learned.to_string()]);
    }
    println!("{table}");
    println!("{} entries in {}", entries.len(), paths.knowledge().display());
    Ok(())
}

fn category_label(entry: &KnowledgeEntry) -> String {
    entry
        .category
        .map(|c| c.to_string())
        .unwrap_or_else(|| "general".into())
}

/// Counts of `(seeded, learned)` per category label.
fn tally(entries: &[KnowledgeEntry]) -> BTreeMap<String, (usize, usize)> {
    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for entry in entries {
        let slot = counts.entry(category_label(entry)).or_default();
        match entry.provenance {
            Provenance::Seeded => slot.0 += 1,
            Provenance::Learned => slot.1 += 1,
        }
    }
    counts
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

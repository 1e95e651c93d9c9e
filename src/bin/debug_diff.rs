// Debug script to compare the local manifest with the raw device listing
// Writes .board-sync/comparison-report.txt next to the manifest

use std::collections::BTreeSet;
use std::fmt::Write;

use board_sync::arbiter::TaskOptions;
use board_sync::core::App;
use board_sync::device::{DeviceEntry, DeviceError};
use board_sync::operations::{DiffEngine, Manifest};
use board_sync::utilities::{paths, write_atomic, METADATA_DIR};
use board_sync::{logging, SyncError};

const REPORT_FILE: &str = "comparison-report.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::init(1) {
        eprintln!("failed to initialise logging: {}", e);
    }

    let app = App::open(None, None)?;
    let root = app.device_root().to_string();

    println!("=== WORKSPACE ===");
    println!("Local root:  {}", app.workspace_root.display());
    println!("Device root: {}", root);
    println!();

    let manifest = app.build_manifest().await?;
    println!("=== MANIFEST ({} files) ===", manifest.len());
    for (key, stat) in &manifest.files {
        println!("  {} ({} bytes)", key, stat.size);
    }
    println!();

    let listing_root = root.clone();
    let entries = app
        .arbiter()
        .run(TaskOptions::default(), move |transport| async move {
            match transport.stat_tree(&listing_root).await {
                Ok(entries) => Ok(entries),
                Err(DeviceError::NotFound(_)) => Ok(Vec::new()),
                Err(e) => Err(SyncError::from(e)),
            }
        })
        .await?;

    println!("=== DEVICE LISTING ({} entries) ===", entries.len());
    for entry in &entries {
        if entry.is_dir {
            println!("  {}/", entry.path);
        } else {
            println!("  {} ({} bytes)", entry.path, entry.size);
        }
    }
    println!();

    let engine = DiffEngine::new(app.ignore_matcher()?, root, app.config.compare_mode()?);
    let report = comparison_report(&manifest, &entries, &engine);
    print!("{}", report);

    let report_path = app.workspace_root.join(METADATA_DIR).join(REPORT_FILE);
    write_atomic(&report_path, report.as_bytes())?;
    println!();
    println!("Report written to {}", report_path.display());

    Ok(())
}

/// Matching, missing and extra files by path alone, plus the board's directories
fn comparison_report(manifest: &Manifest, entries: &[DeviceEntry], engine: &DiffEngine) -> String {
    let root = engine.device_root();
    let local: BTreeSet<String> = manifest
        .files
        .keys()
        .map(|key| paths::to_device_path(key, root))
        .collect();
    let device: BTreeSet<String> = engine.filter_device(entries).into_keys().collect();
    let dirs: BTreeSet<String> = entries
        .iter()
        .filter(|e| e.is_dir)
        .map(|e| paths::normalize_path(&e.path))
        .collect();

    let mut out = String::new();
    let sections: [(&str, Vec<&String>); 4] = [
        ("MATCHING FILES", local.intersection(&device).collect()),
        ("MISSING ON BOARD", local.difference(&device).collect()),
        ("EXTRA ON BOARD", device.difference(&local).collect()),
        ("BOARD DIRECTORIES", dirs.iter().collect()),
    ];
    for (title, paths) in sections {
        let _ = writeln!(out, "=== {} ({}) ===", title, paths.len());
        for path in paths {
            let _ = writeln!(out, "  {}", path);
        }
        out.push('\n');
    }
    out
}

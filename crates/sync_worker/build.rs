use std::env;
use std::fs;
use std::path::Path;

/// Кладёт config.toml из корня workspace рядом с собранным бинарником sync-worker
fn main() {
    println!("cargo:rerun-if-changed=../../config.toml");

    let (Ok(out_dir), Ok(profile)) = (env::var("OUT_DIR"), env::var("PROFILE")) else {
        return;
    };

    // OUT_DIR: target/<profile>/build/sync_worker-xxx/out
    let Some(target_dir) = Path::new(&out_dir)
        .ancestors()
        .find(|p| p.ends_with(&profile))
    else {
        println!("cargo:warning=target profile directory not found, config.toml not copied");
        return;
    };

    let workspace_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent());
    let Some(workspace_root) = workspace_root else {
        return;
    };

    let source_config = workspace_root.join("config.toml");
    let dest_config = target_dir.join("config.toml");

    if source_config.exists() {
        if let Err(e) = fs::copy(&source_config, &dest_config) {
            println!("cargo:warning=Failed to copy config.toml: {}", e);
        }
    } else {
        println!(
            "cargo:warning=config.toml not found at {:?}, the embedded default will be used",
            source_config
        );
    }
}

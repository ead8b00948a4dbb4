use adpilot_core::{config::Config, io, paths, store::Store};
use anyhow::Context;
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing adpilot in: {}", root.display());

    let dir = paths::adpilot_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let db = paths::db_path(root);
    let existed = db.exists();
    Store::open(&db).context("failed to open database")?;
    println!(
        "  {}  {}",
        if existed { "exists: " } else { "created:" },
        paths::DB_FILE
    );

    println!("\nNext: set the API token in $ADPILOT_API_TOKEN and add accounts to the config.");
    Ok(())
}

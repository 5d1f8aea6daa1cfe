//! `mweave config` -- display resolved configuration.

use super::{GlobalOpts, Paths, resolve_config};

/// Print the resolved configuration, defaults filled in, as TOML.
pub fn config_show(opts: &GlobalOpts) -> anyhow::Result<()> {
    let paths = Paths::discover();
    let config = resolve_config(opts, &paths)?;
    let rendered = toml::to_string_pretty(&config)?;
    println!("# state directory: {}", paths.home.display());
    println!("{rendered}");
    Ok(())
}

use std::path::Path;

use anyhow::{bail, Result};

use playurl::{ResolverConfig, ScriptSandbox};

use super::read_script;

pub fn cmd_check(config: &ResolverConfig, path: &Path, entry_point: Option<&str>) -> Result<()> {
    let source = read_script(path)?;
    let entry_point = entry_point.unwrap_or(&config.entry_point);

    match ScriptSandbox::load(&source, entry_point, config.sandbox_limits(), None) {
        Ok(sandbox) => {
            println!(
                "✅ Script OK: {} chars, entry point {}()",
                source.len(),
                sandbox.entry_point()
            );
            Ok(())
        }
        Err(err) => bail!("script check failed [{}]: {err}", err.kind()),
    }
}

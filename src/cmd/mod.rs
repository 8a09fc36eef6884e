pub mod check;
pub mod providers;
pub mod resolve;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

/// Read a script from a file, or from stdin when the path is `-`.
pub fn read_script(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("failed to read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read script {}", path.display()))
}

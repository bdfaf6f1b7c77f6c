//! Dump-config command - print the merged configuration

use crate::config::{Config, GlobalArgs};
use crate::error::Result;

/// Print the merged configuration as YAML, token redacted
pub fn run(args: &GlobalArgs) -> Result<()> {
    let config = Config::load(args)?;
    print!("{}", config.redacted().to_yaml()?);
    Ok(())
}

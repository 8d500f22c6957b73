// ABOUTME: Extensions command: boots the extension host and reports what it loaded.
// ABOUTME: Prints each extension's status followed by the composed plugin table.

use anyhow::Result;
use parley_ext::ExtensionHost;
use std::fmt::Write;

use crate::builtins;
use crate::config::Config;

pub async fn run(config: &Config) -> Result<()> {
    let host = ExtensionHost::initialize(
        &config.extensions,
        vec![builtins::core_plugin()],
        &builtins::resolver(),
    )
    .await;
    print!("{}", describe(&host)?);
    host.shutdown().await;
    Ok(())
}

/// Status report for a booted host
pub fn describe(host: &ExtensionHost) -> Result<String> {
    let mut out = String::new();

    writeln!(out, "Extensions:")?;
    let extensions = host.registry().all();
    if extensions.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for ext in extensions {
        write!(
            out,
            "  {:<16} {:<8} {}",
            ext.id(),
            ext.manifest.version,
            ext.status
        )?;
        if let Some(error) = &ext.error {
            write!(out, " ({error})")?;
        }
        writeln!(out)?;
    }

    let table = host.table();
    writeln!(out, "Routes:")?;
    for route in &table.routes {
        writeln!(out, "  {} {}", route.path, route.title)?;
    }
    writeln!(out, "Composer:")?;
    for widget in &table.composer {
        writeln!(out, "  {} {}", widget.id, widget.label)?;
    }
    if !table.tools.is_empty() {
        writeln!(out, "Tools:")?;
        for tool in &table.tools {
            writeln!(out, "  {} {}", tool.id, tool.label)?;
        }
    }
    writeln!(out, "Content:")?;
    for (slot, value) in &table.content {
        writeln!(out, "  {slot}: {value}")?;
    }
    let renderers: Vec<_> = table.renderers.iter().map(|r| r.name()).collect();
    writeln!(out, "Renderers: {}", renderers.join(", "))?;

    Ok(out)
}

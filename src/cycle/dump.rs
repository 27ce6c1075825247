//! Diagnostic dump of a cycle's computation caches.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::value_cache::ValueCache;
use crate::error::CycleResult;
use crate::graph::DependencyGraph;

/// Writes every value the graph touches, sorted by specification, one
/// `spec -> value` line each. Values never written are left out.
/// Returns the path written.
pub fn dump_cache(
    dir: &Path,
    cycle_id: &str,
    graph: &DependencyGraph,
    cache: &dyn ValueCache,
) -> CycleResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "{}-{}.txt",
        file_safe(cycle_id),
        file_safe(graph.calc_config())
    ));

    let mut lines = BTreeMap::new();
    for node in graph.topological_order() {
        for spec in node.inputs.iter().chain(node.outputs.iter()) {
            if lines.contains_key(spec) {
                continue;
            }
            if let Some(entry) = cache.get_value(spec) {
                lines.insert(spec.clone(), entry);
            }
        }
    }

    let mut out = BufWriter::new(fs::File::create(&path)?);
    for (spec, entry) in &lines {
        writeln!(out, "{} -> {}", spec, entry)?;
    }
    out.flush()?;

    tracing::info!(
        cycle_id = %cycle_id,
        calc_config = %graph.calc_config(),
        path = %path.display(),
        values = lines.len(),
        "Dumped computation cache"
    );
    Ok(path)
}

/// Directory used when none is configured.
pub fn default_dump_dir() -> PathBuf {
    std::env::temp_dir().join("xcalc-cache-dumps")
}

fn file_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

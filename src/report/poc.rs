//! PoC document files

use crate::error::Result;
use crate::models::PocDocument;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes every PoC to `<dir>/<prefix>-<n>.html`, numbering from 1
pub fn write_all(pocs: &[PocDocument], dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if pocs.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(pocs.len());
    for (i, poc) in pocs.iter().enumerate() {
        let path = dir.join(format!("{prefix}-{}.html", i + 1));
        std::fs::write(&path, &poc.markup)?;
        written.push(path);
    }
    info!("{} PoC documents saved to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;

    fn poc(markup: &str) -> PocDocument {
        PocDocument {
            id: "p".to_string(),
            finding_id: "f".to_string(),
            form_key: "POST https://example.com/a [x]".to_string(),
            action: "https://example.com/a".to_string(),
            method: HttpMethod::Post,
            fields: vec![("x".to_string(), "1".to_string())],
            markup: markup.to_string(),
            auto_submit: true,
            malicious: false,
        }
    }

    #[test]
    fn test_write_all() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("example.com");
        let paths = write_all(&[poc("<p>one</p>"), poc("<p>two</p>")], &out, "csrf-poc")
            .expect("write pocs");

        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("csrf-poc-2.html"));
        let second = std::fs::read_to_string(&paths[1]).expect("read poc");
        assert_eq!(second, "<p>two</p>");
    }

    #[test]
    fn test_nothing_to_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("untouched");
        assert!(write_all(&[], &out, "csrf-poc").expect("no-op").is_empty());
        assert!(!out.exists());
    }
}

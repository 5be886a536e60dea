//! Extracts plain text from an eligible file. Grounded on
//! `examples/original_source/backend/analyzer.py::extract_text`: `.txt` is
//! read as UTF-8 with lossy replacement of invalid bytes, `.pdf` is
//! concatenated page-by-page; anything else yields no text.

use std::path::Path;

pub fn extract_text(path: &Path) -> anyhow::Result<Option<String>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match ext.as_str() {
        "txt" => {
            let bytes = std::fs::read(path)?;
            Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
        }
        "pdf" => match pdf_extract::extract_text(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) => Err(anyhow::anyhow!("pdf extraction failed: {e}")),
        },
        _ => Ok(None),
    }
}

pub fn is_eligible(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    crate::config::is_supported_extension(&ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotfiles_are_ineligible() {
        assert!(!is_eligible(Path::new("/root/.hidden.txt")));
    }

    #[test]
    fn unsupported_extension_is_ineligible() {
        assert!(!is_eligible(Path::new("/root/notes.md")));
    }

    #[test]
    fn txt_is_eligible() {
        assert!(is_eligible(Path::new("/root/notes.txt")));
    }

    #[test]
    fn extracts_txt_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();
        let text = extract_text(&path).unwrap().unwrap();
        assert_eq!(text, "hello world");
    }
}

//! Output directory layout.
//!
//! ```text
//! {output}/extracted_text/{doc_stem}.txt
//! {output}/extracted_images/{doc_stem}/page{N}_img{M}.{ext}
//! {output}/image_process/{sanitized_pdf_name}/{image_stem}_analysis.json
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn text_dir(&self) -> PathBuf {
        self.root.join("extracted_text")
    }

    pub fn text_path(&self, doc_stem: &str) -> PathBuf {
        self.text_dir().join(format!("{}.txt", doc_stem))
    }

    pub fn images_dir(&self, doc_stem: &str) -> PathBuf {
        self.root.join("extracted_images").join(doc_stem)
    }

    pub fn image_filename(page: u32, index: usize, ext: &str) -> String {
        format!("page{}_img{}.{}", page, index, ext)
    }

    pub fn analysis_path(&self, document_id: &str, image_path: &Path) -> PathBuf {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.root
            .join("image_process")
            .join(sanitize(document_id))
            .join(format!("{}_analysis.json", sanitize(&stem)))
    }

    /// Resolve a path recorded relative to the output root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

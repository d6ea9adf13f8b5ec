//! Filesystem-backed [`TemplateRenderer`].
//!
//! Templates are read through a `cap_std` directory handle, so a name can
//! never reach outside the configured template directory.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};
use tracing::debug;

use crate::domain::ports::{TemplateError, TemplateRenderer};
use crate::domain::substitute_placeholders;

/// Renders `${key}` templates stored as files in one directory.
#[derive(Clone)]
pub struct FileTemplateRenderer {
    directory: Arc<Dir>,
}

impl FileTemplateRenderer {
    /// Open `path` as the template root.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the directory cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        let directory = Dir::open_ambient_dir(path, ambient_authority())?;
        Ok(Self {
            directory: Arc::new(directory),
        })
    }

    fn load(directory: &Dir, name: &str) -> Result<String, TemplateError> {
        directory
            .read_to_string(Path::new(name))
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => TemplateError::not_found(name),
                _ => TemplateError::unreadable(name, err.to_string()),
            })
    }
}

#[async_trait]
impl TemplateRenderer for FileTemplateRenderer {
    async fn render(
        &self,
        name: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        let directory = Arc::clone(&self.directory);
        let owned_name = name.to_owned();
        let source = tokio::task::spawn_blocking(move || Self::load(&directory, &owned_name))
            .await
            .map_err(|err| TemplateError::unreadable(name, format!("read task failed: {err}")))??;
        debug!(template = name, bytes = source.len(), "template loaded");
        Ok(substitute_placeholders(&source, variables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn templates() -> (TempDir, FileTemplateRenderer) {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Dir::open_ambient_dir(dir.path(), ambient_authority()).expect("open dir");
        root.write(
            "activate_account.html",
            "<p>Hi ${name}</p><a href=\"/activate?token=${token}\">${missing}</a>",
        )
        .expect("write template");
        root.write("binary.html", [0xff_u8, 0xfe, 0x00])
            .expect("write binary");
        let renderer = FileTemplateRenderer::open(dir.path()).expect("renderer");
        (dir, renderer)
    }

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("name".to_owned(), "<alice>".to_owned()),
            ("token".to_owned(), "ab12".to_owned()),
        ])
    }

    #[rstest]
    #[tokio::test]
    async fn renders_escaped_values_and_keeps_unknown_placeholders(
        templates: (TempDir, FileTemplateRenderer),
    ) {
        let (_dir, renderer) = templates;
        let html = renderer
            .render("activate_account.html", &vars())
            .await
            .expect("rendered");
        assert_eq!(
            html,
            "<p>Hi &lt;alice&gt;</p><a href=\"/activate?token=ab12\">${missing}</a>"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn missing_template_is_not_found(templates: (TempDir, FileTemplateRenderer)) {
        let (_dir, renderer) = templates;
        let err = renderer
            .render("welcome.html", &vars())
            .await
            .expect_err("missing");
        assert_eq!(err, TemplateError::not_found("welcome.html"));
    }

    #[rstest]
    #[tokio::test]
    async fn non_utf8_template_is_unreadable(templates: (TempDir, FileTemplateRenderer)) {
        let (_dir, renderer) = templates;
        let err = renderer
            .render("binary.html", &vars())
            .await
            .expect_err("binary");
        assert!(matches!(err, TemplateError::Unreadable { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn names_cannot_escape_the_template_root(templates: (TempDir, FileTemplateRenderer)) {
        let (_dir, renderer) = templates;
        let result = renderer.render("../etc/passwd", &vars()).await;
        assert!(result.is_err());
    }
}

use std::path::{Path, PathBuf};

/// Maps a request path onto a file beneath `root`, refusing anything which
/// could escape it (`..`) or expose hidden files.
pub fn resolve_public_path(root: &Path, uri: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for segment in uri.split('/').filter(|s| !s.is_empty()) {
        if segment.starts_with('.') || segment.contains('\\') {
            return None;
        }

        resolved.push(segment);
    }

    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_beneath_root() {
        let root = Path::new("/srv/public");
        assert_eq!(
            resolve_public_path(root, "blog/feed.xml"),
            Some(PathBuf::from("/srv/public/blog/feed.xml"))
        );
        assert_eq!(
            resolve_public_path(root, "/blog//feed.xml"),
            Some(PathBuf::from("/srv/public/blog/feed.xml"))
        );
        assert_eq!(resolve_public_path(root, ""), Some(PathBuf::from("/srv/public")));
    }

    #[test]
    fn rejects_traversal() {
        let root = Path::new("/srv/public");
        assert_eq!(resolve_public_path(root, "../etc/passwd"), None);
        assert_eq!(resolve_public_path(root, "blog/../../secret"), None);
        assert_eq!(resolve_public_path(root, "blog\\..\\secret"), None);
    }

    #[test]
    fn rejects_hidden_files() {
        let root = Path::new("/srv/public");
        assert_eq!(resolve_public_path(root, ".env"), None);
        assert_eq!(resolve_public_path(root, "blog/.git/config"), None);
    }
}

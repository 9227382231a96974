use futures::future::BoxFuture;
use tracing::{debug, warn};
use super::errors::{Result, TransferError};
use super::task::{FileKind, RemoteFile};
use super::traits::FileLister;

/// Largest page the listing endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub catalogue: String,
    pub kind: Option<FileKind>,
    pub page_no: u32,
    pub page_size: u32,
}

/// One entry of a remote catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub kind: FileKind,
    pub size_in_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    pub total: u64,
}

/// A file found under an expanded folder, named relative to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedFile {
    pub file_id: String,
    pub file: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionFailure {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub files: Vec<ExpandedFile>,
    /// Sub-folders that could not be listed; their contents are missing
    pub failures: Vec<ExpansionFailure>,
}

/// Flatten the remote folder at `path` into its files.
///
/// File names are prefixed with `display_prefix` and the chain of sub-folders
/// below `path`. Failing to list `path` itself is an error; a failing
/// sub-folder is recorded in [`Expansion::failures`] and skipped.
pub async fn expand_directory(
    lister: &dyn FileLister,
    path: &str,
    display_prefix: &str,
    page_size: u32,
) -> Result<Expansion> {
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

    let expansion = expand_branch(lister, path.to_string(), display_prefix.to_string(), page_size)
        .await
        .map_err(|e| TransferError::Expansion {
            path: path.to_string(),
            message: e.task_reason(),
        })?;

    debug!(path, files = expansion.files.len(), failures = expansion.failures.len(), "directory expanded");
    Ok(expansion)
}

fn expand_branch<'a>(
    lister: &'a dyn FileLister,
    path: String,
    prefix: String,
    page_size: u32,
) -> BoxFuture<'a, Result<Expansion>> {
    Box::pin(async move {
        let mut expansion = Expansion::default();
        let mut page_no = 1;
        let mut seen: u64 = 0;

        loop {
            let query = ListQuery {
                catalogue: path.clone(),
                kind: None,
                page_no,
                page_size,
            };
            let page = lister.list_files(&query).await?;
            let count = page.entries.len();
            seen += count as u64;

            for entry in page.entries {
                let display_name = join_name(&prefix, &entry.name);

                if entry.kind == FileKind::Directory {
                    let child = join_path(&path, &entry.name);
                    match expand_branch(lister, child.clone(), display_name, page_size).await {
                        Ok(branch) => {
                            expansion.files.extend(branch.files);
                            expansion.failures.extend(branch.failures);
                        }
                        Err(e) => {
                            warn!(path = %child, error = %e, "failed to list sub-folder");
                            expansion.failures.push(ExpansionFailure {
                                path: child,
                                message: e.task_reason(),
                            });
                        }
                    }
                    continue;
                }

                expansion.files.push(ExpandedFile {
                    file_id: entry.id,
                    file: RemoteFile {
                        name: display_name,
                        size: entry.size_in_bytes,
                        kind: entry.kind,
                    },
                });
            }

            if count < page_size as usize || seen >= page.total {
                break;
            }
            page_no += 1;
        }

        Ok(expansion)
    })
}

fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{parent}/{name}")
}

fn join_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct MockLister {
        folders: HashMap<String, Vec<RemoteEntry>>,
        broken: HashSet<String>,
        calls: Mutex<Vec<ListQuery>>,
    }

    impl MockLister {
        fn folder(mut self, path: &str, entries: Vec<RemoteEntry>) -> Self {
            self.folders.insert(path.to_string(), entries);
            self
        }

        fn broken(mut self, path: &str) -> Self {
            self.broken.insert(path.to_string());
            self
        }
    }

    #[async_trait]
    impl FileLister for MockLister {
        async fn list_files(&self, query: &ListQuery) -> Result<ListPage> {
            self.calls.lock().push(query.clone());

            if self.broken.contains(&query.catalogue) {
                return Err(TransferError::api(500, "listing failed"));
            }

            let entries = self.folders.get(&query.catalogue).cloned().unwrap_or_default();
            let total = entries.len() as u64;
            let start = ((query.page_no - 1) * query.page_size) as usize;
            let page = entries
                .into_iter()
                .skip(start)
                .take(query.page_size as usize)
                .collect();

            Ok(ListPage { entries: page, total })
        }
    }

    fn file(id: &str, name: &str) -> RemoteEntry {
        RemoteEntry {
            id: id.into(),
            name: name.into(),
            kind: FileKind::from_file_name(name),
            size_in_bytes: 1024,
        }
    }

    fn dir(id: &str, name: &str) -> RemoteEntry {
        RemoteEntry {
            id: id.into(),
            name: name.into(),
            kind: FileKind::Directory,
            size_in_bytes: 0,
        }
    }

    fn names(expansion: &Expansion) -> Vec<&str> {
        expansion.files.iter().map(|f| f.file.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_expand_nested_folders() {
        let lister = MockLister::default()
            .folder("/docs", vec![file("1", "a.txt"), dir("2", "sub"), file("3", "b.pdf")])
            .folder("/docs/sub", vec![file("4", "c.png"), dir("5", "deep")])
            .folder("/docs/sub/deep", vec![file("6", "d.mp3")]);

        let expansion = expand_directory(&lister, "/docs", "docs", 100).await.unwrap();

        assert_eq!(names(&expansion), vec!["docs/a.txt", "docs/sub/c.png", "docs/sub/deep/d.mp3", "docs/b.pdf"]);
        assert_eq!(expansion.files[2].file_id, "6");
        assert_eq!(expansion.files[2].file.kind, FileKind::Audio);
        assert!(expansion.failures.is_empty());
    }

    #[tokio::test]
    async fn test_expand_empty_folder() {
        let lister = MockLister::default().folder("/empty", vec![]);
        let expansion = expand_directory(&lister, "/empty", "empty", 100).await.unwrap();
        assert!(expansion.files.is_empty());
        assert_eq!(lister.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_expand_pages_until_total() {
        let entries: Vec<_> = (0..5).map(|i| file(&i.to_string(), &format!("f{i}.txt"))).collect();
        let lister = MockLister::default().folder("/many", entries);

        let expansion = expand_directory(&lister, "/many", "", 2).await.unwrap();

        assert_eq!(expansion.files.len(), 5);
        assert_eq!(names(&expansion)[0], "f0.txt");
        let pages: Vec<u32> = lister.calls.lock().iter().map(|q| q.page_no).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_expand_exact_multiple_stops_on_total() {
        let entries: Vec<_> = (0..4).map(|i| file(&i.to_string(), &format!("f{i}.txt"))).collect();
        let lister = MockLister::default().folder("/even", entries);

        expand_directory(&lister, "/even", "", 2).await.unwrap();
        assert_eq!(lister.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_page_size_is_capped() {
        let lister = MockLister::default().folder("/", vec![file("1", "a")]);
        expand_directory(&lister, "/", "", 500).await.unwrap();

        let calls = lister.calls.lock();
        assert_eq!(calls[0].page_size, MAX_PAGE_SIZE);
        assert_eq!(calls[0].catalogue, "/");
    }

    #[tokio::test]
    async fn test_root_failure_is_error() {
        let lister = MockLister::default().broken("/gone");
        let err = expand_directory(&lister, "/gone", "gone", 100).await.unwrap_err();

        match err {
            TransferError::Expansion { path, message } => {
                assert_eq!(path, "/gone");
                assert_eq!(message, "listing failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_branch_keeps_siblings() {
        let lister = MockLister::default()
            .folder("/", vec![dir("1", "bad"), dir("2", "good"), file("3", "top.txt")])
            .folder("/good", vec![file("4", "ok.txt")])
            .broken("/bad");

        let expansion = expand_directory(&lister, "/", "", 100).await.unwrap();

        assert_eq!(names(&expansion), vec!["good/ok.txt", "top.txt"]);
        assert_eq!(expansion.failures, vec![ExpansionFailure {
            path: "/bad".into(),
            message: "listing failed".into(),
        }]);
    }
}

//! Album resolution.
//!
//! The media library is an external collaborator that answers "which files
//! belong to this album". The default implementation treats each immediate
//! subdirectory of a library root as an album.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

/// Album listing service.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Resolve `album` (exact name first, then a unique fuzzy match) and list
    /// its files as ordered `(directory, filename)` pairs.
    async fn list_album(&self, album: &str) -> Result<Vec<(PathBuf, String)>>;

    /// Directory that backs `album`. Ledgers use it for cross-matching and
    /// reporting.
    async fn album_dir(&self, album: &str) -> Result<PathBuf>;
}

/// Library rooted at a directory whose subdirectories are albums.
///
/// An album argument that is itself an existing directory is used as-is, so
/// `sync /path/to/export` works without a library root.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: Option<PathBuf>,
}

impl DirectoryLibrary {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, album: &str) -> Result<PathBuf> {
        let direct = Path::new(album);
        if direct.is_dir() {
            return std::fs::canonicalize(direct)
                .with_context(|| format!("Resolving album directory {}", direct.display()));
        }

        let Some(root) = &self.root else {
            bail!(
                "Album '{}' is not a directory and no --library-root was given",
                album
            );
        };

        let exact = root.join(album);
        if exact.is_dir() {
            return std::fs::canonicalize(&exact)
                .with_context(|| format!("Resolving album directory {}", exact.display()));
        }

        let names = album_names(root)?;
        match fuzzy_match(album, &names) {
            FuzzyMatch::One(name) => {
                tracing::info!(album, matched = %name, "Using fuzzy album match");
                let dir = root.join(name);
                std::fs::canonicalize(&dir)
                    .with_context(|| format!("Resolving album directory {}", dir.display()))
            }
            FuzzyMatch::None => bail!(
                "Album '{}' not found under {}. Available albums: {:?}",
                album,
                root.display(),
                names
            ),
            FuzzyMatch::Ambiguous(candidates) => bail!(
                "Album '{}' is ambiguous, candidates: {:?}",
                album,
                candidates
            ),
        }
    }
}

#[async_trait]
impl MediaLibrary for DirectoryLibrary {
    async fn list_album(&self, album: &str) -> Result<Vec<(PathBuf, String)>> {
        let dir = self.resolve(album)?;
        tokio::task::spawn_blocking(move || crate::media::list_directory(&dir)).await?
    }

    async fn album_dir(&self, album: &str) -> Result<PathBuf> {
        self.resolve(album)
    }
}

fn album_names(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("Reading library root {}", root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[derive(Debug, PartialEq, Eq)]
enum FuzzyMatch<'a> {
    One(&'a str),
    None,
    Ambiguous(Vec<&'a str>),
}

/// Case-insensitive match: a case-only difference wins outright, otherwise
/// the query must be a substring of exactly one album name.
fn fuzzy_match<'a>(query: &str, names: &'a [String]) -> FuzzyMatch<'a> {
    let query = query.to_lowercase();
    if let Some(name) = names.iter().find(|n| n.to_lowercase() == query) {
        return FuzzyMatch::One(name.as_str());
    }
    let candidates: Vec<&str> = names
        .iter()
        .filter(|n| n.to_lowercase().contains(&query))
        .map(String::as_str)
        .collect();
    match candidates.len() {
        0 => FuzzyMatch::None,
        1 => FuzzyMatch::One(candidates[0]),
        _ => FuzzyMatch::Ambiguous(candidates),
    }
}

/// Filesystem-safe slug used to name per-album state directories.
pub fn album_slug(album_dir: &Path) -> String {
    let name = album_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("album");
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        "album".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fuzzy_case_insensitive_exact() {
        let n = names(&["Summer 2024", "Summer 2024 extras"]);
        assert_eq!(fuzzy_match("summer 2024", &n), FuzzyMatch::One("Summer 2024"));
    }

    #[test]
    fn test_fuzzy_unique_substring() {
        let n = names(&["Summer 2024", "Winter"]);
        assert_eq!(fuzzy_match("wint", &n), FuzzyMatch::One("Winter"));
    }

    #[test]
    fn test_fuzzy_ambiguous_and_missing() {
        let n = names(&["Trip A", "Trip B"]);
        assert_eq!(
            fuzzy_match("trip", &n),
            FuzzyMatch::Ambiguous(vec!["Trip A", "Trip B"])
        );
        assert_eq!(fuzzy_match("zzz", &n), FuzzyMatch::None);
    }

    #[test]
    fn test_album_slug() {
        assert_eq!(album_slug(Path::new("/x/Summer 2024!")), "Summer_2024_");
        assert_eq!(album_slug(Path::new("/x/trip-1_a")), "trip-1_a");
    }

    #[tokio::test]
    async fn test_directory_library_resolves_by_name() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("Holiday Pics")).unwrap();
        std::fs::write(root.path().join("Holiday Pics").join("a.jpg"), b"x").unwrap();

        let lib = DirectoryLibrary::new(Some(root.path().to_path_buf()));
        let listed = lib.list_album("holiday").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1, "a.jpg");
        assert!(lib.album_dir("Holiday Pics").await.unwrap().ends_with("Holiday Pics"));
    }

    #[tokio::test]
    async fn test_directory_library_accepts_path() {
        let dir = TempDir::new().unwrap();
        let lib = DirectoryLibrary::new(None);
        let album = dir.path().to_str().unwrap().to_string();
        assert!(lib.list_album(&album).await.unwrap().is_empty());
        assert!(lib.list_album("definitely-not-here").await.is_err());
    }
}

// Path handling
// Pure helpers that normalise and split paths, plus the component-by-component
// walk from the root directory.

use phat_core::{BlockDevice, PhatError, PhatResult};

use crate::dir_cursor::DirItem;
use crate::volume::Volume;

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Segments of `path` after collapsing separators, dropping `.` and
/// resolving `..` against the segments before it.
pub fn components(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for segment in path.split(is_separator) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    parts
}

/// Absolute form of `path`; the root is "/".
pub fn normalize_path(path: &str) -> String {
    format!("/{}", components(path).join("/"))
}

/// The directory containing `path`. The root is its own parent.
pub fn parent_path(path: &str) -> String {
    let parts = components(path);
    match parts.split_last() {
        Some((_, parents)) => format!("/{}", parents.join("/")),
        None => "/".to_string(),
    }
}

/// Last component of `path`, empty for the root.
pub fn file_name(path: &str) -> &str {
    components(path).last().copied().unwrap_or("")
}

/// Outcome of walking a path down to its last component.
#[derive(Debug, Clone)]
pub(crate) enum Lookup {
    Root,
    Found { parent: u32, item: DirItem },
    Missing { parent: u32, name: String },
}

impl<D: BlockDevice> Volume<D> {
    /// Walk `path` from the root. Every component but the last must be an
    /// existing directory.
    pub(crate) fn lookup(&mut self, path: &str) -> PhatResult<Lookup> {
        let parts = components(path);
        let Some((last, dirs)) = parts.split_last() else {
            return Ok(Lookup::Root);
        };

        let mut dir = self.root_start();
        for (depth, name) in dirs.iter().enumerate() {
            let walked = || format!("/{}", parts[..=depth].join("/"));
            match self.find_entry(dir, name)? {
                Some(item) if item.is_directory() => dir = self.dir_start_for(item.first_cluster()),
                Some(_) => return Err(PhatError::NotADirectory(walked())),
                None => return Err(PhatError::DirectoryNotFound(walked())),
            }
        }

        Ok(match self.find_entry(dir, last)? {
            Some(item) => Lookup::Found { parent: dir, item },
            None => Lookup::Missing {
                parent: dir,
                name: last.to_string(),
            },
        })
    }

    /// Start cluster of the directory at `path`.
    pub(crate) fn resolve_dir(&mut self, path: &str) -> PhatResult<u32> {
        match self.lookup(path)? {
            Lookup::Root => Ok(self.root_start()),
            Lookup::Found { item, .. } if item.is_directory() => Ok(self.dir_start_for(item.first_cluster())),
            Lookup::Found { .. } => Err(PhatError::NotADirectory(normalize_path(path))),
            Lookup::Missing { .. } => Err(PhatError::DirectoryNotFound(normalize_path(path))),
        }
    }
}

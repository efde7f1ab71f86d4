use super::{Host, Hosts, LookupError, Resource, normalize_host};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Serves `<root>/<host>/<path>` from the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryHosts {
    root: Arc<PathBuf>,
}

impl DirectoryHosts {
    /// Opens a content root. The directory must exist.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Hosts for DirectoryHosts {
    type Host = DirectoryHost;

    fn resolve(&self, host: &str) -> Result<DirectoryHost, LookupError> {
        let name = normalize_host(host);
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
            && !name.starts_with('.');
        if !valid {
            return Err(LookupError::UnknownHost(name));
        }

        let dir = self.root.join(&name);
        if !dir.is_dir() {
            return Err(LookupError::UnknownHost(name));
        }
        Ok(DirectoryHost { dir })
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryHost {
    dir: PathBuf,
}

impl Host for DirectoryHost {
    fn fetch(&self, path: &str) -> Result<Resource, LookupError> {
        let mut file = self.dir.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let mut parts = Path::new(segment).components();
            match (parts.next(), parts.next()) {
                (Some(Component::Normal(part)), None) => file.push(part),
                _ => return Err(LookupError::NotFound(path.to_string())),
            }
        }
        if file.is_dir() {
            file.push("index.html");
        }

        match std::fs::read(&file) {
            Ok(body) => Ok(Resource::new(&file.to_string_lossy(), body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(LookupError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

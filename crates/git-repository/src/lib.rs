//! Repository layout: the git directory, its object database, its refs
//! and the part of its config that names remotes.

pub mod config;
mod error;

pub use config::Config;
pub use error::RepoError;

use std::fs;
use std::path::{Path, PathBuf};

use git_hash::{HashAlgorithm, ObjectId};
use git_odb::ObjectDatabase;
use git_ref::{RefName, RefStore};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub bare: bool,
    pub hash_algorithm: HashAlgorithm,
    /// Branch HEAD points at in the new repository.
    pub initial_head: String,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            bare: false,
            hash_algorithm: HashAlgorithm::Sha1,
            initial_head: "main".into(),
        }
    }
}

/// A remote as recorded in `[remote "<name>"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
    /// Fetch refspecs, in config order.
    pub fetch: Vec<String>,
    pub push: Vec<String>,
}

impl Remote {
    /// The refspec `git clone` records for a remote.
    pub fn default_fetch_refspec(name: &str) -> String {
        format!("+refs/heads/*:refs/remotes/{name}/*")
    }
}

pub struct Repository {
    git_dir: PathBuf,
    work_tree: Option<PathBuf>,
    odb: ObjectDatabase,
    refs: RefStore,
    config: Config,
    algo: HashAlgorithm,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.git_dir)
            .field("work_tree", &self.work_tree)
            .field("algo", &self.algo)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Create a repository at `path`: `path/.git` with `path` as work
    /// tree, or `path` itself when bare. Fails if one already exists.
    pub fn init(path: impl AsRef<Path>, options: &InitOptions) -> Result<Self, RepoError> {
        let path = path.as_ref();
        let (git_dir, work_tree) = if options.bare {
            (path.to_path_buf(), None)
        } else {
            (path.join(".git"), Some(path.to_path_buf()))
        };
        if git_dir.join("HEAD").exists() {
            return Err(RepoError::AlreadyExists(git_dir));
        }

        fs::create_dir_all(git_dir.join("refs").join("heads"))?;
        fs::create_dir_all(git_dir.join("refs").join("tags"))?;
        fs::create_dir_all(git_dir.join("info"))?;
        let odb = ObjectDatabase::init(git_dir.join("objects"), options.hash_algorithm)?;

        let mut config = Config::load(git_dir.join("config"))?;
        let version = match options.hash_algorithm {
            HashAlgorithm::Sha1 => "0",
            HashAlgorithm::Sha256 => "1",
        };
        config.set("core", None, "repositoryformatversion", version);
        config.set("core", None, "filemode", if cfg!(unix) { "true" } else { "false" });
        config.set("core", None, "bare", if options.bare { "true" } else { "false" });
        if options.hash_algorithm != HashAlgorithm::Sha1 {
            config.set("extensions", None, "objectformat", options.hash_algorithm.name());
        }
        config.save()?;

        let refs = RefStore::new(&git_dir);
        refs.write_symbolic(&RefName::head(), &RefName::branch(&options.initial_head)?)?;
        debug!(git_dir = %git_dir.display(), bare = options.bare, algo = %options.hash_algorithm, "initialized repository");

        Ok(Self {
            git_dir,
            work_tree,
            odb,
            refs,
            config,
            algo: options.hash_algorithm,
        })
    }

    /// Open the repository whose git directory or work tree is `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let path = path.as_ref();
        let (git_dir, work_tree) = if is_git_dir(path) {
            (path.to_path_buf(), None)
        } else if is_git_dir(&path.join(".git")) {
            (path.join(".git"), Some(path.to_path_buf()))
        } else {
            return Err(RepoError::NotFound(path.to_path_buf()));
        };

        let config = Config::load(git_dir.join("config"))?;
        let algo = match config.get("extensions", None, "objectformat") {
            None => HashAlgorithm::Sha1,
            Some(name) => HashAlgorithm::from_name(name)
                .ok_or_else(|| RepoError::UnsupportedFormat(format!("object format '{name}'")))?,
        };
        // A bare repository may still have been opened through a parent.
        let work_tree = match config.get_bool("core", None, "bare") {
            Some(true) => None,
            _ => work_tree,
        };

        Ok(Self {
            odb: ObjectDatabase::open(git_dir.join("objects"), algo)?,
            refs: RefStore::new(&git_dir),
            git_dir,
            work_tree,
            config,
            algo,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn work_tree(&self) -> Option<&Path> {
        self.work_tree.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.work_tree.is_none()
    }

    pub fn odb(&self) -> &ObjectDatabase {
        &self.odb
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    /// The commit HEAD resolves to, `None` while HEAD is unborn.
    pub fn head_id(&self) -> Result<Option<ObjectId>, RepoError> {
        Ok(self.refs.resolve(&RefName::head())?)
    }

    pub fn remote(&self, name: &str) -> Result<Remote, RepoError> {
        let url = self
            .config
            .get("remote", Some(name), "url")
            .ok_or_else(|| RepoError::NoSuchRemote(name.to_string()))?;
        let strings = |key: &str| -> Vec<String> {
            self.config
                .get_all("remote", Some(name), key)
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        Ok(Remote {
            name: name.to_string(),
            url: url.to_string(),
            fetch: strings("fetch"),
            push: strings("push"),
        })
    }

    pub fn remote_names(&self) -> Vec<String> {
        self.config
            .subsections("remote")
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Record a remote with the default fetch refspec and save the config.
    pub fn add_remote(&mut self, name: &str, url: &str) -> Result<Remote, RepoError> {
        self.config.set("remote", Some(name), "url", url);
        self.config.set("remote", Some(name), "fetch", &Remote::default_fetch_refspec(name));
        self.config.save()?;
        self.remote(name)
    }

    /// `[branch "<branch>"] remote/merge`: the upstream of a local branch.
    pub fn set_upstream(&mut self, branch: &str, remote: &str, merge: &RefName) -> Result<(), RepoError> {
        self.config.set("branch", Some(branch), "remote", remote);
        self.config.set("branch", Some(branch), "merge", merge.as_str());
        self.config.save()
    }

    /// Remote and remote ref a local branch tracks, if configured.
    pub fn upstream(&self, branch: &str) -> Option<(String, String)> {
        let remote = self.config.get("branch", Some(branch), "remote")?;
        let merge = self.config.get("branch", Some(branch), "merge")?;
        Some((remote.to_string(), merge.to_string()))
    }
}

fn is_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir() && path.join("refs").is_dir()
}

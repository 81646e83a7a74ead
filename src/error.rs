use thiserror::Error;

pub type Result<T> = std::result::Result<T, GcontribError>;

#[derive(Error, Debug)]
pub enum GcontribError {
    #[error("Git command failed: {0}")]
    GitCommand(String),
    #[error("Git repository error: {0}")]
    GitRepo(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Background task failed: {0}")]
    Task(String),
    #[error("Object find error: {0}")]
    ObjectFind(#[from] Box<gix::object::find::existing::Error>),
    #[error("Commit error: {0}")]
    Commit(#[from] Box<gix::object::commit::Error>),
    #[error("Git discover error: {0}")]
    GitDiscover(#[from] Box<gix::discover::Error>),
}

impl GcontribError {
    /// Anomalies confined to a single commit, blame line or numstat line.
    /// Callers log and skip these instead of aborting the whole operation.
    pub fn is_item_level(&self) -> bool {
        matches!(self, GcontribError::Parse(_))
    }
}

impl From<gix::object::find::existing::Error> for GcontribError {
    fn from(err: gix::object::find::existing::Error) -> Self {
        GcontribError::ObjectFind(Box::new(err))
    }
}

impl From<gix::object::commit::Error> for GcontribError {
    fn from(err: gix::object::commit::Error) -> Self {
        GcontribError::Commit(Box::new(err))
    }
}

impl From<gix::discover::Error> for GcontribError {
    fn from(err: gix::discover::Error) -> Self {
        GcontribError::GitDiscover(Box::new(err))
    }
}

//! Run configuration
//!
//! A run is described by [`UpsertConfig`]: the connection target, the tables
//! to process, the staging and base schemas and the upsert policy. The same
//! structure is read from a YAML configuration file, overlaid by command-line
//! flags and finally by environment variables.
//!
//! ```yaml
//! host: localhost
//! database: library
//! user: loader
//! tables: [genres, books, authors, book_authors]
//! staging_schema: staging
//! base_schema: public
//! upsert_method: upsert
//! commit: true
//! exclude_columns: rev_time,rev_user
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{UpsertError, UpsertResult};

/// Environment variable for the database host
pub const ENV_HOST: &str = "PG_UPSERT_HOST";

/// Environment variable for the database port
pub const ENV_PORT: &str = "PG_UPSERT_PORT";

/// Environment variable for the database name
pub const ENV_DATABASE: &str = "PG_UPSERT_DATABASE";

/// Environment variable for the database user
pub const ENV_USER: &str = "PG_UPSERT_USER";

/// Environment variable for the database password
pub const ENV_PASSWORD: &str = "PG_UPSERT_PASSWORD";

/// libpq password variable, used when no password is configured
pub const ENV_PGPASSWORD: &str = "PGPASSWORD";

/// Default PostgreSQL port
pub const DEFAULT_PORT: u16 = 5432;

/// Keys accepted in a configuration file
const KNOWN_KEYS: &[&str] = &[
    "host",
    "port",
    "database",
    "user",
    "password",
    "tables",
    "staging_schema",
    "base_schema",
    "upsert_method",
    "commit",
    "interactive",
    "exclude_columns",
    "null_columns",
    "control_table",
    "logfile",
    "debug",
    "quiet",
];

/// How staging rows are merged into the base table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertMethod {
    /// Update matching rows, then insert new ones
    #[default]
    Upsert,
    /// Only update rows whose primary key exists in the base table
    Update,
    /// Only insert rows whose primary key is new
    Insert,
}

impl UpsertMethod {
    pub fn does_update(self) -> bool {
        matches!(self, UpsertMethod::Upsert | UpsertMethod::Update)
    }

    pub fn does_insert(self) -> bool {
        matches!(self, UpsertMethod::Upsert | UpsertMethod::Insert)
    }
}

impl std::str::FromStr for UpsertMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upsert" => Ok(UpsertMethod::Upsert),
            "update" => Ok(UpsertMethod::Update),
            "insert" => Ok(UpsertMethod::Insert),
            _ => Err(format!(
                "Invalid upsert method: {}. Must be one of: upsert, update, insert",
                s
            )),
        }
    }
}

impl std::fmt::Display for UpsertMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpsertMethod::Upsert => write!(f, "upsert"),
            UpsertMethod::Update => write!(f, "update"),
            UpsertMethod::Insert => write!(f, "insert"),
        }
    }
}

/// Configuration of one QA-and-upsert run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertConfig {
    /// Database host
    #[serde(default)]
    pub host: Option<String>,

    /// Database port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name
    #[serde(default)]
    pub database: Option<String>,

    /// Database user
    #[serde(default)]
    pub user: Option<String>,

    /// Database password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Tables to check and upsert
    #[serde(default, deserialize_with = "comma_or_list")]
    pub tables: Vec<String>,

    /// Schema holding the candidate rows
    #[serde(default = "default_staging_schema")]
    pub staging_schema: String,

    /// Schema holding the destination tables
    #[serde(default = "default_base_schema")]
    pub base_schema: String,

    #[serde(default)]
    pub upsert_method: UpsertMethod,

    /// Commit the transaction when the run succeeds
    #[serde(default)]
    pub commit: bool,

    /// Ask for confirmation before each change
    #[serde(default)]
    pub interactive: bool,

    /// Columns never written to base tables
    #[serde(default, deserialize_with = "comma_or_list")]
    pub exclude_columns: Vec<String>,

    /// Columns skipped by the not-null check
    #[serde(default, deserialize_with = "comma_or_list")]
    pub null_columns: Vec<String>,

    /// Name shown for the control table
    #[serde(default = "default_control_table")]
    pub control_table: String,

    /// Log file, replaced at the start of a run
    #[serde(default)]
    pub logfile: Option<String>,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub quiet: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_staging_schema() -> String {
    "staging".to_string()
}

fn default_base_schema() -> String {
    "public".to_string()
}

fn default_control_table() -> String {
    "ups_control".to_string()
}

/// Accept either a YAML sequence or a comma-separated string
fn comma_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CommaOrList {
        List(Vec<String>),
        Comma(String),
    }

    Ok(match Option::<CommaOrList>::deserialize(deserializer)? {
        Some(CommaOrList::List(items)) => items,
        Some(CommaOrList::Comma(s)) => split_list(&s),
        None => Vec::new(),
    })
}

/// Split a comma-separated list, dropping blank entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            database: None,
            user: None,
            password: None,
            tables: Vec::new(),
            staging_schema: default_staging_schema(),
            base_schema: default_base_schema(),
            upsert_method: UpsertMethod::default(),
            commit: false,
            interactive: false,
            exclude_columns: Vec::new(),
            null_columns: Vec::new(),
            control_table: default_control_table(),
            logfile: None,
            debug: false,
            quiet: false,
        }
    }
}

impl UpsertConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a YAML string
    ///
    /// Unknown keys are logged and ignored.
    pub fn parse(content: &str) -> UpsertResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| UpsertError::Config(format!("Failed to parse config: {}", e)))?;

        let mut mapping = match value {
            serde_yaml::Value::Mapping(mapping) => mapping,
            serde_yaml::Value::Null => serde_yaml::Mapping::new(),
            _ => {
                return Err(UpsertError::Config(
                    "Failed to parse config: expected a mapping of settings".to_string(),
                ));
            }
        };

        let unknown: Vec<serde_yaml::Value> = mapping
            .keys()
            .filter(|k| !k.as_str().is_some_and(|k| KNOWN_KEYS.contains(&k)))
            .cloned()
            .collect();
        for key in unknown {
            warn!(
                "Invalid configuration key will be ignored: {}",
                key.as_str().unwrap_or("<non-string key>")
            );
            mapping.remove(&key);
        }

        serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))
            .map_err(|e| UpsertError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> UpsertResult<Self> {
        if !path.exists() {
            return Err(UpsertError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpsertError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(ENV_HOST) {
            self.host = Some(host);
        }

        if let Ok(port) = std::env::var(ENV_PORT)
            && let Ok(port) = port.parse()
        {
            self.port = port;
        }

        if let Ok(database) = std::env::var(ENV_DATABASE) {
            self.database = Some(database);
        }

        if let Ok(user) = std::env::var(ENV_USER) {
            self.user = Some(user);
        }

        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            self.password = Some(password);
        } else if self.password.is_none()
            && let Ok(password) = std::env::var(ENV_PGPASSWORD)
        {
            self.password = Some(password);
        }
    }

    /// Build a key/value connection string for the configured target
    pub fn connection_string(&self) -> UpsertResult<String> {
        fn required<'a>(value: &'a Option<String>, what: &str) -> UpsertResult<&'a str> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| UpsertError::Config(format!("Database {} is required.", what)))
        }

        let mut parts = vec![
            format!("host={}", quote_conn_value(required(&self.host, "host")?)),
            format!("port={}", self.port),
            format!(
                "dbname={}",
                quote_conn_value(required(&self.database, "name")?)
            ),
            format!("user={}", quote_conn_value(required(&self.user, "user")?)),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote_conn_value(password)));
        }
        Ok(parts.join(" "))
    }

    /// Check the settings every run needs
    pub fn validate(&self) -> UpsertResult<()> {
        match (
            self.base_schema.trim().is_empty(),
            self.staging_schema.trim().is_empty(),
        ) {
            (true, true) => {
                return Err(UpsertError::Config(
                    "Base and staging schemas are required.".to_string(),
                ));
            }
            (true, false) => {
                return Err(UpsertError::Config("Base schema is required.".to_string()));
            }
            (false, true) => {
                return Err(UpsertError::Config(
                    "Staging schema is required.".to_string(),
                ));
            }
            (false, false) => {}
        }

        if self.base_schema == self.staging_schema {
            return Err(UpsertError::Config(format!(
                "Base and staging schemas cannot be the same: {}",
                self.base_schema
            )));
        }

        if self.tables.iter().all(|t| t.trim().is_empty()) {
            return Err(UpsertError::Config(
                "One or more table names are required.".to_string(),
            ));
        }

        Ok(())
    }
}

/// Quote a value for a key/value connection string
fn quote_conn_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpsertConfig::new();
        assert_eq!(config.port, 5432);
        assert_eq!(config.staging_schema, "staging");
        assert_eq!(config.base_schema, "public");
        assert_eq!(config.upsert_method, UpsertMethod::Upsert);
        assert_eq!(config.control_table, "ups_control");
        assert!(!config.commit);
    }

    #[test]
    fn test_upsert_method_branches() {
        assert!(UpsertMethod::Upsert.does_update() && UpsertMethod::Upsert.does_insert());
        assert!(UpsertMethod::Update.does_update() && !UpsertMethod::Update.does_insert());
        assert!(!UpsertMethod::Insert.does_update() && UpsertMethod::Insert.does_insert());
        assert!("merge".parse::<UpsertMethod>().is_err());
        assert_eq!("INSERT".parse::<UpsertMethod>().unwrap(), UpsertMethod::Insert);
    }

    #[test]
    fn test_parse_comma_lists() {
        let config = UpsertConfig::parse(
            "tables: genres, books\nexclude_columns: [rev_time, rev_user]\nnull_columns: alias\n",
        )
        .unwrap();
        assert_eq!(config.tables, vec!["genres", "books"]);
        assert_eq!(config.exclude_columns, vec!["rev_time", "rev_user"]);
        assert_eq!(config.null_columns, vec!["alias"]);
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let config = UpsertConfig::parse("host: db\nencoding: utf-8\n").unwrap();
        assert_eq!(config.host.as_deref(), Some("db"));
    }

    #[test]
    fn test_parse_rejects_bad_method() {
        assert!(UpsertConfig::parse("upsert_method: merge\n").is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = UpsertConfig::new();
        config.tables = vec!["books".to_string()];
        assert!(config.validate().is_ok());

        config.staging_schema = "public".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("cannot be the same"));

        config.staging_schema = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Staging schema is required"));

        config.staging_schema = "staging".to_string();
        config.tables = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_string() {
        let mut config = UpsertConfig::new();
        assert!(config.connection_string().is_err());

        config.host = Some("localhost".to_string());
        config.database = Some("library".to_string());
        config.user = Some("loader".to_string());
        config.password = Some("it's".to_string());
        assert_eq!(
            config.connection_string().unwrap(),
            "host='localhost' port=5432 dbname='library' user='loader' password='it\\'s'"
        );
    }
}

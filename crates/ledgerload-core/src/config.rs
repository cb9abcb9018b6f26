//! Process configuration
//!
//! Read once from the environment at startup. Writer and mapper variants
//! are typed enums with a constructor switch; configuration supplies the
//! variant tag. Missing required values and unparsable values are fatal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::mapper::{FileTableMapper, LoadEventMapper};
use crate::writer::{BackLinkStrategy, FieldMappedStrategy, RevisionStrategy};

pub const ENV_LEDGER_NAME: &str = "LEDGER_NAME";
pub const ENV_LEDGER_REGION: &str = "LEDGER_REGION";
pub const ENV_MAX_SESSIONS: &str = "MAX_SESSIONS_PER_LAMBDA";
pub const ENV_MAX_OCC_RETRIES: &str = "MAX_OCC_RETRIES";
pub const ENV_STRICT_MODE: &str = "STRICT_MODE";
pub const ENV_REVISION_WRITER: &str = "REVISION_WRITER";
pub const ENV_LOAD_EVENT_MAPPER: &str = "LOAD_EVENT_MAPPER";
pub const ENV_BEFORE_IMAGE_FIELD: &str = "BEFORE_IMAGE_FIELD_NAME";
pub const ENV_TABLE_MAPPINGS_FILE: &str = "TABLE_MAPPINGS_FILE";
pub const ENV_IDENTITY_FIELD_MAPPINGS: &str = "IDENTITY_FIELD_MAPPINGS";

pub const DEFAULT_BEFORE_IMAGE_FIELD: &str = "before-image";

/// Writer implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterKind {
    /// Revisions carry an `oldDocumentId` back-link (default).
    #[default]
    BackLink,
    /// A configured per-table identity field is queried instead.
    IdentityField,
}

impl FromStr for WriterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "back-link" => Ok(WriterKind::BackLink),
            "identity-field" => Ok(WriterKind::IdentityField),
            other => Err(ConfigError::InvalidVar {
                name: ENV_REVISION_WRITER,
                reason: format!("unknown writer {other:?}"),
            }),
        }
    }
}

/// Mapper implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapperKind {
    /// No translation; events arrive canonical (default).
    #[default]
    None,
    /// File-driven table/field mapping.
    File,
}

impl FromStr for MapperKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(MapperKind::None),
            "file" => Ok(MapperKind::File),
            other => Err(ConfigError::InvalidVar {
                name: ENV_LOAD_EVENT_MAPPER,
                reason: format!("unknown mapper {other:?}"),
            }),
        }
    }
}

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Target ledger identifier.
    pub ledger_name: String,
    /// Ledger's geographical region, when the endpoint needs one.
    pub ledger_region: Option<String>,
    /// Max concurrent transactions per writer instance.
    pub max_sessions: u32,
    /// Optimistic-concurrency retry ceiling.
    pub max_occ_retries: u32,
    /// Whether missing preconditions are failures (true) or skips (false).
    pub strict_mode: bool,
    pub revision_writer: WriterKind,
    pub load_event_mapper: MapperKind,
    /// Field holding the prior primary-key image on CDC records.
    pub before_image_field: String,
    /// Mapping definition consumed by the file mapper.
    pub table_mappings_file: Option<PathBuf>,
    /// `table -> field` lookup map for the identity-field writer.
    pub identity_field_mappings: HashMap<String, String>,
}

impl LoaderConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through an arbitrary lookup, for embedding
    /// and tests.
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let ledger_name = lookup(ENV_LEDGER_NAME)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar {
                name: ENV_LEDGER_NAME,
            })?;

        let ledger_region = lookup(ENV_LEDGER_REGION).filter(|v| !v.is_empty());

        let max_sessions = parse_or(&lookup, ENV_MAX_SESSIONS, 1)?;
        let max_occ_retries = parse_or(&lookup, ENV_MAX_OCC_RETRIES, 3)?;
        let strict_mode = parse_or(&lookup, ENV_STRICT_MODE, true)?;

        let revision_writer = match lookup(ENV_REVISION_WRITER) {
            Some(tag) => tag.parse()?,
            None => WriterKind::default(),
        };
        let load_event_mapper = match lookup(ENV_LOAD_EVENT_MAPPER) {
            Some(tag) => tag.parse()?,
            None => MapperKind::default(),
        };

        let before_image_field = lookup(ENV_BEFORE_IMAGE_FIELD)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BEFORE_IMAGE_FIELD.to_string());

        let table_mappings_file = lookup(ENV_TABLE_MAPPINGS_FILE)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let identity_field_mappings = match lookup(ENV_IDENTITY_FIELD_MAPPINGS) {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidVar {
                    name: ENV_IDENTITY_FIELD_MAPPINGS,
                    reason: e.to_string(),
                })?
            }
            _ => HashMap::new(),
        };

        Ok(LoaderConfig {
            ledger_name,
            ledger_region,
            max_sessions,
            max_occ_retries,
            strict_mode,
            revision_writer,
            load_event_mapper,
            before_image_field,
            table_mappings_file,
            identity_field_mappings,
        })
    }

    /// Constructor switch for the configured revision strategy.
    pub fn build_strategy(&self) -> Arc<dyn RevisionStrategy> {
        match self.revision_writer {
            WriterKind::BackLink => Arc::new(BackLinkStrategy::new()),
            WriterKind::IdentityField => {
                Arc::new(FieldMappedStrategy::new(self.identity_field_mappings.clone()))
            }
        }
    }

    /// Constructor switch for the configured mapper, if any.
    pub fn build_mapper(&self) -> Result<Option<Arc<dyn LoadEventMapper>>, ConfigError> {
        match self.load_event_mapper {
            MapperKind::None => Ok(None),
            MapperKind::File => {
                let path =
                    self.table_mappings_file
                        .as_ref()
                        .ok_or(ConfigError::MissingVar {
                            name: ENV_TABLE_MAPPINGS_FILE,
                        })?;
                Ok(Some(Arc::new(FileTableMapper::from_path(path)?)))
            }
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.is_empty() => raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(entries: &'a [(&'static str, &'a str)]) -> impl Fn(&'static str) -> Option<String> + 'a {
        move |name| {
            entries
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn ledger_name_is_required() {
        let err = LoaderConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar {
                name: ENV_LEDGER_NAME
            }
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = LoaderConfig::from_lookup(lookup(&[(ENV_LEDGER_NAME, "ledger")])).unwrap();
        assert_eq!(config.max_sessions, 1);
        assert_eq!(config.max_occ_retries, 3);
        assert!(config.strict_mode);
        assert_eq!(config.revision_writer, WriterKind::BackLink);
        assert_eq!(config.load_event_mapper, MapperKind::None);
        assert_eq!(config.before_image_field, "before-image");
    }

    #[test]
    fn variant_tags_parse_case_insensitively() {
        let config = LoaderConfig::from_lookup(lookup(&[
            (ENV_LEDGER_NAME, "ledger"),
            (ENV_REVISION_WRITER, "Identity-Field"),
            (ENV_LOAD_EVENT_MAPPER, "FILE"),
            (ENV_STRICT_MODE, "false"),
        ]))
        .unwrap();
        assert_eq!(config.revision_writer, WriterKind::IdentityField);
        assert_eq!(config.load_event_mapper, MapperKind::File);
        assert!(!config.strict_mode);
    }

    #[test]
    fn unknown_variant_tag_is_fatal() {
        let err = LoaderConfig::from_lookup(lookup(&[
            (ENV_LEDGER_NAME, "ledger"),
            (ENV_REVISION_WRITER, "reflective"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { .. }));
    }

    #[test]
    fn identity_field_mappings_parse_as_json_object() {
        let config = LoaderConfig::from_lookup(lookup(&[
            (ENV_LEDGER_NAME, "ledger"),
            (ENV_IDENTITY_FIELD_MAPPINGS, r#"{"Person":"GovId","*":"Id"}"#),
        ]))
        .unwrap();
        assert_eq!(
            config.identity_field_mappings.get("Person"),
            Some(&"GovId".to_string())
        );
        assert_eq!(config.identity_field_mappings.get("*"), Some(&"Id".to_string()));
    }

    #[test]
    fn file_mapper_requires_a_path() {
        let config = LoaderConfig::from_lookup(lookup(&[
            (ENV_LEDGER_NAME, "ledger"),
            (ENV_LOAD_EVENT_MAPPER, "file"),
        ]))
        .unwrap();
        assert!(matches!(
            config.build_mapper(),
            Err(ConfigError::MissingVar {
                name: ENV_TABLE_MAPPINGS_FILE
            })
        ));
    }
}

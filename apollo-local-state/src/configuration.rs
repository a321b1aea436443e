//! Logic for loading configuration in to an object model.
use std::collections::HashMap;
use std::str::FromStr;

use displaydoc::Display;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub(crate) const DEFAULT_PLAN_CACHE_LIMIT: usize = 512;
pub(crate) const DEFAULT_LOCAL_DIRECTIVE: &str = "client";

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_yaml::Error),
}

/// The configuration of a [`crate::LocalStateClient`].
///
/// Can be created through `serde::Deserialize` from various formats (see the [`FromStr`]
/// implementation for YAML), or inline in Rust code with [`Configuration::builder`].
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// What to do when a reference points to an entity that is not in the cache.
    pub(crate) missing_entities: MissingEntityPolicy,

    /// Plan caching configuration.
    pub(crate) plan_cache: PlanCaching,

    /// Name of the directive marking local-only fields.
    pub(crate) local_directive: String,

    /// Per-type identity configuration, keyed by type name.
    pub(crate) type_policies: HashMap<String, TypePolicy>,
}

/// Behavior on dangling references.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingEntityPolicy {
    /// The field is set to `null` and an error is added to the response.
    #[default]
    Nullify,
    /// The whole execution fails.
    Abort,
}

/// Plan caching configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct PlanCaching {
    /// Number of plans kept in memory.
    pub(crate) limit: usize,
}

impl Default for PlanCaching {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PLAN_CACHE_LIMIT,
        }
    }
}

/// How entities of one type are identified.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TypePolicy {
    /// Fields forming the identity key, in order.
    pub key_fields: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            missing_entities: Default::default(),
            plan_cache: Default::default(),
            local_directive: DEFAULT_LOCAL_DIRECTIVE.to_string(),
            type_policies: Default::default(),
        }
    }
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    fn new(
        missing_entities: Option<MissingEntityPolicy>,
        plan_cache_limit: Option<usize>,
        local_directive: Option<String>,
        type_policies: HashMap<String, TypePolicy>,
    ) -> Result<Self, ConfigurationError> {
        let configuration = Self {
            missing_entities: missing_entities.unwrap_or_default(),
            plan_cache: PlanCaching {
                limit: plan_cache_limit.unwrap_or(DEFAULT_PLAN_CACHE_LIMIT),
            },
            local_directive: local_directive
                .unwrap_or_else(|| DEFAULT_LOCAL_DIRECTIVE.to_string()),
            type_policies,
        };
        configuration.validate()
    }

    pub fn missing_entities(&self) -> MissingEntityPolicy {
        self.missing_entities
    }

    pub fn plan_cache_limit(&self) -> usize {
        self.plan_cache.limit
    }

    pub fn local_directive(&self) -> &str {
        &self.local_directive
    }

    pub fn type_policies(&self) -> &HashMap<String, TypePolicy> {
        &self.type_policies
    }

    /// The JSON schema of the configuration file.
    pub fn json_schema() -> RootSchema {
        let settings = SchemaSettings::draft07().with(|s| {
            s.option_nullable = true;
            s.option_add_null_type = false;
            s.inline_subschemas = true;
        });
        settings.into_generator().into_root_schema_for::<Configuration>()
    }

    pub(crate) fn validate(self) -> Result<Self, ConfigurationError> {
        if self.plan_cache.limit == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "plan cache limit must be greater than zero",
                error: "plan_cache.limit is 0".to_string(),
            });
        }
        if self.local_directive.is_empty() {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "local directive name cannot be empty",
                error: "local_directive is empty".to_string(),
            });
        }
        if let Some((type_name, _)) = self
            .type_policies
            .iter()
            .find(|(_, policy)| policy.key_fields.is_empty())
        {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "type policies need at least one key field",
                error: format!("{type_name} has no key_fields"),
            });
        }
        Ok(self)
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str::<Configuration>(s)
            .map_err(ConfigurationError::DeserializeConfigError)?
            .validate()
    }
}

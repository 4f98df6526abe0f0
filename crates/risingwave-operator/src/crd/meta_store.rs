use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use strum::{Display, EnumString};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("exactly one meta store backend must be set, found {found}"))]
    AmbiguousMetaStore { found: usize },
}

fn default_username_key() -> String {
    "username".to_owned()
}

fn default_password_key() -> String {
    "password".to_owned()
}

/// Selects a username and a password from a secret in the object's namespace.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretCredentials {
    pub secret_name: String,

    #[serde(default = "default_username_key")]
    pub username_key_ref: String,

    #[serde(default = "default_password_key")]
    pub password_key_ref: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBackend {
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretCredentials>,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteBackend {
    pub path: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlBackend {
    pub host: String,
    pub port: u16,
    pub database: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,

    pub credentials: SecretCredentials,
}

/// Where the meta nodes keep the cluster metadata. Exactly one field must be set.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaStoreBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd: Option<EtcdBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<SqliteBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<SqlBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgresql: Option<SqlBackend>,
}

/// A resolved view over [`MetaStoreBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaStore<'a> {
    Memory,
    Etcd(&'a EtcdBackend),
    Sqlite(&'a SqliteBackend),
    MySql(&'a SqlBackend),
    PostgreSql(&'a SqlBackend),
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumString,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
pub enum MetaStoreType {
    Memory,
    Etcd,
    #[serde(rename = "SQLite")]
    #[strum(serialize = "SQLite")]
    Sqlite,
    #[serde(rename = "MySQL")]
    #[strum(serialize = "MySQL")]
    MySql,
    #[serde(rename = "PostgreSQL")]
    #[strum(serialize = "PostgreSQL")]
    PostgreSql,
    #[default]
    Unknown,
}

impl MetaStoreBackend {
    pub fn resolve(&self) -> Result<MetaStore<'_>, Error> {
        let mut found = Vec::with_capacity(1);
        if self.memory == Some(true) {
            found.push(MetaStore::Memory);
        }
        if let Some(etcd) = &self.etcd {
            found.push(MetaStore::Etcd(etcd));
        }
        if let Some(sqlite) = &self.sqlite {
            found.push(MetaStore::Sqlite(sqlite));
        }
        if let Some(mysql) = &self.mysql {
            found.push(MetaStore::MySql(mysql));
        }
        if let Some(postgresql) = &self.postgresql {
            found.push(MetaStore::PostgreSql(postgresql));
        }

        match found.as_slice() {
            [one] => Ok(*one),
            _ => AmbiguousMetaStoreSnafu { found: found.len() }.fail(),
        }
    }

    pub fn store_type(&self) -> MetaStoreType {
        match self.resolve() {
            Ok(MetaStore::Memory) => MetaStoreType::Memory,
            Ok(MetaStore::Etcd(_)) => MetaStoreType::Etcd,
            Ok(MetaStore::Sqlite(_)) => MetaStoreType::Sqlite,
            Ok(MetaStore::MySql(_)) => MetaStoreType::MySql,
            Ok(MetaStore::PostgreSql(_)) => MetaStoreType::PostgreSql,
            Err(_) => MetaStoreType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("memory: true", MetaStoreType::Memory)]
    #[case("etcd: {endpoint: 'etcd:2388'}", MetaStoreType::Etcd)]
    #[case("sqlite: {path: /data/meta.db}", MetaStoreType::Sqlite)]
    #[case("memory: false", MetaStoreType::Unknown)]
    #[case("{}", MetaStoreType::Unknown)]
    #[case(
        indoc! {"
            memory: true
            sqlite:
              path: /data/meta.db
        "},
        MetaStoreType::Unknown
    )]
    fn store_type(#[case] input: &str, #[case] expected: MetaStoreType) {
        let backend: MetaStoreBackend = serde_yaml::from_str(input).unwrap();
        assert_eq!(backend.store_type(), expected);
    }

    #[test]
    fn sql_credentials_default_keys() {
        let backend: MetaStoreBackend = serde_yaml::from_str(indoc! {"
            postgresql:
              host: pg
              port: 5432
              database: rw
              credentials:
                secretName: pg-creds
        "})
        .unwrap();

        let Ok(MetaStore::PostgreSql(pg)) = backend.resolve() else {
            panic!("expected postgresql");
        };
        assert_eq!(pg.credentials.username_key_ref, "username");
        assert_eq!(pg.credentials.password_key_ref, "password");
        assert_eq!(MetaStoreType::PostgreSql.to_string(), "PostgreSQL");
    }
}

//! Environment variables pointing RisingWave at its meta store and state store.

use k8s_openapi::api::core::v1::EnvVar;
use snafu::ResultExt;

use super::{InvalidMetaStoreSnafu, InvalidStateStoreSnafu, Result};
use crate::{
    crd::{
        meta_store::{MetaStore, MetaStoreBackend, SqlBackend},
        state_store::{S3Backend, StateStore, StateStoreBackend},
    },
    utils::env::{env_from_secret, env_value},
};

pub const RW_STATE_STORE: &str = "RW_STATE_STORE";
pub const RW_DATA_DIRECTORY: &str = "RW_DATA_DIRECTORY";
pub const RW_BACKEND: &str = "RW_BACKEND";
pub const RW_ETCD_ENDPOINTS: &str = "RW_ETCD_ENDPOINTS";
pub const RW_ETCD_AUTH: &str = "RW_ETCD_AUTH";
pub const RW_ETCD_USERNAME: &str = "RW_ETCD_USERNAME";
pub const RW_ETCD_PASSWORD: &str = "RW_ETCD_PASSWORD";
pub const RW_SQL_ENDPOINT: &str = "RW_SQL_ENDPOINT";
pub const RW_SQL_USERNAME: &str = "RW_SQL_USERNAME";
pub const RW_SQL_PASSWORD: &str = "RW_SQL_PASSWORD";

pub const MINIO_USERNAME: &str = "MINIO_USERNAME";
pub const MINIO_PASSWORD: &str = "MINIO_PASSWORD";
pub const AWS_S3_BUCKET: &str = "AWS_S3_BUCKET";
pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const RW_S3_ENDPOINT: &str = "RW_S3_ENDPOINT";
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const AZBLOB_ENDPOINT: &str = "AZBLOB_ENDPOINT";
pub const AZBLOB_ACCOUNT_NAME: &str = "AZBLOB_ACCOUNT_NAME";
pub const AZBLOB_ACCOUNT_KEY: &str = "AZBLOB_ACCOUNT_KEY";
pub const OSS_ACCESS_KEY_ID: &str = "OSS_ACCESS_KEY_ID";
pub const OSS_ACCESS_KEY_SECRET: &str = "OSS_ACCESS_KEY_SECRET";
pub const OSS_REGION: &str = "OSS_REGION";
pub const OSS_ENDPOINT: &str = "OSS_ENDPOINT";
pub const OBS_ACCESS_KEY_ID: &str = "OBS_ACCESS_KEY_ID";
pub const OBS_SECRET_ACCESS_KEY: &str = "OBS_SECRET_ACCESS_KEY";
pub const OBS_REGION: &str = "OBS_REGION";
pub const OBS_ENDPOINT: &str = "OBS_ENDPOINT";

/// The hummock connection string and the variables it depends on.
pub fn state_store_env(backend: &StateStoreBackend, data_directory: &str) -> Result<Vec<EnvVar>> {
    let store = backend.resolve().context(InvalidStateStoreSnafu)?;

    let (url, mut env) = match store {
        StateStore::Memory => ("hummock+memory".to_owned(), Vec::new()),
        StateStore::LocalDisk(disk) => (format!("hummock+fs://{}", disk.root), Vec::new()),
        StateStore::MinIO(minio) => (
            format!(
                "hummock+minio://$({MINIO_USERNAME}):$({MINIO_PASSWORD})@{}/{}",
                minio.endpoint, minio.bucket
            ),
            vec![
                env_from_secret(
                    MINIO_USERNAME,
                    &minio.credentials.secret_name,
                    &minio.credentials.username_key_ref,
                ),
                env_from_secret(
                    MINIO_PASSWORD,
                    &minio.credentials.secret_name,
                    &minio.credentials.password_key_ref,
                ),
            ],
        ),
        StateStore::S3(s3) => (format!("hummock+s3://{}", s3.bucket), s3_env(s3)),
        StateStore::Gcs(gcs) => {
            let mut env = Vec::new();
            if let (false, Some(secret)) =
                (gcs.credentials.use_workload_identity, &gcs.credentials.secret_name)
            {
                env.push(env_from_secret(
                    GOOGLE_APPLICATION_CREDENTIALS,
                    secret,
                    &gcs.credentials.service_account_credentials_key_ref,
                ));
            }
            (with_root(format!("hummock+gcs://{}", gcs.bucket), gcs.root.as_deref()), env)
        }
        StateStore::AzureBlob(azblob) => {
            let mut env = vec![env_value(AZBLOB_ENDPOINT, &azblob.endpoint)];
            if let (false, Some(secret)) =
                (azblob.credentials.use_service_account, &azblob.credentials.secret_name)
            {
                env.push(env_from_secret(
                    AZBLOB_ACCOUNT_NAME,
                    secret,
                    &azblob.credentials.account_name_ref,
                ));
                env.push(env_from_secret(
                    AZBLOB_ACCOUNT_KEY,
                    secret,
                    &azblob.credentials.account_key_ref,
                ));
            }
            (
                with_root(format!("hummock+azblob://{}", azblob.container), azblob.root.as_deref()),
                env,
            )
        }
        StateStore::AliyunOss(oss) => {
            let credentials = &oss.credentials;
            let host = if oss.internal_endpoint {
                format!("https://oss-$({OSS_REGION})-internal.aliyuncs.com")
            } else {
                format!("https://oss-$({OSS_REGION}).aliyuncs.com")
            };
            let env = vec![
                env_from_secret(
                    OSS_ACCESS_KEY_ID,
                    &credentials.secret_name,
                    &credentials.access_key_id_ref,
                ),
                env_from_secret(
                    OSS_ACCESS_KEY_SECRET,
                    &credentials.secret_name,
                    &credentials.access_key_secret_ref,
                ),
                region_env(OSS_REGION, oss.region.as_deref(), &credentials.secret_name),
                env_value(OSS_ENDPOINT, host),
            ];
            (with_root(format!("hummock+oss://{}", oss.bucket), oss.root.as_deref()), env)
        }
        StateStore::HuaweiCloudObs(obs) => {
            let credentials = &obs.credentials;
            let env = vec![
                env_from_secret(
                    OBS_ACCESS_KEY_ID,
                    &credentials.secret_name,
                    &credentials.access_key_id_ref,
                ),
                env_from_secret(
                    OBS_SECRET_ACCESS_KEY,
                    &credentials.secret_name,
                    &credentials.access_key_secret_ref,
                ),
                region_env(OBS_REGION, obs.region.as_deref(), &credentials.secret_name),
                env_value(OBS_ENDPOINT, format!("https://obs.$({OBS_REGION}).myhuaweicloud.com")),
            ];
            (format!("hummock+obs://{}", obs.bucket), env)
        }
        StateStore::Hdfs(hdfs) => (
            with_root(format!("hummock+hdfs://{}", hdfs.name_node), hdfs.root.as_deref()),
            Vec::new(),
        ),
        StateStore::WebHdfs(hdfs) => (
            with_root(format!("hummock+webhdfs://{}", hdfs.name_node), hdfs.root.as_deref()),
            Vec::new(),
        ),
    };

    env.push(env_value(RW_STATE_STORE, url));
    env.push(env_value(RW_DATA_DIRECTORY, data_directory));
    Ok(env)
}

fn with_root(url: String, root: Option<&str>) -> String {
    match root {
        Some(root) if !root.is_empty() => format!("{url}@{root}"),
        _ => url,
    }
}

/// A literal region wins, otherwise it is read from the `Region` key of the credentials secret.
fn region_env(name: &str, region: Option<&str>, secret: &str) -> EnvVar {
    match region {
        Some(region) if !region.is_empty() => env_value(name, region),
        _ => env_from_secret(name, secret, "Region"),
    }
}

fn s3_env(s3: &S3Backend) -> Vec<EnvVar> {
    let credentials = &s3.credentials;
    let mut env = vec![env_value(AWS_S3_BUCKET, &s3.bucket)];

    match (&s3.region, &credentials.secret_name) {
        (Some(region), _) if !region.is_empty() => env.push(env_value(AWS_REGION, region)),
        (_, Some(secret)) => env.push(env_from_secret(AWS_REGION, secret, &credentials.region_ref)),
        _ => env.push(env_value(AWS_REGION, "us-east-1")),
    }

    if let (false, Some(secret)) = (credentials.use_service_account, &credentials.secret_name) {
        env.push(env_from_secret(AWS_ACCESS_KEY_ID, secret, &credentials.access_key_ref));
        env.push(env_from_secret(
            AWS_SECRET_ACCESS_KEY,
            secret,
            &credentials.secret_access_key_ref,
        ));
    }

    if let Some(endpoint) = s3.endpoint.as_deref().filter(|e| !e.is_empty()) {
        env.push(env_value(
            RW_S3_ENDPOINT,
            s3_endpoint(endpoint, s3.virtual_hosted_style),
        ));
    }
    env
}

/// Normalizes an S3-compatible endpoint.
///
/// Endpoints without a scheme get `https://`, explicit `http://` endpoints are kept as is. With
/// the virtual-hosted style the bucket is prepended to the host unless the endpoint already
/// places it. `${REGION}` and `${BUCKET}` are turned into references to the region and bucket
/// variables.
pub fn s3_endpoint(endpoint: &str, virtual_hosted_style: bool) -> String {
    let (scheme, host) = endpoint.split_once("://").unwrap_or(("https", endpoint));
    let host = if virtual_hosted_style && !host.contains("${BUCKET}") {
        format!("${{BUCKET}}.{host}")
    } else {
        host.to_owned()
    };

    format!("{scheme}://{host}")
        .replace("${REGION}", &format!("$({AWS_REGION})"))
        .replace("${BUCKET}", &format!("$({AWS_S3_BUCKET})"))
}

pub fn meta_store_env(backend: &MetaStoreBackend) -> Result<Vec<EnvVar>> {
    let store = backend.resolve().context(InvalidMetaStoreSnafu)?;

    let env = match store {
        MetaStore::Memory => vec![env_value(RW_BACKEND, "mem")],
        MetaStore::Etcd(etcd) => {
            let mut env = vec![
                env_value(RW_BACKEND, "etcd"),
                env_value(RW_ETCD_ENDPOINTS, &etcd.endpoint),
            ];
            if let Some(credentials) = &etcd.credentials {
                env.extend([
                    env_value(RW_ETCD_AUTH, "true"),
                    env_from_secret(
                        RW_ETCD_USERNAME,
                        &credentials.secret_name,
                        &credentials.username_key_ref,
                    ),
                    env_from_secret(
                        RW_ETCD_PASSWORD,
                        &credentials.secret_name,
                        &credentials.password_key_ref,
                    ),
                ]);
            }
            env
        }
        MetaStore::Sqlite(sqlite) => vec![
            env_value(RW_BACKEND, "sql"),
            env_value(RW_SQL_ENDPOINT, format!("sqlite://{}?mode=rwc", sqlite.path)),
        ],
        MetaStore::MySql(mysql) => sql_env("mysql", mysql),
        MetaStore::PostgreSql(postgresql) => sql_env("postgres", postgresql),
    };
    Ok(env)
}

fn sql_env(driver: &str, sql: &SqlBackend) -> Vec<EnvVar> {
    let options = sql
        .options
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut endpoint = format!(
        "{driver}://$({RW_SQL_USERNAME}):$({RW_SQL_PASSWORD})@{}:{}/{}",
        sql.host, sql.port, sql.database
    );
    if !options.is_empty() {
        endpoint.push('?');
        endpoint.push_str(&options);
    }

    vec![
        env_value(RW_BACKEND, "sql"),
        env_from_secret(
            RW_SQL_USERNAME,
            &sql.credentials.secret_name,
            &sql.credentials.username_key_ref,
        ),
        env_from_secret(
            RW_SQL_PASSWORD,
            &sql.credentials.secret_name,
            &sql.credentials.password_key_ref,
        ),
        env_value(RW_SQL_ENDPOINT, endpoint),
    ]
}

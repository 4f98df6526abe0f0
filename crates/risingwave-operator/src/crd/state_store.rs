use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use strum::{Display, EnumString};

use crate::consts::DEFAULT_DATA_DIRECTORY;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("exactly one state store backend must be set, found {found}"))]
    AmbiguousStateStore { found: usize },
}

macro_rules! default_key {
    ($name:ident, $value:literal) => {
        fn $name() -> String {
            $value.to_owned()
        }
    };
}

default_key!(default_username_key, "username");
default_key!(default_password_key, "password");
default_key!(default_access_key_ref, "AccessKeyID");
default_key!(default_secret_access_key_ref, "SecretAccessKey");
default_key!(default_region_ref, "Region");
default_key!(default_gcs_credentials_ref, "ServiceAccountCredentials");
default_key!(default_account_name_ref, "AccountName");
default_key!(default_account_key_ref, "AccountKey");
default_key!(default_access_key_id_ref, "AccessKeyID");
default_key!(default_access_key_secret_ref, "AccessKeySecret");

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinIOCredentials {
    pub secret_name: String,

    #[serde(default = "default_username_key")]
    pub username_key_ref: String,

    #[serde(default = "default_password_key")]
    pub password_key_ref: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinIOBackend {
    pub credentials: MinIOCredentials,
    pub endpoint: String,
    pub bucket: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Credentials {
    /// Use the service account token mounted into the pod. Secret and keys are ignored.
    #[serde(default)]
    pub use_service_account: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default = "default_access_key_ref")]
    pub access_key_ref: String,

    #[serde(default = "default_secret_access_key_ref")]
    pub secret_access_key_ref: String,

    /// Key of the region in the secret, used when no literal region is given.
    #[serde(default = "default_region_ref")]
    pub region_ref: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Backend {
    #[serde(default)]
    pub credentials: S3Credentials,

    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Endpoint of an S3-compatible service, empty for AWS S3. `${REGION}` and `${BUCKET}` are
    /// expanded, e.g. `${BUCKET}.s3.${REGION}.amazonaws.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Rewrite the endpoint into the virtual-hosted style (`BUCKET.host`).
    #[serde(default)]
    pub virtual_hosted_style: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsCredentials {
    #[serde(default)]
    pub use_workload_identity: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default = "default_gcs_credentials_ref")]
    pub service_account_credentials_key_ref: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsBackend {
    #[serde(default)]
    pub credentials: GcsCredentials,

    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureBlobCredentials {
    #[serde(default)]
    pub use_service_account: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default = "default_account_name_ref")]
    pub account_name_ref: String,

    #[serde(default = "default_account_key_ref")]
    pub account_key_ref: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureBlobBackend {
    #[serde(default)]
    pub credentials: AzureBlobCredentials,

    pub container: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    pub endpoint: String,
}

/// Access key pair shared by the Aliyun OSS and Huawei Cloud OBS backends.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeyCredentials {
    pub secret_name: String,

    #[serde(default = "default_access_key_id_ref", rename = "accessKeyIDRef")]
    pub access_key_id_ref: String,

    #[serde(default = "default_access_key_secret_ref")]
    pub access_key_secret_ref: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliyunOssBackend {
    pub credentials: AccessKeyCredentials,

    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Use the endpoint reachable only from inside the region's network.
    #[serde(default)]
    pub internal_endpoint: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HuaweiCloudObsBackend {
    pub credentials: AccessKeyCredentials,

    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HdfsBackend {
    pub name_node: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDiskBackend {
    pub root: String,
}

/// Where the streaming state lives. Exactly one backend field must be set.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStoreBackend {
    /// Directory inside the object store. Defaults to `hummock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_disk: Option<LocalDiskBackend>,

    #[serde(default, rename = "minio", skip_serializing_if = "Option::is_none")]
    pub minio: Option<MinIOBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Backend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsBackend>,

    #[serde(default, rename = "aliyunOSS", skip_serializing_if = "Option::is_none")]
    pub aliyun_oss: Option<AliyunOssBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_blob: Option<AzureBlobBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdfs: Option<HdfsBackend>,

    #[serde(default, rename = "webhdfs", skip_serializing_if = "Option::is_none")]
    pub webhdfs: Option<HdfsBackend>,

    #[serde(default, rename = "huaweiCloudOBS", skip_serializing_if = "Option::is_none")]
    pub huawei_cloud_obs: Option<HuaweiCloudObsBackend>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateStore<'a> {
    Memory,
    LocalDisk(&'a LocalDiskBackend),
    MinIO(&'a MinIOBackend),
    S3(&'a S3Backend),
    Gcs(&'a GcsBackend),
    AliyunOss(&'a AliyunOssBackend),
    AzureBlob(&'a AzureBlobBackend),
    Hdfs(&'a HdfsBackend),
    WebHdfs(&'a HdfsBackend),
    HuaweiCloudObs(&'a HuaweiCloudObsBackend),
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
pub enum StateStoreType {
    Memory,
    MinIO,
    S3,
    #[serde(rename = "GCS")]
    #[strum(serialize = "GCS")]
    Gcs,
    #[serde(rename = "AliyunOSS")]
    #[strum(serialize = "AliyunOSS")]
    AliyunOss,
    AzureBlob,
    #[serde(rename = "HDFS")]
    #[strum(serialize = "HDFS")]
    Hdfs,
    #[serde(rename = "WebHDFS")]
    #[strum(serialize = "WebHDFS")]
    WebHdfs,
    LocalDisk,
    #[serde(rename = "HuaweiCloudOBS")]
    #[strum(serialize = "HuaweiCloudOBS")]
    HuaweiCloudObs,
    #[default]
    Unknown,
}

impl StateStoreBackend {
    pub fn resolve(&self) -> Result<StateStore<'_>, Error> {
        let candidates = [
            (self.memory == Some(true)).then_some(StateStore::Memory),
            self.local_disk.as_ref().map(StateStore::LocalDisk),
            self.minio.as_ref().map(StateStore::MinIO),
            self.s3.as_ref().map(StateStore::S3),
            self.gcs.as_ref().map(StateStore::Gcs),
            self.aliyun_oss.as_ref().map(StateStore::AliyunOss),
            self.azure_blob.as_ref().map(StateStore::AzureBlob),
            self.hdfs.as_ref().map(StateStore::Hdfs),
            self.webhdfs.as_ref().map(StateStore::WebHdfs),
            self.huawei_cloud_obs.as_ref().map(StateStore::HuaweiCloudObs),
        ];
        let found: Vec<_> = candidates.into_iter().flatten().collect();

        match found.as_slice() {
            [one] => Ok(*one),
            _ => AmbiguousStateStoreSnafu { found: found.len() }.fail(),
        }
    }

    pub fn store_type(&self) -> StateStoreType {
        match self.resolve() {
            Ok(StateStore::Memory) => StateStoreType::Memory,
            Ok(StateStore::LocalDisk(_)) => StateStoreType::LocalDisk,
            Ok(StateStore::MinIO(_)) => StateStoreType::MinIO,
            Ok(StateStore::S3(_)) => StateStoreType::S3,
            Ok(StateStore::Gcs(_)) => StateStoreType::Gcs,
            Ok(StateStore::AliyunOss(_)) => StateStoreType::AliyunOss,
            Ok(StateStore::AzureBlob(_)) => StateStoreType::AzureBlob,
            Ok(StateStore::Hdfs(_)) => StateStoreType::Hdfs,
            Ok(StateStore::WebHdfs(_)) => StateStoreType::WebHdfs,
            Ok(StateStore::HuaweiCloudObs(_)) => StateStoreType::HuaweiCloudObs,
            Err(_) => StateStoreType::Unknown,
        }
    }

    pub fn data_directory(&self) -> &str {
        self.data_directory
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .unwrap_or(DEFAULT_DATA_DIRECTORY)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("memory: true", StateStoreType::Memory)]
    #[case("localDisk: {root: /data}", StateStoreType::LocalDisk)]
    #[case(
        "minio: {credentials: {secretName: s}, endpoint: 'minio:9000', bucket: b}",
        StateStoreType::MinIO
    )]
    #[case("s3: {bucket: b, region: us-east-1}", StateStoreType::S3)]
    #[case("gcs: {bucket: b}", StateStoreType::Gcs)]
    #[case("aliyunOSS: {credentials: {secretName: s}, bucket: b}", StateStoreType::AliyunOss)]
    #[case("azureBlob: {container: c, endpoint: 'https://a.blob'}", StateStoreType::AzureBlob)]
    #[case("hdfs: {nameNode: 'nn:9000'}", StateStoreType::Hdfs)]
    #[case("webhdfs: {nameNode: 'nn:9870'}", StateStoreType::WebHdfs)]
    #[case(
        "huaweiCloudOBS: {credentials: {secretName: s}, bucket: b}",
        StateStoreType::HuaweiCloudObs
    )]
    #[case("{}", StateStoreType::Unknown)]
    #[case("{memory: true, gcs: {bucket: b}}", StateStoreType::Unknown)]
    fn store_type(#[case] input: &str, #[case] expected: StateStoreType) {
        let backend: StateStoreBackend = serde_yaml::from_str(input).unwrap();
        assert_eq!(backend.store_type(), expected);
    }

    #[test]
    fn defaults() {
        let backend: StateStoreBackend = serde_yaml::from_str(indoc! {"
            aliyunOSS:
              credentials:
                secretName: oss
              bucket: b
        "})
        .unwrap();

        let Ok(StateStore::AliyunOss(oss)) = backend.resolve() else {
            panic!("expected aliyun oss");
        };
        assert_eq!(oss.credentials.access_key_id_ref, "AccessKeyID");
        assert_eq!(oss.credentials.access_key_secret_ref, "AccessKeySecret");
        assert_eq!(backend.data_directory(), "hummock");
    }
}

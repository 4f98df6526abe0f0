//! Client for the member service of RisingWave meta nodes.
//!
//! Only the `Members` call of `meta.MetaMemberService` is needed, so its messages are declared
//! here instead of being generated from the protobuf definitions.

use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use snafu::{ResultExt, Snafu};
use tonic::{
    IntoRequest,
    client::Grpc,
    codec::ProstCodec,
    transport::{Channel, Endpoint},
};

use crate::consts::{META_ROLE_FOLLOWER, META_ROLE_LEADER, META_ROLE_UNKNOWN};

const MEMBERS_PATH: &str = "/meta.MetaMemberService/Members";

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MembersRequest {}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct HostAddress {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MetaMember {
    #[prost(message, optional, tag = "1")]
    pub address: Option<HostAddress>,
    #[prost(bool, tag = "2")]
    pub is_leader: bool,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MembersResponse {
    #[prost(message, repeated, tag = "1")]
    pub members: Vec<MetaMember>,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid meta endpoint {address:?}"))]
    InvalidEndpoint {
        source: tonic::transport::Error,
        address: String,
    },

    #[snafu(display("failed to connect to {address}"))]
    Connect {
        source: tonic::transport::Error,
        address: String,
    },

    #[snafu(display("the connection to {address} is not ready"))]
    NotReady {
        source: tonic::transport::Error,
        address: String,
    },

    #[snafu(display("the members request to {address} failed"))]
    Request {
        source: tonic::Status,
        address: String,
    },

    #[snafu(display("the members request to {address} timed out after {timeout:?}"))]
    TimedOut { address: String, timeout: Duration },
}

/// Lists the members of the meta cluster as seen by one meta node.
#[async_trait]
pub trait MetaMemberClient: Send + Sync {
    async fn members(&self, host: &str, port: u16) -> Result<Vec<MetaMember>, Error>;
}

/// [`MetaMemberClient`] over a fresh gRPC connection per call.
#[derive(Clone, Debug)]
pub struct GrpcMetaMemberClient {
    timeout: Duration,
}

impl GrpcMetaMemberClient {
    /// `timeout` bounds the whole call, connecting included.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn call(&self, address: &str) -> Result<Vec<MetaMember>, Error> {
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .context(InvalidEndpointSnafu { address })?
            .connect_timeout(self.timeout);
        let channel: Channel = endpoint.connect().await.context(ConnectSnafu { address })?;

        let mut grpc = Grpc::new(channel);
        grpc.ready().await.context(NotReadySnafu { address })?;
        let response: tonic::Response<MembersResponse> = grpc
            .unary(
                MembersRequest {}.into_request(),
                PathAndQuery::from_static(MEMBERS_PATH),
                ProstCodec::default(),
            )
            .await
            .context(RequestSnafu { address })?;
        Ok(response.into_inner().members)
    }
}

#[async_trait]
impl MetaMemberClient for GrpcMetaMemberClient {
    async fn members(&self, host: &str, port: u16) -> Result<Vec<MetaMember>, Error> {
        let address = format!("{host}:{port}");
        match tokio::time::timeout(self.timeout, self.call(&address)).await {
            Ok(result) => result,
            Err(_) => TimedOutSnafu {
                address,
                timeout: self.timeout,
            }
            .fail(),
        }
    }
}

/// The role of a meta node in its cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaRole {
    Leader,
    Follower,
    Unknown,
}

impl MetaRole {
    /// The value of the meta role label.
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Leader => META_ROLE_LEADER,
            Self::Follower => META_ROLE_FOLLOWER,
            Self::Unknown => META_ROLE_UNKNOWN,
        }
    }

    /// The role of the node advertising `endpoint` on `port` among `members`.
    pub fn from_members(members: &[MetaMember], endpoint: &str, port: u16) -> Self {
        members
            .iter()
            .find(|member| {
                member.address.as_ref().is_some_and(|address| {
                    address.host == endpoint && address.port == i32::from(port)
                })
            })
            .map_or(Self::Unknown, |member| {
                if member.is_leader { Self::Leader } else { Self::Follower }
            })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn member(host: &str, port: i32, is_leader: bool) -> MetaMember {
        MetaMember {
            address: Some(HostAddress {
                host: host.to_owned(),
                port,
            }),
            is_leader,
        }
    }

    #[rstest]
    #[case("rw-meta-0.rw-meta", 5690, MetaRole::Leader)]
    #[case("rw-meta-1.rw-meta", 5690, MetaRole::Follower)]
    #[case("rw-meta-1.rw-meta", 5691, MetaRole::Unknown)]
    #[case("rw-meta-2.rw-meta", 5690, MetaRole::Unknown)]
    fn role_from_members(#[case] endpoint: &str, #[case] port: u16, #[case] expected: MetaRole) {
        let members = [
            member("rw-meta-0.rw-meta", 5690, true),
            member("rw-meta-1.rw-meta", 5690, false),
            MetaMember {
                address: None,
                is_leader: true,
            },
        ];
        assert_eq!(MetaRole::from_members(&members, endpoint, port), expected);
    }

    #[test]
    fn labels() {
        assert_eq!(MetaRole::Leader.as_label(), "leader");
        assert_eq!(MetaRole::Follower.as_label(), "follower");
        assert_eq!(MetaRole::Unknown.as_label(), "unknown");
    }

    #[tokio::test]
    async fn unreachable_node_fails() {
        let client = GrpcMetaMemberClient::new(Duration::from_millis(200));
        assert!(client.members("127.0.0.1", 1).await.is_err());
    }
}

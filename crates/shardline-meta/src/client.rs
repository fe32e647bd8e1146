//! Metadata client — member discovery and address lookup.
//!
//! [`MetadataClient`] is the narrow interface the connection manager
//! consumes. [`MetaClient`] implements it over the `MetaService` gRPC
//! API, connecting to the first reachable metadata endpoint.

use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info, warn};

use crate::error::{MetaError, MetaResult};
use crate::member::Member;
use crate::proto;
use crate::proto::meta_service_client::MetaServiceClient;
use crate::security::SecurityConfig;

/// Default bound on connecting to a single metadata endpoint.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read access to cluster membership.
#[tonic::async_trait]
pub trait MetadataClient: Send + Sync {
    /// List members, optionally leaving out tombstoned ones.
    async fn get_all_members(&self, exclude_tombstoned: bool) -> MetaResult<Vec<Member>>;

    /// Look up a single member (and therefore its address) by ID.
    async fn get_member(&self, member_id: u64) -> MetaResult<Member>;

    /// Release the connection to the metadata service.
    async fn close(&self);
}

/// gRPC metadata client.
pub struct MetaClient {
    /// Endpoint the client is attached to.
    addr: String,
    /// `None` once closed.
    client: RwLock<Option<MetaServiceClient<Channel>>>,
}

impl MetaClient {
    /// Connect to the first reachable address in `addrs`.
    ///
    /// Addresses without a scheme get `https://` when TLS is configured
    /// and `http://` otherwise.
    pub async fn connect(
        addrs: &[String],
        security: &SecurityConfig,
        connect_timeout: Duration,
    ) -> MetaResult<Self> {
        let tls = security.load_tls()?;
        Self::connect_with_tls(addrs, tls, connect_timeout).await
    }

    /// Like [`connect`](Self::connect) with TLS material already loaded.
    ///
    /// Malformed addresses are skipped like unreachable ones;
    /// `InvalidAddress` is returned only when no address parses.
    pub async fn connect_with_tls(
        addrs: &[String],
        tls: Option<ClientTlsConfig>,
        connect_timeout: Duration,
    ) -> MetaResult<Self> {
        let scheme = if tls.is_some() { "https" } else { "http" };

        let mut last_error = "no metadata addresses configured".to_string();
        let mut malformed = Vec::new();
        for addr in addrs {
            let uri = if addr.contains("://") {
                addr.clone()
            } else {
                format!("{scheme}://{addr}")
            };

            let mut endpoint = match Endpoint::from_shared(uri) {
                Ok(endpoint) => endpoint.connect_timeout(connect_timeout),
                Err(e) => {
                    warn!(%addr, error = %e, "invalid metadata address");
                    last_error = format!("invalid address {addr}: {e}");
                    malformed.push(addr.clone());
                    continue;
                }
            };
            if let Some(tls) = &tls {
                endpoint = endpoint
                    .tls_config(tls.clone())
                    .map_err(|e| MetaError::Tls(e.to_string()))?;
            }

            match endpoint.connect().await {
                Ok(channel) => {
                    info!(%addr, "connected to metadata service");
                    return Ok(Self::from_channel(addr.clone(), channel));
                }
                Err(e) => {
                    warn!(%addr, error = %e, "metadata endpoint unreachable");
                    last_error = e.to_string();
                }
            }
        }

        if !addrs.is_empty() && malformed.len() == addrs.len() {
            return Err(MetaError::InvalidAddress(malformed.join(", ")));
        }
        Err(MetaError::Unreachable {
            tried: addrs.to_vec(),
            reason: last_error,
        })
    }

    /// Wrap an already established channel.
    pub fn from_channel(addr: String, channel: Channel) -> Self {
        Self {
            addr,
            client: RwLock::new(Some(MetaServiceClient::new(channel))),
        }
    }

    /// Address of the metadata endpoint in use.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn client(&self) -> MetaResult<MetaServiceClient<Channel>> {
        self.client.read().await.clone().ok_or(MetaError::Closed)
    }
}

#[tonic::async_trait]
impl MetadataClient for MetaClient {
    async fn get_all_members(&self, exclude_tombstoned: bool) -> MetaResult<Vec<Member>> {
        let mut client = self.client().await?;
        let response = client
            .get_all_members(proto::GetAllMembersRequest { exclude_tombstoned })
            .await
            .map_err(|source| MetaError::Rpc {
                method: "GetAllMembers",
                source,
            })?;

        let members: Vec<Member> = response
            .into_inner()
            .members
            .into_iter()
            .map(Member::from)
            .collect();
        debug!(count = members.len(), exclude_tombstoned, "fetched members");
        Ok(members)
    }

    async fn get_member(&self, member_id: u64) -> MetaResult<Member> {
        let mut client = self.client().await?;
        let response = client
            .get_member(proto::GetMemberRequest { member_id })
            .await
            .map_err(|source| match source.code() {
                tonic::Code::NotFound => MetaError::MemberNotFound(member_id),
                _ => MetaError::Rpc {
                    method: "GetMember",
                    source,
                },
            })?;

        response
            .into_inner()
            .member
            .map(Member::from)
            .ok_or(MetaError::MemberNotFound(member_id))
    }

    async fn close(&self) {
        if self.client.write().await.take().is_some() {
            info!(addr = %self.addr, "metadata client closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::{Request, Response, Status};

    use crate::member::MemberState;
    use crate::proto::meta_service_server::{MetaService, MetaServiceServer};

    struct FakeMeta {
        members: Vec<proto::Member>,
    }

    #[tonic::async_trait]
    impl MetaService for FakeMeta {
        async fn get_all_members(
            &self,
            request: Request<proto::GetAllMembersRequest>,
        ) -> Result<Response<proto::GetAllMembersResponse>, Status> {
            let exclude = request.into_inner().exclude_tombstoned;
            let members = self
                .members
                .iter()
                .filter(|m| !exclude || m.state != proto::MemberState::Tombstone as i32)
                .cloned()
                .collect();
            Ok(Response::new(proto::GetAllMembersResponse { members }))
        }

        async fn get_member(
            &self,
            request: Request<proto::GetMemberRequest>,
        ) -> Result<Response<proto::GetMemberResponse>, Status> {
            let id = request.into_inner().member_id;
            match self.members.iter().find(|m| m.id == id) {
                Some(m) => Ok(Response::new(proto::GetMemberResponse {
                    member: Some(m.clone()),
                })),
                None => Err(Status::not_found(format!("member {id}"))),
            }
        }
    }

    fn wire_member(id: u64, state: proto::MemberState) -> proto::Member {
        proto::Member {
            id,
            address: format!("10.0.0.{id}:20160"),
            state: state.into(),
            version: "5.1.0".to_string(),
            ..Default::default()
        }
    }

    async fn serve(members: Vec<proto::Member>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(MetaServiceServer::new(FakeMeta { members }))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn connect_with_no_addresses_is_unreachable() {
        let err = MetaClient::connect(&[], &SecurityConfig::default(), Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MetaError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn connect_skips_dead_endpoints() {
        let live = serve(vec![wire_member(1, proto::MemberState::Up)]).await;
        let addrs = vec!["127.0.0.1:1".to_string(), live.to_string()];

        let client = MetaClient::connect(&addrs, &SecurityConfig::default(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(client.addr(), live.to_string());
    }

    #[tokio::test]
    async fn connect_skips_malformed_addresses() {
        let live = serve(vec![wire_member(1, proto::MemberState::Up)]).await;
        let addrs = vec!["bad addr".to_string(), live.to_string()];

        let client = MetaClient::connect(&addrs, &SecurityConfig::default(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(client.addr(), live.to_string());
        assert_eq!(client.get_member(1).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn connect_with_only_malformed_addresses_is_invalid() {
        let addrs = vec!["bad addr".to_string(), "also bad".to_string()];
        let err = MetaClient::connect(&addrs, &SecurityConfig::default(), Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        match err {
            MetaError::InvalidAddress(list) => assert_eq!(list, "bad addr, also bad"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn connect_with_malformed_and_dead_is_unreachable() {
        let addrs = vec!["bad addr".to_string(), "127.0.0.1:1".to_string()];
        let err = MetaClient::connect(&addrs, &SecurityConfig::default(), Duration::from_millis(500))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MetaError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn lists_members_without_tombstones() {
        let addr = serve(vec![
            wire_member(1, proto::MemberState::Up),
            wire_member(2, proto::MemberState::Tombstone),
            wire_member(3, proto::MemberState::Offline),
        ])
        .await;
        let client = MetaClient::connect(&[addr.to_string()], &SecurityConfig::default(), Duration::from_secs(2))
            .await
            .unwrap();

        let all = client.get_all_members(false).await.unwrap();
        assert_eq!(all.len(), 3);

        let live = client.get_all_members(true).await.unwrap();
        let ids: Vec<u64> = live.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(live[1].state, MemberState::Offline);
    }

    #[tokio::test]
    async fn get_member_and_not_found() {
        let addr = serve(vec![wire_member(4, proto::MemberState::Up)]).await;
        let client = MetaClient::connect(&[addr.to_string()], &SecurityConfig::default(), Duration::from_secs(2))
            .await
            .unwrap();

        let m = client.get_member(4).await.unwrap();
        assert_eq!(m.address, "10.0.0.4:20160");

        let err = client.get_member(99).await.unwrap_err();
        assert!(matches!(err, MetaError::MemberNotFound(99)));
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let addr = serve(vec![]).await;
        let client = MetaClient::connect(&[addr.to_string()], &SecurityConfig::default(), Duration::from_secs(2))
            .await
            .unwrap();

        client.close().await;
        client.close().await;
        assert!(matches!(client.get_all_members(true).await, Err(MetaError::Closed)));
    }
}

//! Mount specifications and the immutable per-mount state.
//!
//! A mount binds one URL prefix to one pool:
//!
//! ```text
//! mountpoint=/foo,pool=data001,config=/etc/ceph/ceph.conf,timeout=30,allow_put=1,allow_delete=1
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;

use crate::store::{Cluster, Pool, StoreResult};
use crate::util::DavMethod;

bitflags! {
    /// WebDAV extension methods that may be enabled per mount.
    ///
    /// GET, HEAD and OPTIONS are always permitted; everything here
    /// defaults to disallowed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DavPermissions: u32 {
        const PUT = 0x1;
        const DELETE = 0x2;
        const MKCOL = 0x4;
        const PROPFIND = 0x8;
    }
}

/// A parsed `key=value[,key=value…]` mount specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// URL path prefix (nonempty; stored without trailing slashes, a
    /// lone `/` excepted).
    pub prefix: String,
    /// Pool name (nonempty).
    pub pool: String,
    /// Cluster configuration file; `None` means library defaults.
    pub config: Option<PathBuf>,
    /// Per-mount timeout. `None` (or `timeout=0`) inherits the gateway
    /// default.
    pub timeout: Option<Duration>,
    pub permissions: DavPermissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpecError {
    MissingKey(&'static str),
    UnknownKey(String),
    BadPair(String),
    BadTimeout(String),
}

impl fmt::Display for MountSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountSpecError::MissingKey(key) => {
                write!(f, "mount requires a nonempty `{}`", key)
            }
            MountSpecError::UnknownKey(key) => write!(f, "unknown mount key `{}`", key),
            MountSpecError::BadPair(pair) => write!(f, "expected key=value, got `{}`", pair),
            MountSpecError::BadTimeout(v) => write!(f, "bad timeout value `{}`", v),
        }
    }
}

impl std::error::Error for MountSpecError {}

impl MountSpec {
    /// Parse a comma-separated `key=value` list. Required keys:
    /// `mountpoint` and `pool`. An `allow_*` key grants its permission
    /// only when the value is nonempty.
    pub fn parse(s: &str) -> Result<MountSpec, MountSpecError> {
        let mut prefix = None;
        let mut pool = None;
        let mut config = None;
        let mut timeout = None;
        let mut permissions = DavPermissions::default();

        for pair in s.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| MountSpecError::BadPair(pair.to_string()))?;
            match key {
                "mountpoint" => prefix = Some(value.to_string()),
                "pool" => pool = Some(value.to_string()),
                "config" => {
                    if !value.is_empty() {
                        config = Some(PathBuf::from(value));
                    }
                }
                "timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| MountSpecError::BadTimeout(value.to_string()))?;
                    timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "allow_put" if !value.is_empty() => permissions |= DavPermissions::PUT,
                "allow_delete" if !value.is_empty() => permissions |= DavPermissions::DELETE,
                "allow_mkcol" if !value.is_empty() => permissions |= DavPermissions::MKCOL,
                "allow_propfind" if !value.is_empty() => permissions |= DavPermissions::PROPFIND,
                "allow_put" | "allow_delete" | "allow_mkcol" | "allow_propfind" => {}
                _ => return Err(MountSpecError::UnknownKey(key.to_string())),
            }
        }

        let mut prefix = prefix
            .filter(|p| !p.is_empty())
            .ok_or(MountSpecError::MissingKey("mountpoint"))?;
        // The bare-root request strips down to "/" only against a
        // slash-free prefix; a lone "/" stays as is.
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        let pool = pool
            .filter(|p| !p.is_empty())
            .ok_or(MountSpecError::MissingKey("pool"))?;

        Ok(MountSpec {
            prefix,
            pool,
            config,
            timeout,
            permissions,
        })
    }
}

impl FromStr for MountSpec {
    type Err = MountSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MountSpec::parse(s)
    }
}

/// One registered mount: a connected cluster plus one pool context per
/// worker lane. Immutable after [`Mount::open`].
pub struct Mount {
    prefix: String,
    permissions: DavPermissions,
    timeout: Duration,
    cluster: Arc<dyn Cluster>,
    pools: Vec<Box<dyn Pool>>,
}

impl Mount {
    pub(crate) fn open(
        spec: &MountSpec,
        cluster: Arc<dyn Cluster>,
        global_timeout: Duration,
        lanes: usize,
    ) -> StoreResult<Mount> {
        let timeout = spec.timeout.unwrap_or(global_timeout);
        let pools = (0..lanes)
            .map(|_| cluster.open_pool(&spec.pool))
            .collect::<StoreResult<Vec<_>>>()?;
        info!(
            "mounted {} from pool {} on cluster {}",
            spec.prefix,
            spec.pool,
            cluster.fsid()
        );
        Ok(Mount {
            prefix: spec.prefix.clone(),
            permissions: spec.permissions,
            timeout,
            cluster,
            pools,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn cluster(&self) -> &dyn Cluster {
        &*self.cluster
    }

    pub(crate) fn pool(&self, lane: usize) -> &dyn Pool {
        &*self.pools[lane]
    }

    pub(crate) fn permissions(&self) -> DavPermissions {
        self.permissions
    }

    /// Whether this mount serves `method`. GET, HEAD and OPTIONS always
    /// pass; the WebDAV extensions are gated on the mount's permissions.
    pub fn allows(&self, method: DavMethod) -> bool {
        match method {
            DavMethod::Options | DavMethod::Get | DavMethod::Head => true,
            DavMethod::Put => self.permissions.contains(DavPermissions::PUT),
            DavMethod::Delete => self.permissions.contains(DavPermissions::DELETE),
            DavMethod::MkCol => self.permissions.contains(DavPermissions::MKCOL),
            DavMethod::PropFind => self.permissions.contains(DavPermissions::PROPFIND),
        }
    }
}

//
//  dav-rados server.
//
//  Mounts RADOS pools (or an in-memory store) under URL prefixes and
//  serves them over plain http.
//
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use dav_rados::{DavGateway, MountSpec, Store};

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// virtual mount of a rados pool at a url prefix, e.g.
    /// mountpoint=/foo,pool=data001,config=/etc/ceph/ceph.conf,timeout=30,allow_put=1,allow_delete=1
    #[arg(long = "rados-mount", value_name = "SPEC", required = true)]
    rados_mount: Vec<MountSpec>,
    /// default timeout in seconds for store operations
    #[arg(long = "rados-timeout", value_name = "SECONDS", default_value = "30")]
    rados_timeout: u64,
    /// number of concurrent request lanes
    #[arg(long, default_value = "8")]
    lanes: usize,
    /// run store calls synchronously instead of through the aio bridge
    #[arg(long)]
    sync: bool,
    /// serve from an ephemeral in-memory store instead of a cluster
    #[arg(long)]
    mem: bool,
    /// port to listen on
    #[arg(short = 'p', long, default_value = "4918")]
    port: u16,
}

fn pick_store(mem: bool) -> Result<Store, Box<dyn Error>> {
    if mem {
        #[cfg(feature = "memstore")]
        {
            return Ok(Store::Mem);
        }
        #[cfg(not(feature = "memstore"))]
        {
            return Err("this binary was built without the `memstore` feature".into());
        }
    }
    #[cfg(feature = "rados")]
    {
        Ok(Store::Rados)
    }
    #[cfg(not(feature = "rados"))]
    {
        Err("this binary was built without the `rados` feature; pass --mem".into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut builder = DavGateway::builder(pick_store(cli.mem)?)
        .timeout(Duration::from_secs(cli.rados_timeout))
        .lanes(cli.lanes)
        .synchronous(cli.sync);
    for spec in cli.rados_mount {
        builder = builder.mount(spec);
    }
    let gateway = builder.build()?;

    let make_service = hyper::service::make_service_fn(move |_| {
        let gateway = gateway.clone();
        async move {
            let func = move |req| {
                let gateway = gateway.clone();
                async move { Ok::<_, Infallible>(gateway.handle(req).await) }
            };
            Ok::<_, Infallible>(hyper::service::service_fn(func))
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    println!("dav-rados: listening on {}", addr);
    hyper::Server::try_bind(&addr)?.serve(make_service).await?;
    Ok(())
}

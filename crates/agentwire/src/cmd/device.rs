use agentwire_device::{serve_serial, SocketServer};
use agentwire_rpc::RpcDispatcher;
use agentwire_transport::SerialLink;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cmd::DeviceArgs;
use crate::exit::{device_error, transport_error, CliError, CliResult, SUCCESS};

enum Link<'a> {
    Socket(&'a std::path::Path),
    Serial(&'a str),
    Radio,
}

/// Pick the one link the invocation names.
fn select_link(args: &DeviceArgs) -> CliResult<Link<'_>> {
    let mut links = Vec::new();
    if let Some(path) = &args.socket {
        links.push(Link::Socket(path));
    }
    if let Some(port) = &args.serial {
        links.push(Link::Serial(port));
    }
    if args.radio {
        links.push(Link::Radio);
    }
    if links.len() != 1 {
        return Err(CliError::usage(
            "choose exactly one of --socket PATH, --serial PORT or --radio",
        ));
    }
    links
        .pop()
        .ok_or_else(|| CliError::usage("no device link selected"))
}

/// Cancel `token` on Ctrl-C.
pub(crate) fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
        }
        token.cancel();
    });
}

pub async fn run(args: DeviceArgs) -> CliResult<i32> {
    let link = select_link(&args)?;
    let client = args.api.client()?;
    let (tools, bridge) = args.mcp.registry().await;
    let dispatcher = args.api.dispatcher(client, tools);
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let served = serve_link(link, args.baud, dispatcher, shutdown).await;
    bridge.shutdown().await;
    served.map(|()| SUCCESS)
}

async fn serve_link(
    link: Link<'_>,
    baud: u32,
    dispatcher: RpcDispatcher,
    shutdown: CancellationToken,
) -> CliResult<()> {
    match link {
        Link::Socket(path) => {
            let server = SocketServer::bind(path, dispatcher)
                .map_err(|err| device_error("socket bind failed", err))?;
            server
                .run(shutdown)
                .await
                .map_err(|err| device_error("socket server failed", err))?;
        }
        Link::Serial(port) => {
            let link = SerialLink::open(port, baud)
                .map_err(|err| transport_error("serial open failed", err))?;
            info!(port, baud, "serial device opened");
            serve_serial(link, dispatcher, shutdown)
                .await
                .map_err(|err| device_error("serial session failed", err))?;
        }
        Link::Radio => run_radio(dispatcher, shutdown).await?,
    }
    Ok(())
}

#[cfg(feature = "ble")]
async fn run_radio(dispatcher: RpcDispatcher, shutdown: CancellationToken) -> CliResult<()> {
    use std::sync::Arc;

    use agentwire_device::serve_radio;
    use agentwire_transport::BleLink;

    let link = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        link = BleLink::discover() => link.map_err(|err| transport_error("radio discovery failed", err))?,
    };
    let link = Arc::new(link);
    let result = serve_radio(link.clone(), dispatcher, shutdown).await;
    let _ = link.disconnect().await;
    result.map_err(|err| device_error("radio session failed", err))?;
    Ok(())
}

#[cfg(not(feature = "ble"))]
async fn run_radio(_dispatcher: RpcDispatcher, _shutdown: CancellationToken) -> CliResult<()> {
    Err(CliError::usage(
        "radio support is not compiled in (rebuild with --features ble)",
    ))
}

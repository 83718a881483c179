//! Write an int64 array control and read an int64 array indicator on an
//! FPGA target through a low-latency sideband stream.
//!
//! ```text
//! cargo run --example fpga_array_loop -- --simulate
//! ```

use std::process::ExitCode;

use clap::Parser;
use futures::StreamExt;
use moniker_sideband::control::{self, JsonRpcControl, OperationShape};
use moniker_sideband::sim::SimulatedInstrument;
use moniker_sideband::{
    teardown, DataShape, ElementType, MonikerGroup, SidebandConfig, SidebandError,
    SidebandSession, Strategy, TypedPayload,
};

#[derive(Debug, Parser)]
#[command(about = "FPGA int64 array loop over a low-latency sideband stream")]
struct Args {
    /// Server address
    #[arg(long, default_value = "localhost")]
    address: String,

    /// Control channel port
    #[arg(long, default_value_t = 31763)]
    port: u16,

    /// FPGA resource name
    #[arg(long, default_value = "RIO0")]
    resource: String,

    #[arg(long, default_value_t = 5)]
    iterations: usize,

    /// Elements written to the array control each iteration
    #[arg(long, default_value_t = 8)]
    write_size: usize,

    /// Elements read from the array indicator each iteration
    #[arg(long, default_value_t = 4)]
    read_size: usize,

    /// Run against an in-process simulated instrument
    #[arg(long)]
    simulate: bool,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("moniker_sideband=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

async fn run(args: Args) -> moniker_sideband::Result<()> {
    let config = SidebandConfig::default();

    let sim = if args.simulate {
        Some(
            SimulatedInstrument::builder()
                .resource(&args.resource)
                .start()
                .await?,
        )
    } else {
        None
    };
    let addr = match &sim {
        Some(sim) => sim.control_addr().to_string(),
        None => format!("{}:{}", args.address, args.port),
    };
    let rpc = JsonRpcControl::new(addr, &config);

    let fpga = control::create_and_start(&rpc, &args.resource).await?;
    let indicator = OperationShape::new(DataShape::array(ElementType::I64, args.read_size));
    let array_control = OperationShape::new(DataShape::array(ElementType::I64, args.write_size));

    let mut group = MonikerGroup::new();
    group.add_read(control::begin_read(&rpc, &fpga, &indicator).await?)?;
    group.add_write(control::begin_write(&rpc, &fpga, &array_control).await?)?;

    let session =
        SidebandSession::establish(&rpc, group, Strategy::SocketsLowLatency, &config).await?;

    let write_size = args.write_size;
    let mut looped = Ok(());
    {
        let mut batches = session.run(args.iterations, move |_: usize| {
            vec![TypedPayload::from(vec![1i64; write_size])]
        });
        while let Some(batch) = batches.next().await {
            match batch.and_then(|b| b.slot::<i64>(0).map(<[i64]>::to_vec)) {
                Ok(values) => println!("Array Size: {} data: {:?}", values.len(), values),
                Err(e) => {
                    looped = Err(e);
                    break;
                }
            }
        }
    }

    let cleanup = teardown(&session, &rpc, &[fpga]).await.into_result();
    looped.and(cleanup)
}

fn describe(err: &SidebandError) -> String {
    match err.status() {
        Some(status) => status.diagnostic(),
        None => err.to_string(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", describe(&e));
            ExitCode::FAILURE
        }
    }
}

//! Write a scalar voltage and read it back through a sideband stream.
//!
//! ```text
//! cargo run --example analog_loop -- --simulate
//! cargo run --example analog_loop -- --address 10.0.0.5 --read-channel Dev1/ai0
//! ```

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use futures::StreamExt;
use moniker_sideband::control::{self, JsonRpcControl, OperationShape};
use moniker_sideband::sim::SimulatedInstrument;
use moniker_sideband::{
    stream, teardown, DataShape, ElementType, MonikerGroup, SidebandConfig, SidebandError,
    SidebandSession, Strategy, TypedPayload,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Sockets,
    SocketsLowLatency,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sockets => Strategy::Sockets,
            StrategyArg::SocketsLowLatency => Strategy::SocketsLowLatency,
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Analog output to analog input loop over a sideband stream")]
struct Args {
    /// Server address
    #[arg(long, default_value = "localhost")]
    address: String,

    /// Control channel port
    #[arg(long, default_value_t = 31763)]
    port: u16,

    /// Physical channel to read
    #[arg(long, default_value = "Dev1/ai0")]
    read_channel: String,

    /// Physical channel to write
    #[arg(long, default_value = "Dev1/ao0")]
    write_channel: String,

    #[arg(long, default_value_t = 5)]
    iterations: usize,

    #[arg(long, value_enum, default_value_t = StrategyArg::Sockets)]
    strategy: StrategyArg,

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
                .resource(&args.read_channel)
                .resource(&args.write_channel)
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

    let input = control::create_and_start(&rpc, &args.read_channel).await?;
    let output = control::create_and_start(&rpc, &args.write_channel).await?;
    let voltage = OperationShape::new(DataShape::scalar(ElementType::F64));

    let mut group = MonikerGroup::new();
    group.add_read(control::begin_read(&rpc, &input, &voltage).await?)?;
    group.add_write(control::begin_write(&rpc, &output, &voltage).await?)?;

    let session = SidebandSession::establish(&rpc, group, args.strategy.into(), &config).await?;

    let mut looped = Ok(());
    {
        let mut batches = session.run(
            args.iterations,
            stream::repeat(vec![TypedPayload::scalar(1.0f64)]),
        );
        while let Some(batch) = batches.next().await {
            match batch.and_then(|b| b.slot::<f64>(0).map(|v| (b.iteration(), v.to_vec()))) {
                Ok((iteration, values)) => println!("iteration {}: data: {:?}", iteration, values),
                Err(e) => {
                    looped = Err(e);
                    break;
                }
            }
        }
    }

    let cleanup = teardown(&session, &rpc, &[input, output]).await.into_result();
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
